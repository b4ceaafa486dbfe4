//! Pending/enable/delegation state and the interrupt arbiter.

use log::{debug, log_enabled, trace, Level};
use serde::{Deserialize, Serialize};

use crate::exception::{Trap, LOCAL_INTERRUPT_BASE};
use crate::host::Host;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

use super::{Disable, Hart};

/// Fixed architectural rank of the standard interrupts, indexed by cause
/// code. Higher rank wins within one destination mode. Local and custom
/// interrupts share the lowest rank, with ties going to the lowest code.
const INTERRUPT_PRIORITY: [u8; 16] = [
    2, // 0: USWInterrupt
    5, // 1: SSWInterrupt
    0, // 2: (reserved)
    8, // 3: MSWInterrupt
    1, // 4: UTimerInterrupt
    4, // 5: STimerInterrupt
    0, // 6: (reserved)
    7, // 7: MTimerInterrupt
    3, // 8: UExternalInterrupt
    6, // 9: SExternalInterrupt
    0, // 10: (reserved)
    9, // 11: MExternalInterrupt
    0, 0, 0, 0, // 12..15: (reserved)
];
const_assert!(INTERRUPT_PRIORITY.len() == LOCAL_INTERRUPT_BASE as usize);

fn priority(code: u32) -> u8 {
    INTERRUPT_PRIORITY.get(code as usize).copied().unwrap_or(0)
}

/// Bit for `code` within a 64-bit cause mask; zero for out-of-range codes,
/// which therefore read as "not delegated" and "not maskable".
fn code_bit(code: u32) -> u64 {
    1u64.checked_shl(code).unwrap_or(0)
}

const M_LEVEL_INTERRUPTS: u64 = (1 << 3) | (1 << 7) | (1 << 11);
const S_LEVEL_INTERRUPTS: u64 = (1 << 1) | (1 << 5) | (1 << 9);
const U_LEVEL_INTERRUPTS: u64 = (1 << 0) | (1 << 4) | (1 << 8);

/// Factors contributing to the arbiter's decision, kept only to report
/// interrupt-state changes (and persisted so a restored hart does not
/// re-report an unchanged state).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptDiag {
    pub pending_enabled: u64,
    pub pending: u64,
    pub pending_external: u64,
    pub pending_internal: u64,
    pub mideleg: u64,
    pub sideleg: u64,
    pub mie: bool,
    pub sie: bool,
    pub uie: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct InterruptState {
    /// External pending bits, one per interrupt source, latched by the net
    /// ports. Fixed width; never resized.
    pub ip: Vec<u64>,
    /// Pending bits set by software through CSR writes.
    pub swip: u64,
    /// The composed mip value visible to guest software: `ip[0] | swip`.
    pub mip: u64,
    pub mie: u64,
    pub mideleg: u64,
    pub sideleg: u64,
    pub medeleg: u64,
    pub sedeleg: u64,
    /// Claim ID most recently reported per privilege mode on the external
    /// interrupt ID ports; zero falls back to the architectural code.
    pub ext_int: [u64; 4],
    pub diag: InterruptDiag,
}

impl InterruptState {
    pub fn new(interrupt_count: u32) -> Self {
        let words = (interrupt_count as usize + 63) / 64;
        Self {
            ip: vec![0; words],
            swip: 0,
            mip: 0,
            mie: 0,
            mideleg: 0,
            sideleg: 0,
            medeleg: 0,
            sedeleg: 0,
            ext_int: [0; 4],
            diag: InterruptDiag::default(),
        }
    }

    /// Reset the architectural registers. The externally latched `ip` bits
    /// and claim IDs are signals, not registers, and survive.
    pub fn reset_csrs(&mut self) {
        self.swip = 0;
        self.mie = 0;
        self.mideleg = 0;
        self.sideleg = 0;
        self.medeleg = 0;
        self.sedeleg = 0;
        self.mip = self.ip[0];
    }
}

impl<H: Host> Hart<H> {
    pub fn read_mip(&self) -> u64 {
        self.ints.mip
    }

    /// Software write to mip. Only the software-writable pending bits can
    /// change; the externally driven bits are managed by the net ports.
    pub fn write_mip(&mut self, value: u64, mask: u64) {
        let mask = mask & self.swip_writable();
        self.ints.swip = self.ints.swip & !mask | value & mask;
        trace!("mip write: swip now {:#x}", self.ints.swip);
        self.update_pending();
    }

    /// Restricted S-mode view of mip.
    pub fn read_sip(&self) -> u64 {
        self.ints.mip & self.ints.mideleg
    }

    pub fn read_mie(&self) -> u64 {
        self.ints.mie
    }

    /// The mie register is **WARL**; only implemented interrupts are
    /// writable.
    pub fn write_mie(&mut self, value: u64, mask: u64) {
        let mask = mask & self.interrupt_mask();
        self.ints.mie = self.ints.mie & !mask | value & mask;
        self.test_interrupt();
    }

    /// Restricted S-mode view of mie.
    pub fn read_sie(&self) -> u64 {
        self.ints.mie & self.ints.mideleg
    }

    pub fn read_mideleg(&self) -> u64 {
        self.ints.mideleg
    }

    /// The mideleg register is **WARL**. M-level interrupts are never
    /// delegatable, and without S-mode the register is hardwired to zero,
    /// which the arbiter's mask arithmetic relies on.
    pub fn write_mideleg(&mut self, value: u64, mask: u64) {
        if !self.has_mode(PrivilegeLevel::Supervisor) {
            return;
        }
        let mask = mask & self.interrupt_mask() & !M_LEVEL_INTERRUPTS;
        self.ints.mideleg = self.ints.mideleg & !mask | value & mask;
        self.test_interrupt();
    }

    pub fn read_sideleg(&self) -> u64 {
        self.ints.sideleg
    }

    /// The sideleg register is **WARL**; hardwired to zero unless both
    /// S-mode and user-level interrupts exist.
    pub fn write_sideleg(&mut self, value: u64, mask: u64) {
        if !self.has_mode(PrivilegeLevel::Supervisor) || !self.config().isa.has(crate::Isa::N) {
            return;
        }
        let mask = mask & self.interrupt_mask() & !M_LEVEL_INTERRUPTS & !S_LEVEL_INTERRUPTS;
        self.ints.sideleg = self.ints.sideleg & !mask | value & mask;
        self.test_interrupt();
    }

    pub fn read_medeleg(&self) -> u64 {
        self.ints.medeleg
    }

    /// The medeleg register is **WARL**. Machine ECALLs are never delegated.
    pub fn write_medeleg(&mut self, value: u64, mask: u64) {
        if !self.has_mode(PrivilegeLevel::Supervisor) {
            return;
        }
        let mask = mask & self.exception_mask() & !(1 << 11);
        self.ints.medeleg = self.ints.medeleg & !mask | value & mask;
    }

    pub fn read_sedeleg(&self) -> u64 {
        self.ints.sedeleg
    }

    pub fn write_sedeleg(&mut self, value: u64, mask: u64) {
        if !self.has_mode(PrivilegeLevel::Supervisor) || !self.config().isa.has(crate::Isa::N) {
            return;
        }
        let mask = mask & self.exception_mask() & !(0b1111 << 8);
        self.ints.sedeleg = self.ints.sedeleg & !mask | value & mask;
    }

    fn swip_writable(&self) -> u64 {
        let mut writable = 0;
        if self.has_mode(PrivilegeLevel::Supervisor) {
            writable |= S_LEVEL_INTERRUPTS;
        }
        if self.config().isa.has(crate::Isa::N) {
            writable |= U_LEVEL_INTERRUPTS;
        }
        writable & self.interrupt_mask()
    }

    pub(crate) fn external_interrupt_id(&self, mode: PrivilegeLevel) -> u64 {
        self.ints.ext_int[RawPrivilegeLevel::from(mode) as usize]
    }

    /// Recompose mip after a change to either pending source, and re-run
    /// arbitration if it moved. Both the net ports and the mip CSR write
    /// funnel through here.
    pub fn update_pending(&mut self) {
        let old_value = self.ints.mip;
        let new_value = self.ints.ip[0] | self.ints.swip;
        if old_value != new_value {
            self.ints.mip = new_value;
            self.test_interrupt();
        }
    }

    /// Mask of pending interrupts that would cause resumption from WFI.
    /// Note that these could still be masked by global interrupt enables or
    /// delegation, see the Privileged Architecture specification.
    pub(crate) fn pending_interrupts(&self) -> u64 {
        self.ints.mie & self.ints.mip
    }

    /// Mask of pending-and-enabled interrupts: the arbiter's input.
    pub(crate) fn pending_and_enabled(&self) -> u64 {
        // All interrupts are disabled in Debug mode.
        if self.debug_mode() {
            return 0;
        }
        let mut result = self.pending_interrupts();
        if result != 0 {
            // Modify effective interrupt enables based on the current mode:
            // an xIE bit is in force only in mode x itself; below x the
            // group is always enabled, above x never.
            let mie = self.effective_ie(self.status().mie(), PrivilegeLevel::Machine);
            let sie = self.effective_ie(self.status().sie(), PrivilegeLevel::Supervisor);
            let uie = self.effective_ie(self.status().uie(), PrivilegeLevel::User);

            // Interrupt mask applicable for each mode.
            let mideleg = self.ints.mideleg;
            let sideleg = self.ints.sideleg & mideleg;
            let m_mask = !mideleg;
            let s_mask = mideleg & !sideleg;
            let u_mask = sideleg;

            if !mie {
                result &= !m_mask;
            }
            if !sie {
                result &= !s_mask;
            }
            if !uie {
                result &= !u_mask;
            }
        }
        result
    }

    fn effective_ie(&self, ie: bool, mode_ie: PrivilegeLevel) -> bool {
        let mode = self.privilege();
        if mode < mode_ie {
            true
        } else if mode > mode_ie {
            false
        } else {
            ie
        }
    }

    fn target_mode(&self, m_mask: u64, s_mask: u64, code: u32) -> PrivilegeLevel {
        let mode_y = self.privilege();
        let mode_x = if m_mask & code_bit(code) == 0 {
            PrivilegeLevel::Machine
        } else if s_mask & code_bit(code) == 0 {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        };
        // A trap cannot be taken to a lower-privilege mode.
        if mode_x > mode_y {
            mode_x
        } else {
            mode_y
        }
    }

    /// Mode the given interrupt would be taken to.
    pub(crate) fn interrupt_target_mode(&self, code: u32) -> PrivilegeLevel {
        self.target_mode(self.ints.mideleg, self.ints.sideleg, code)
    }

    /// Mode the given synchronous exception would be taken to.
    pub(crate) fn exception_target_mode(&self, code: u32) -> PrivilegeLevel {
        self.target_mode(self.ints.medeleg, self.ints.sedeleg, code)
    }

    /// Take the highest-priority interrupt in `mask`: destination mode
    /// dominates, then the architectural rank, then the lowest cause code.
    pub(crate) fn dispatch_interrupt(&mut self, mask: u64) {
        assert!(mask != 0, "expected pending-and-enabled interrupts");

        let mut selected: Option<(u32, PrivilegeLevel)> = None;
        let mut remaining = mask;
        let mut code = 0u32;
        while remaining != 0 {
            if remaining & 1 != 0 {
                let emode = self.interrupt_target_mode(code);
                let better = match selected {
                    None => true,
                    Some((sel_code, sel_mode)) => {
                        emode > sel_mode
                            || (emode == sel_mode && priority(code) > priority(sel_code))
                    }
                };
                if better {
                    selected = Some((code, emode));
                }
            }
            remaining >>= 1;
            code += 1;
        }

        let (code, _) = selected.unwrap();
        self.take_trap(Trap::Interrupt(code), 0);
    }

    /// Re-run interrupt arbitration after any contributing state change.
    ///
    /// Restarts a hart halted in WFI whenever anything is pending (even if
    /// masked), and schedules a synchronous interrupt with the host when
    /// something is both pending and enabled, so the fetch gate runs before
    /// the next instruction.
    pub fn test_interrupt(&mut self) {
        let pending_enabled = self.pending_and_enabled();

        if log_enabled!(Level::Debug) {
            let diag = InterruptDiag {
                pending_enabled,
                pending: self.ints.mip,
                pending_external: self.ints.ip[0],
                pending_internal: self.ints.swip,
                mideleg: self.ints.mideleg,
                sideleg: self.ints.sideleg,
                mie: self.status().mie(),
                sie: self.status().sie(),
                uie: self.status().uie(),
            };
            // Report only when the interrupt state changes.
            if diag != self.ints.diag {
                debug!(
                    "interrupt state: pending+enabled={:#010x} pending={:#010x} \
                     [external={:#010x} sw={:#010x}] mideleg={:#x} sideleg={:#x} \
                     mstatus.[msu]ie={}{}{}",
                    diag.pending_enabled,
                    diag.pending,
                    diag.pending_external,
                    diag.pending_internal,
                    diag.mideleg,
                    diag.sideleg,
                    diag.mie as u8,
                    diag.sie as u8,
                    diag.uie as u8,
                );
                self.ints.diag = diag;
            }
        }

        if self.pending_interrupts() != 0 {
            self.restart_hart(Disable::WFI);
        }

        if pending_enabled != 0 {
            self.host().post_synchronous_interrupt();
        }
    }

    /// Halt in WFI state until any mip bit becomes set.
    ///
    /// > The WFI instruction provides a hint to the implementation that the
    /// > current hart can be stalled until an interrupt might need
    /// > servicing.
    pub fn wfi(&mut self) {
        if !(self.debug_mode() || self.pending_interrupts() != 0) {
            self.halt_hart(Disable::WFI);
        }
    }
}
