//! The trap entry engine and the xRET return engines.

use log::{trace, warn};

use crate::config::{Isa, PrivVersion};
use crate::exception::{describe, is_external_interrupt, Exception, Trap};
use crate::host::Host;
use crate::PrivilegeLevel;

use super::csr::{DebugCause, VectorMode};
use super::{AccessFaultKind, Hart};

/// Does this code correspond to a retired instruction? ECALL and EBREAK
/// architecturally retire before trapping; everything else cuts the
/// instruction short.
fn retired_code(trap: Trap) -> bool {
    matches!(
        trap,
        Trap::Exception(
            Exception::Breakpoint
                | Exception::EnvironmentCallFromUMode
                | Exception::EnvironmentCallFromSMode
                | Exception::EnvironmentCallFromMMode
        )
    )
}

fn access_fault_code(trap: Trap) -> bool {
    matches!(
        trap,
        Trap::Exception(
            Exception::InstructionAccessFault
                | Exception::LoadAccessFault
                | Exception::StoreOrAmoAccessFault
        )
    )
}

impl<H: Host> Hart<H> {
    /// PC to return to after taking an exception. For harts with
    /// instruction-table extensions the address is the original call site,
    /// not the table instruction.
    pub(crate) fn epc(&self) -> u64 {
        let (pc, ds_offset) = self.host().pc_with_delay_slot();
        if ds_offset != 0 {
            self.jump_base
        } else {
            pc
        }
    }

    /// Take a trap: either a synchronous exception or an interrupt that the
    /// arbiter already selected.
    ///
    /// While in Debug mode no architectural trap is visible; the program
    /// buffer is aborted and Debug mode is re-entered instead.
    pub fn take_trap(&mut self, trap: Trap, tval: u64) {
        if self.debug_mode() {
            self.host().abort_repeat();
            self.enter_debug(DebugCause::None);
            return;
        }

        let is_interrupt = trap.is_interrupt();
        let code = trap.code();
        let epc = self.epc();
        let mode_y = self.privilege();

        // Adjust instret to account for whether the previous instruction
        // has retired, unless inhibited.
        if !retired_code(trap) && !self.inhibit_instret() {
            self.counters.instret += 1;
        }

        // Latch or clear access-fault detail depending on exception type.
        self.af_error_out = if access_fault_code(trap) {
            self.af_error_in
        } else {
            AccessFaultKind::None
        };

        // Any active exclusive access is broken by a trap.
        self.exclusive_tag = None;

        let mode_x = if is_interrupt {
            self.interrupt_target_mode(code)
        } else {
            self.exception_target_mode(code)
        };

        // An external interrupt reports the claimed source ID if one was
        // presented on the target mode's ID port.
        let mut reported = code as u64;
        if is_interrupt && is_external_interrupt(code) {
            let claimed = self.external_interrupt_id(mode_x);
            if claimed != 0 {
                reported = claimed;
            }
        }

        // Push the interrupt-enable stack of the target mode and record
        // where we came from.
        let ie = self.status.ie(mode_x);
        self.status.set_pie(mode_x, ie);
        self.status.set_ie(mode_x, false);
        match mode_x {
            PrivilegeLevel::User => {}
            PrivilegeLevel::Supervisor => self.status.set_spp(mode_y.into()),
            PrivilegeLevel::Machine => self.status.set_mpp(mode_y.into()),
        }

        let regs = self.trap_regs_mut(mode_x);
        regs.set_cause(is_interrupt, reported);
        regs.write_epc(epc);
        regs.write_tval(tval);
        let base = regs.tvec.base();
        let tvec_mode = regs.tvec.mode_raw();

        // Handle direct or vectored dispatch. The vector offset uses the
        // architectural code even when the reported code was substituted.
        let handler_pc = match self.trap_vector_mode(mode_x, tvec_mode) {
            VectorMode::Vectored if is_interrupt => base + 4 * code as u64,
            _ => base,
        };

        self.set_privilege(mode_x);
        self.last_trap = Some(trap);
        self.host().set_pc_trap(handler_pc);
        trace!("taking {trap} to {mode_x}-mode, handler at {handler_pc:#x}");

        self.notify_trap(mode_x, trap);
    }

    /// Vectoring behavior for a trap into `target` mode. From privileged
    /// ISA 1.10 the mode is encoded in the tvec register itself; earlier
    /// versions vectored in custom ways, so a configured per-mode override
    /// applies while the standard field reads zero.
    fn trap_vector_mode(&self, target: PrivilegeLevel, tvec_mode_raw: u8) -> VectorMode {
        match tvec_mode_raw {
            0 => self.config().custom_trap_modes.for_mode(target),
            1 => VectorMode::Vectored,
            _ => VectorMode::Direct,
        }
    }

    /// Take a trap caused by a memory access error, which a vector
    /// fault-only-first instruction may suppress.
    pub fn take_memory_trap(&mut self, trap: Trap, tval: u64) {
        // vstart must hold an architecturally valid value before any trap
        // becomes visible.
        self.vector.mask_vstart();

        if !self.handle_first_fault() {
            self.report_memory_trap(trap, tval);
            self.take_trap(trap, tval);
        }
    }

    /// Returns `true` if an active first-only-fault instruction absorbs the
    /// fault, clamping vl to the faulting element instead of trapping.
    fn handle_first_fault(&mut self) -> bool {
        let mut suppress = false;

        if self.vector.first_fault {
            // First-only-fault mode ends here whether or not the trap is
            // taken.
            self.vector.first_fault = false;

            // Special action is required only past the first element.
            if self.vector.vstart != 0 {
                suppress = true;
                let vstart = self.vector.vstart;
                self.vector.set_vl(vstart);
                self.vector.refresh_poly_key();
            }
        }

        suppress
    }

    fn report_memory_trap(&self, trap: Trap, tval: u64) {
        if self.config().verbose {
            warn!(
                "{} ({tval:#x}) at PC {:#x}",
                describe(trap),
                self.host().pc()
            );
        }
    }

    /// Take an Illegal Instruction exception.
    pub fn illegal_instruction(&mut self) {
        // tval is either zero or the faulting instruction pattern.
        let tval = if self.config().tval_ii_code {
            self.host().instruction_word(self.host().pc()) as u64
        } else {
            0
        };
        self.take_trap(Exception::IllegalInstruction.into(), tval);
    }

    /// Take an Instruction Address Misaligned exception towards `target`.
    pub fn instruction_address_misaligned(&mut self, target: u64) {
        let trap = Trap::from(Exception::InstructionAddressMisaligned);
        self.report_memory_trap(trap, target);
        self.take_trap(trap, target & !1);
    }

    /// Take the ECALL exception of the current mode.
    pub fn ecall(&mut self) {
        let exception = match self.privilege() {
            PrivilegeLevel::User => Exception::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Exception::EnvironmentCallFromMMode,
        };
        self.take_trap(exception.into(), 0);
    }

    /// Given a mode the hart is attempting to return to, pick the mode it
    /// actually lands in: returning to an unimplemented mode silently
    /// clamps to the lowest implemented one.
    fn eret_mode(&self, new_mode: PrivilegeLevel, min_mode: PrivilegeLevel) -> PrivilegeLevel {
        if self.has_mode(new_mode) {
            new_mode
        } else {
            min_mode
        }
    }

    /// From version 1.12, MRET and SRET clear MPRV when the new mode is
    /// less privileged than M-mode.
    pub(crate) fn clear_mprv(&mut self, new_mode: PrivilegeLevel) {
        if self.config().priv_version >= PrivVersion::V1_12 && new_mode != PrivilegeLevel::Machine
        {
            self.status.set_mprv(false);
        }
    }

    fn clear_reservation_on_xret(&mut self) {
        if !self.config().xret_preserves_lr {
            self.exclusive_tag = None;
        }
    }

    /// Common actions when returning from an exception: switch mode, jump
    /// to the return address, notify observers, and re-arbitrate.
    pub(crate) fn eret_common(
        &mut self,
        ret_mode: PrivilegeLevel,
        new_mode: PrivilegeLevel,
        epc: u64,
    ) {
        self.set_privilege(new_mode);

        // Mask the return address to an instruction boundary: 2 bytes while
        // compressed instructions are enabled, 4 otherwise.
        let mask: u64 = if self.current_isa().has(Isa::C) {
            !0b1
        } else {
            !0b11
        };
        self.host().set_pc(epc & mask);

        self.notify_trap_return(ret_mode);

        // Check for pending interrupts the handler may have unmasked.
        self.test_interrupt();
    }

    /// Return from an M-mode exception handler.
    pub fn mret(&mut self) {
        // Undefined behavior in Debug mode; a NOP in this model.
        if self.debug_mode() {
            return;
        }

        let mpp = self.status.mpp();
        let min_mode = self.min_mode();
        let new_mode = self.eret_mode(mpp, min_mode);

        self.clear_reservation_on_xret();

        let mpie = self.status.mpie();
        self.status.set_mie(mpie);
        self.status.set_mpie(true);
        self.status.set_mpp(min_mode.into());
        self.clear_mprv(new_mode);

        let epc = self.trap_regs(PrivilegeLevel::Machine).read_epc();
        self.eret_common(PrivilegeLevel::Machine, new_mode, epc);
    }

    /// Return from an S-mode exception handler.
    pub fn sret(&mut self) {
        // Undefined behavior in Debug mode; a NOP in this model.
        if self.debug_mode() {
            return;
        }

        let spp = self.status.spp();
        let min_mode = self.min_mode();
        let new_mode = self.eret_mode(spp, min_mode);

        self.clear_reservation_on_xret();

        let spie = self.status.spie();
        self.status.set_sie(spie);
        self.status.set_spie(true);
        self.status.set_spp(min_mode.into());
        self.clear_mprv(new_mode);

        let epc = self.trap_regs(PrivilegeLevel::Supervisor).read_epc();
        self.eret_common(PrivilegeLevel::Supervisor, new_mode, epc);
    }

    /// Return from a U-mode exception handler (N extension). U-mode has no
    /// previous-privilege field; the return mode is always U.
    pub fn uret(&mut self) {
        // Undefined behavior in Debug mode; a NOP in this model.
        if self.debug_mode() {
            return;
        }

        self.clear_reservation_on_xret();

        let upie = self.status.upie();
        self.status.set_uie(upie);
        self.status.set_upie(true);

        let epc = self.trap_regs(PrivilegeLevel::User).read_epc();
        self.eret_common(PrivilegeLevel::User, PrivilegeLevel::User, epc);
    }
}
