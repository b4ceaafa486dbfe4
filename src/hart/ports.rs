//! External signal ports, and the run/stall state their edges drive.
//!
//! Each input port is level-sensitive from the host's point of view: the
//! host writes the new line level, and the hart derives edge behavior from
//! the latched previous level.

use std::borrow::Cow;
use std::ops::{BitOr, BitOrAssign};

use log::trace;
use serde::{Deserialize, Serialize};

use crate::config::{Config, DebugPolicy};
use crate::exception::{is_external_interrupt, Trap, LOCAL_INTERRUPT_BASE, TRAP_DESCRIPTORS};
use crate::host::Host;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

use super::Hart;

/// Latched levels of the control signal inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetValue {
    pub reset: bool,
    pub nmi: bool,
    pub haltreq: bool,
    pub resethaltreq: bool,
    /// resethaltreq as sampled at the last reset; consumed by the fetch
    /// gate to enter Debug mode out of reset.
    pub resethaltreq_sampled: bool,
}

/// Reasons the hart is currently halted. The hart runs iff the set is
/// empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Disable(u8);

impl Disable {
    /// Halted while the reset line is high.
    pub const RESET: Disable = Disable(1 << 0);
    /// Halted by WFI until an interrupt becomes pending.
    pub const WFI: Disable = Disable(1 << 1);
    /// Stalled in Debug mode.
    pub const DEBUG: Disable = Disable(1 << 2);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Disable) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn clear(&mut self, reasons: Disable) {
        self.0 &= !reasons.0;
    }
}

impl BitOr for Disable {
    type Output = Disable;
    fn bitor(self, rhs: Disable) -> Disable {
        Disable(self.0 | rhs.0)
    }
}

impl BitOrAssign for Disable {
    fn bitor_assign(&mut self, rhs: Disable) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Input,
    Output,
}

/// What a port is wired to inside the hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortTarget {
    Reset,
    Nmi,
    HaltReq,
    ResetHaltReq,
    /// Pending bit of one interrupt source, by cause code.
    Interrupt(u32),
    /// External-interrupt claim ID latch of one privilege mode.
    ExternalId(RawPrivilegeLevel),
    /// Debug-state indication (output).
    DebugMode,
}

/// One entry of the hart's port catalogue.
#[derive(Debug, Clone)]
pub struct PortDesc {
    pub name: Cow<'static, str>,
    pub kind: PortKind,
    pub description: Cow<'static, str>,
    pub target: PortTarget,
}

fn input(
    name: impl Into<Cow<'static, str>>,
    description: impl Into<Cow<'static, str>>,
    target: PortTarget,
) -> PortDesc {
    PortDesc {
        name: name.into(),
        kind: PortKind::Input,
        description: description.into(),
        target,
    }
}

/// Build the port catalogue for a variant: control signals, one input per
/// implemented interrupt source, the optional claim-ID inputs, and the
/// debug trio.
pub(crate) fn build_net_ports(config: &Config, interrupt_mask: u64) -> Vec<PortDesc> {
    let mut ports = vec![
        input("reset", "Reset", PortTarget::Reset),
        input("nmi", "NMI", PortTarget::Nmi),
    ];

    for desc in TRAP_DESCRIPTORS {
        let Trap::Interrupt(code) = desc.trap else {
            continue;
        };
        if interrupt_mask & (1 << code) == 0 {
            continue;
        }
        ports.push(input(desc.name, desc.description, PortTarget::Interrupt(code)));

        if config.external_interrupt_id && is_external_interrupt(code) {
            let mode = RawPrivilegeLevel::from_u2((code - 8) as u8);
            ports.push(input(
                format!("{mode}ExternalInterruptID"),
                "External Interrupt ID",
                PortTarget::ExternalId(mode),
            ));
        }
    }

    for i in 0..config.local_interrupt_count {
        ports.push(input(
            format!("LocalInterrupt{i}"),
            format!("Local interrupt {i}"),
            PortTarget::Interrupt(LOCAL_INTERRUPT_BASE + i),
        ));
    }

    if config.debug != DebugPolicy::Disabled {
        ports.push(PortDesc {
            name: "DM".into(),
            kind: PortKind::Output,
            description: "Debug state indication".into(),
            target: PortTarget::DebugMode,
        });
        ports.push(input(
            "haltreq",
            "haltreq (Debug halt request)",
            PortTarget::HaltReq,
        ));
        ports.push(input(
            "resethaltreq",
            "resethaltreq (Debug halt request after reset)",
            PortTarget::ResetHaltReq,
        ));
    }

    ports
}

fn posedge(old: bool, new: bool) -> bool {
    !old && new
}

fn negedge(old: bool, new: bool) -> bool {
    old && !new
}

impl<H: Host> Hart<H> {
    /// The port catalogue of this variant.
    pub fn net_ports(&self) -> &[PortDesc] {
        &self.net_ports
    }

    /// Host write to one of the input ports.
    pub fn write_net(&mut self, target: PortTarget, value: u64) {
        match target {
            PortTarget::Reset => self.reset_line(value != 0),
            PortTarget::Nmi => self.nmi_line(value != 0),
            PortTarget::HaltReq => self.haltreq_line(value != 0),
            PortTarget::ResetHaltReq => self.net_value.resethaltreq = value != 0,
            PortTarget::Interrupt(index) => self.interrupt_line(index, value != 0),
            PortTarget::ExternalId(mode) => self.ints.ext_int[mode as usize] = value,
            PortTarget::DebugMode => panic!("DM is an output port"),
        }
    }

    fn reset_line(&mut self, new_value: bool) {
        let old_value = self.net_value.reset;

        if posedge(old_value, new_value) {
            // Halt the hart while the signal is high.
            self.halt_hart(Disable::RESET);
        } else if negedge(old_value, new_value) {
            // Reset when the signal goes low.
            self.reset();
        }

        self.net_value.reset = new_value;
    }

    fn nmi_line(&mut self, new_value: bool) {
        let old_value = self.net_value.nmi;

        // NMI actions happen on the falling edge, unless debugging.
        if !self.debug_mode() && negedge(old_value, new_value) {
            self.do_nmi();
        }

        // Mirror the level in dcsr.nmip regardless.
        self.dcsr.set_nmip(new_value);
        self.net_value.nmi = new_value;
    }

    fn haltreq_line(&mut self, new_value: bool) {
        let old_value = self.net_value.haltreq;

        // The halt itself happens in the fetch gate; just make sure one
        // runs before the next instruction.
        if !self.debug_mode() && posedge(old_value, new_value) {
            self.host().post_synchronous_interrupt();
        }

        self.net_value.haltreq = new_value;
    }

    fn interrupt_line(&mut self, index: u32, new_value: bool) {
        let max_num = LOCAL_INTERRUPT_BASE + self.config().local_interrupt_count;
        assert!(
            index < max_num,
            "interrupt port index {index} exceeds maximum {}",
            max_num - 1
        );

        let word = (index / 64) as usize;
        let mask = 1u64 << (index % 64);
        if new_value {
            self.ints.ip[word] |= mask;
        } else {
            self.ints.ip[word] &= !mask;
        }
        trace!("interrupt line {index} driven to {}", new_value as u8);

        self.update_pending();
    }

    /// Add `reason` to the disable set, stopping the hart if it was
    /// running.
    pub(crate) fn halt_hart(&mut self, reason: Disable) {
        if self.disable.is_empty() {
            self.host().halt();
        }
        self.disable |= reason;
    }

    /// Remove `reasons` from the disable set, restarting the hart if none
    /// remain (possibly from a blocked state not visible in the set).
    pub(crate) fn restart_hart(&mut self, reasons: Disable) {
        self.disable.clear(reasons);
        if self.disable.is_empty() {
            self.host().restart();
        }
    }

    /// Full architectural reset sequence.
    pub fn reset(&mut self) {
        // Restart the hart from any halted state.
        self.restart_hart(Disable::WFI | Disable::RESET);

        // Exit Debug mode.
        if self.debug_mode() {
            self.leave_debug();
        }

        self.set_privilege(PrivilegeLevel::Machine);
        self.reset_csrs();
        self.notify_reset();
        self.last_trap = None;
        self.host().set_pc_trap(self.config().reset_address);

        // Sample the halt-out-of-reset request; the first committed fetch
        // consumes it.
        self.net_value.resethaltreq_sampled = self.net_value.resethaltreq;
    }

    /// Non-maskable interrupt: bypasses delegation, enables and the trap
    /// vectors entirely.
    fn do_nmi(&mut self) {
        self.restart_hart(Disable::WFI | Disable::RESET);
        self.set_privilege(PrivilegeLevel::Machine);

        let epc = self.epc();
        let mregs = self.trap_regs_mut(PrivilegeLevel::Machine);
        mregs.set_cause(false, 0);
        mregs.write_epc(epc);

        self.last_trap = None;
        let nmi_address = self.config().nmi_address;
        self.host().set_pc_trap(nmi_address);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::hart_with;
    use super::*;
    use crate::Config;

    #[test]
    fn catalogue_lists_implemented_interrupts_only() {
        let (_, hart) = hart_with(Config::default());
        let names: Vec<&str> = hart.net_ports().iter().map(|p| p.name.as_ref()).collect();
        assert!(names.contains(&"reset"));
        assert!(names.contains(&"nmi"));
        assert!(names.contains(&"MTimerInterrupt"));
        assert!(names.contains(&"SExternalInterrupt"));
        // No N extension, no U interrupts; no debug, no debug trio.
        assert!(!names.contains(&"USWInterrupt"));
        assert!(!names.contains(&"haltreq"));
        assert!(!names.contains(&"DM"));
    }

    #[test]
    fn catalogue_grows_with_configuration() {
        let config = Config {
            external_interrupt_id: true,
            local_interrupt_count: 2,
            debug: DebugPolicy::Halt,
            ..Config::default()
        };
        let (_, hart) = hart_with(config);
        let names: Vec<&str> = hart.net_ports().iter().map(|p| p.name.as_ref()).collect();
        assert!(names.contains(&"MExternalInterruptID"));
        assert!(names.contains(&"SExternalInterruptID"));
        assert!(!names.contains(&"UExternalInterruptID"));
        assert!(names.contains(&"LocalInterrupt0"));
        assert!(names.contains(&"LocalInterrupt1"));
        assert!(names.contains(&"DM"));
        assert!(names.contains(&"haltreq"));
        assert!(names.contains(&"resethaltreq"));
        let dm = hart
            .net_ports()
            .iter()
            .find(|p| p.name == "DM")
            .unwrap();
        assert_eq!(dm.kind, PortKind::Output);
    }

    #[test]
    fn reset_line_halts_high_and_resets_low() {
        let (host, mut hart) = hart_with(Config::default());
        hart.set_privilege(PrivilegeLevel::User);
        hart.status_mut().set_mie(true);

        hart.write_net(PortTarget::Reset, 1);
        assert_eq!(host.halts.get(), 1);
        assert!(hart.disable().contains(Disable::RESET));

        hart.write_net(PortTarget::Reset, 0);
        assert!(hart.disable().is_empty());
        assert_eq!(hart.privilege(), PrivilegeLevel::Machine);
        assert_eq!(host.trap_pc.get(), Some(hart.config().reset_address));
        assert_eq!(hart.last_trap(), None);
        assert!(!hart.status().mie());
        assert!(!hart.debug_mode());
    }

    #[test]
    fn reset_samples_the_resethaltreq_level() {
        let config = Config {
            debug: DebugPolicy::Halt,
            ..Config::default()
        };
        let (_, mut hart) = hart_with(config);
        hart.write_net(PortTarget::ResetHaltReq, 1);
        hart.write_net(PortTarget::Reset, 1);
        hart.write_net(PortTarget::Reset, 0);
        assert!(hart.net_value.resethaltreq_sampled);
    }

    #[test]
    fn reset_clears_software_pending_but_keeps_line_levels() {
        let (_, mut hart) = hart_with(Config::default());
        let ssip = 1u32;
        hart.write_mip(1 << ssip, 1 << ssip);
        hart.write_net(PortTarget::Interrupt(7), 1);
        hart.write_net(PortTarget::Reset, 1);
        hart.write_net(PortTarget::Reset, 0);
        // The external line is still high; the software bit is gone.
        assert_eq!(hart.read_mip(), 1 << 7);
    }

    #[test]
    fn nmi_fires_on_the_falling_edge() {
        let (host, mut hart) = hart_with(Config::default());
        hart.set_privilege(PrivilegeLevel::Supervisor);
        host.pc.set(0x8000);

        hart.write_net(PortTarget::Nmi, 1);
        assert!(hart.dcsr().nmip());
        assert_eq!(host.trap_pc.get(), None);

        hart.write_net(PortTarget::Nmi, 0);
        assert!(!hart.dcsr().nmip());
        assert_eq!(hart.privilege(), PrivilegeLevel::Machine);
        assert_eq!(host.trap_pc.get(), Some(hart.config().nmi_address));
        let mregs = hart.trap_regs(PrivilegeLevel::Machine);
        assert_eq!(mregs.read_cause(), 0);
        assert_eq!(mregs.read_epc(), 0x8000);
    }

    #[test]
    fn nmi_restarts_a_wfi_halted_hart() {
        let (host, mut hart) = hart_with(Config::default());
        hart.wfi();
        assert_eq!(host.halts.get(), 1);
        hart.write_net(PortTarget::Nmi, 1);
        hart.write_net(PortTarget::Nmi, 0);
        assert_eq!(host.restarts.get(), 1);
        assert!(hart.disable().is_empty());
    }

    #[test]
    fn haltreq_schedules_a_synchronous_interrupt() {
        let config = Config {
            debug: DebugPolicy::Halt,
            ..Config::default()
        };
        let (host, mut hart) = hart_with(config);
        hart.write_net(PortTarget::HaltReq, 1);
        assert_eq!(host.sync_interrupts.get(), 1);
        // Level held high: no further edge, no further post.
        hart.write_net(PortTarget::HaltReq, 1);
        assert_eq!(host.sync_interrupts.get(), 1);
    }

    #[test]
    #[should_panic(expected = "interrupt port index")]
    fn out_of_range_interrupt_index_is_fatal() {
        let (_, mut hart) = hart_with(Config::default());
        hart.write_net(PortTarget::Interrupt(40), 1);
    }
}
