//! The Debug-mode controller: entry, exit, stalling, EBREAK routing and
//! single-stepping.
//!
//! Debug mode is out-of-band with respect to the architectural traps: while
//! it is active the hart runs at M-mode privilege, all interrupts are
//! suppressed, and EBREAK re-enters Debug mode instead of trapping.

use log::warn;

use crate::config::DebugPolicy;
use crate::exception::Exception;
use crate::host::Host;
use crate::PrivilegeLevel;

use super::csr::DebugCause;
use super::{Disable, Hart};

impl<H: Host> Hart<H> {
    fn set_debug(&mut self, dm: bool) {
        self.dm = dm;
        // Reflect the new state on the DM output port.
        self.host().notify_debug_mode(dm);
    }

    fn update_debug_stall(&mut self, stalled: bool) {
        self.dm_stall = stalled;

        // Under the Interrupt policy an external debug module takes over;
        // the hart is not stalled through the scheduler.
        let policy = self.config().debug;
        match policy {
            DebugPolicy::Interrupt => {}
            _ if stalled => self.halt_hart(Disable::DEBUG),
            _ => self.restart_hart(Disable::DEBUG),
        }
    }

    pub(crate) fn enter_debug(&mut self, cause: DebugCause) {
        if !self.debug_mode() {
            self.set_debug(true);

            // Save where we came from and why.
            self.dcsr.set_prv(self.privilege());
            self.dcsr.set_cause(cause);
            self.dpc = self.epc();

            self.set_privilege(PrivilegeLevel::Machine);
        }

        self.update_debug_stall(true);

        if self.config().debug == DebugPolicy::Interrupt {
            self.host().post_synchronous_interrupt();
        }
    }

    pub(crate) fn leave_debug(&mut self) {
        let new_mode = self.dcsr.prv();

        self.set_debug(false);
        self.clear_mprv(new_mode);

        let dpc = self.dpc;
        self.eret_common(PrivilegeLevel::Machine, new_mode, dpc);

        self.update_debug_stall(false);
    }

    /// External debugger request to enter or leave Debug mode. No-op if the
    /// hart is already in the requested state.
    pub fn set_debug_request(&mut self, dm: bool) {
        if self.debug_mode() == dm {
            // No change in state.
        } else if dm {
            self.enter_debug(DebugCause::HaltReq);
        } else {
            self.leave_debug();
        }
    }

    /// External debug-module control of the stall state, for debug
    /// implementations that park the hart without entering Debug mode
    /// through the hart's own paths.
    pub fn set_debug_stall(&mut self, stalled: bool) {
        self.update_debug_stall(stalled);
    }

    /// Return from Debug mode (DRET). Outside Debug mode DRET is an
    /// illegal instruction.
    pub fn dret(&mut self) {
        if !self.debug_mode() {
            if self.config().verbose {
                warn!(
                    "illegal instruction: DRET outside Debug mode at PC {:#x}",
                    self.host().pc()
                );
            }
            self.illegal_instruction();
        } else {
            self.leave_debug();
        }
    }

    /// Take an EBREAK, routed either into Debug mode (per the dcsr.ebreak*
    /// bit of the current mode) or to the architectural Breakpoint
    /// exception with the PC as tval.
    pub fn ebreak(&mut self) {
        let use_dm = if self.debug_mode() {
            true
        } else {
            match self.privilege() {
                PrivilegeLevel::User => self.dcsr.ebreaku(),
                PrivilegeLevel::Supervisor => self.dcsr.ebreaks(),
                PrivilegeLevel::Machine => self.dcsr.ebreakm(),
            }
        };

        if use_dm {
            // With dcsr.stopcount the counters freeze in Debug mode, but
            // the EBREAK itself still counts; apply it before the inhibit
            // takes hold.
            if self.dcsr.stopcount() {
                if !self.inhibit_cycle() {
                    self.counters.cycle += 1;
                }
                if !self.inhibit_instret() {
                    self.counters.instret += 1;
                }
            }
            self.enter_debug(DebugCause::Ebreak);
        } else {
            let pc = self.host().pc();
            self.take_trap(Exception::Breakpoint.into(), pc);
        }
    }

    /// Arm the single-step timer if stepping is requested.
    pub fn set_step_breakpoint(&mut self) {
        if !self.debug_mode() && self.dcsr.step() {
            self.step_timer_armed = true;
            self.host().arm_step_timer();
        }
    }

    /// Single-step timer callback; the host invokes this when the one-shot
    /// timer armed by [`set_step_breakpoint`](Self::set_step_breakpoint)
    /// fires, one instruction later.
    pub fn step_timer_fired(&mut self) {
        self.step_timer_armed = false;
        if !self.debug_mode() && self.dcsr.step() {
            self.enter_debug(DebugCause::Step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::hart_with;
    use super::*;
    use crate::exception::Trap;
    use crate::Config;

    fn debug_config() -> Config {
        Config {
            debug: DebugPolicy::Halt,
            ..Config::default()
        }
    }

    #[test]
    fn single_step_enters_debug_after_one_instruction() {
        let (host, mut hart) = hart_with(debug_config());
        hart.dcsr_mut().set_step(true);
        hart.set_privilege(PrivilegeLevel::Supervisor);

        hart.set_step_breakpoint();
        assert!(host.step_timer_armed.get());

        // The host executes one instruction, then fires the timer.
        host.pc.set(0x1004);
        hart.step_timer_fired();

        assert!(hart.debug_mode());
        assert_eq!(hart.dcsr().cause(), DebugCause::Step);
        assert_eq!(hart.dcsr().prv(), PrivilegeLevel::Supervisor);
        assert_eq!(hart.dpc(), 0x1004);
        assert_eq!(hart.privilege(), PrivilegeLevel::Machine);
        assert!(host.dm_line.get());
        assert_eq!(host.halts.get(), 1);
    }

    #[test]
    fn step_timer_is_not_armed_without_the_step_bit() {
        let (host, mut hart) = hart_with(debug_config());
        hart.set_step_breakpoint();
        assert!(!host.step_timer_armed.get());
    }

    #[test]
    fn ebreak_routes_to_debug_mode_per_dcsr() {
        let (_, mut hart) = hart_with(debug_config());
        hart.dcsr_mut().set_ebreakm(true);
        hart.ebreak();
        assert!(hart.debug_mode());
        assert_eq!(hart.dcsr().cause(), DebugCause::Ebreak);
    }

    #[test]
    fn ebreak_takes_a_breakpoint_exception_otherwise() {
        let (host, mut hart) = hart_with(debug_config());
        host.pc.set(0x2000);
        hart.ebreak();
        assert!(!hart.debug_mode());
        assert_eq!(
            hart.last_trap(),
            Some(Trap::Exception(Exception::Breakpoint))
        );
        assert_eq!(
            hart.trap_regs(PrivilegeLevel::Machine).read_tval(),
            0x2000
        );
    }

    #[test]
    fn ebreak_with_stopcount_pre_counts() {
        let (_, mut hart) = hart_with(debug_config());
        hart.dcsr_mut().set_ebreakm(true);
        hart.dcsr_mut().set_stopcount(true);
        hart.ebreak();
        assert_eq!(hart.counters().cycle, 1);
        assert_eq!(hart.counters().instret, 1);
    }

    #[test]
    fn dret_outside_debug_is_an_illegal_instruction() {
        let (_, mut hart) = hart_with(debug_config());
        hart.dret();
        assert_eq!(
            hart.last_trap(),
            Some(Trap::Exception(Exception::IllegalInstruction))
        );
    }

    #[test]
    fn dret_resumes_at_dpc_in_the_saved_mode() {
        let (host, mut hart) = hart_with(debug_config());
        hart.set_privilege(PrivilegeLevel::User);
        host.pc.set(0x3000);
        hart.enter_debug(DebugCause::HaltReq);
        assert_eq!(host.halts.get(), 1);

        hart.dret();

        assert!(!hart.debug_mode());
        assert!(!hart.debug_stalled());
        assert_eq!(hart.privilege(), PrivilegeLevel::User);
        assert_eq!(host.jump_pc.get(), Some(0x3000));
        assert_eq!(host.restarts.get(), 1);
        assert!(!host.dm_line.get());
    }

    #[test]
    fn interrupt_policy_posts_instead_of_halting() {
        let config = Config {
            debug: DebugPolicy::Interrupt,
            ..Config::default()
        };
        let (host, mut hart) = hart_with(config);
        hart.enter_debug(DebugCause::HaltReq);
        assert!(hart.debug_mode());
        assert_eq!(host.halts.get(), 0);
        assert!(host.sync_interrupts.get() > 0);
    }

    #[test]
    fn a_trap_while_debugging_aborts_the_program_buffer() {
        let (host, mut hart) = hart_with(debug_config());
        hart.enter_debug(DebugCause::HaltReq);

        hart.take_trap(Exception::LoadAccessFault.into(), 0x10);

        assert!(hart.debug_mode());
        assert_eq!(host.aborted_repeats.get(), 1);
        // No architectural trap is recorded, and the original debug cause
        // stays in place.
        assert_eq!(hart.last_trap(), None);
        assert_eq!(hart.dcsr().cause(), DebugCause::HaltReq);
    }

    #[test]
    fn debug_mode_suppresses_all_interrupts() {
        let (_, mut hart) = hart_with(debug_config());
        hart.status_mut().set_mie(true);
        hart.write_mie(1 << 7, !0);
        hart.write_net(super::super::PortTarget::Interrupt(7), 1);
        hart.set_privilege(PrivilegeLevel::User);
        assert_ne!(hart.pending_and_enabled(), 0);

        hart.enter_debug(DebugCause::HaltReq);
        assert_eq!(hart.pending_and_enabled(), 0);
    }

    #[test]
    fn debugger_request_toggles_debug_mode() {
        let (_, mut hart) = hart_with(debug_config());
        hart.set_debug_request(true);
        assert!(hart.debug_mode());
        assert_eq!(hart.dcsr().cause(), DebugCause::HaltReq);
        hart.set_debug_request(true);
        assert!(hart.debug_mode());
        hart.set_debug_request(false);
        assert!(!hart.debug_mode());
    }
}
