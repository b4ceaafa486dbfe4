//! The fetch gate: the hook the host calls before every instruction fetch.
//!
//! This is where asynchronous events become architecturally visible. In
//! priority order: debug entry out of reset, debug halt request, interrupt
//! dispatch, fetch-address validation. Only then may the fetch proceed.

use crate::exception::Exception;
use crate::host::{Host, MemAccess};

use super::csr::DebugCause;
use super::Hart;

/// Outcome of a fetch-gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    /// No trap is pending; the fetch may proceed.
    Fetch,
    /// A trap was taken; fetch from the redirected PC instead.
    TrapTaken,
    /// A speculative probe found that a committed fetch at this address
    /// would take a trap.
    TrapPending,
}

impl<H: Host> Hart<H> {
    /// Called by the host when fetching from `address`, giving the hart an
    /// opportunity to take an exception instead.
    ///
    /// `complete` distinguishes a committed fetch from a speculative probe;
    /// a probe reports what would happen without changing any state.
    pub fn check_fetch(&mut self, address: u64, complete: bool) -> FetchResult {
        let int_mask = self.pending_and_enabled();
        let fetch_ok;

        if self.net_value.resethaltreq_sampled {
            // Enter Debug mode out of reset.
            if complete {
                self.net_value.resethaltreq_sampled = false;
                self.enter_debug(DebugCause::ResetHaltReq);
            }
            fetch_ok = false;
        } else if self.net_value.haltreq && !self.debug_mode() {
            if complete {
                self.enter_debug(DebugCause::HaltReq);
            }
            fetch_ok = false;
        } else if int_mask != 0 {
            if complete {
                self.dispatch_interrupt(int_mask);
            }
            fetch_ok = false;
        } else {
            fetch_ok = self.validate_fetch_address(address, complete);
        }

        if fetch_ok {
            FetchResult::Fetch
        } else if complete {
            FetchResult::TrapTaken
        } else {
            FetchResult::TrapPending
        }
    }

    /// Validate that `address` is a mapped fetch address, re-probing at
    /// `address + 2` for instructions wider than one parcel (a 4-byte
    /// instruction may cross a page boundary). Address alignment is not
    /// validated here but by the preceding branch instruction.
    fn validate_fetch_address(&mut self, address: u64, complete: bool) -> bool {
        if !self.validate_fetch_parcel(address, complete) {
            return false;
        }
        if self.host().instruction_size(address) <= 2 {
            return true;
        }
        self.validate_fetch_parcel(address + 2, complete)
    }

    fn validate_fetch_parcel(&mut self, address: u64, complete: bool) -> bool {
        if self.host().is_executable(address) {
            return true;
        }

        if self.host().vm_miss(MemAccess::Execute, address, 2, complete) {
            // A permission exception of some kind was raised by the VM
            // subsystem; no further action required here.
            return false;
        }

        if !self.host().is_executable(address) {
            // Bus error if the address is still not executable.
            if complete {
                self.take_trap(Exception::InstructionAccessFault.into(), address);
            }
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::hart_with;
    use super::super::PortTarget;
    use super::*;
    use crate::exception::Trap;
    use crate::hart::csr::CAUSE_INTERRUPT_BIT;
    use crate::{Config, DebugPolicy, PrivilegeLevel};

    fn debug_config() -> Config {
        Config {
            debug: DebugPolicy::Halt,
            ..Config::default()
        }
    }

    #[test]
    fn clean_fetch_passes() {
        let (_, mut hart) = hart_with(Config::default());
        assert_eq!(hart.check_fetch(0x1000, true), FetchResult::Fetch);
    }

    #[test]
    fn reset_halt_request_enters_debug_on_the_first_committed_fetch() {
        let (_, mut hart) = hart_with(debug_config());
        hart.write_net(PortTarget::ResetHaltReq, 1);
        hart.write_net(PortTarget::Reset, 1);
        hart.write_net(PortTarget::Reset, 0);

        // A probe reports the pending entry without consuming it.
        assert_eq!(hart.check_fetch(0x1000, false), FetchResult::TrapPending);
        assert!(!hart.debug_mode());

        assert_eq!(hart.check_fetch(0x1000, true), FetchResult::TrapTaken);
        assert!(hart.debug_mode());
        assert_eq!(hart.dcsr().cause(), DebugCause::ResetHaltReq);

        // The sampled request is consumed; the next fetch is clean.
        hart.dret();
        assert_eq!(hart.check_fetch(0x1000, true), FetchResult::Fetch);
    }

    #[test]
    fn haltreq_enters_debug_at_the_next_fetch() {
        let (host, mut hart) = hart_with(debug_config());
        host.pc.set(0x2000);
        hart.write_net(PortTarget::HaltReq, 1);
        assert_eq!(hart.check_fetch(0x2000, true), FetchResult::TrapTaken);
        assert!(hart.debug_mode());
        assert_eq!(hart.dcsr().cause(), DebugCause::HaltReq);
        assert_eq!(hart.dpc(), 0x2000);
    }

    #[test]
    fn pending_interrupt_dispatches_before_the_fetch() {
        let (host, mut hart) = hart_with(Config::default());
        hart.trap_regs_mut(PrivilegeLevel::Machine)
            .tvec
            .write(0x100, !0);
        hart.status_mut().set_mie(true);
        hart.write_mie(1 << 7, !0);
        hart.write_net(PortTarget::Interrupt(7), 1);

        assert_eq!(hart.check_fetch(0x1000, true), FetchResult::TrapTaken);
        assert_eq!(hart.last_trap(), Some(Trap::Interrupt(7)));
        assert_eq!(
            hart.trap_regs(PrivilegeLevel::Machine).read_cause(),
            CAUSE_INTERRUPT_BIT | 7
        );
        assert_eq!(host.trap_pc.get(), Some(0x100));
    }

    #[test]
    fn probe_does_not_dispatch() {
        let (host, mut hart) = hart_with(Config::default());
        hart.status_mut().set_mie(true);
        hart.write_mie(1 << 7, !0);
        hart.write_net(PortTarget::Interrupt(7), 1);

        assert_eq!(hart.check_fetch(0x1000, false), FetchResult::TrapPending);
        assert_eq!(hart.last_trap(), None);
        assert_eq!(host.trap_pc.get(), None);
    }

    #[test]
    fn non_executable_address_faults_on_committed_fetch() {
        let (host, mut hart) = hart_with(Config::default());
        host.make_non_executable(0x3000);

        assert_eq!(hart.check_fetch(0x3000, false), FetchResult::TrapPending);
        assert_eq!(hart.last_trap(), None);

        assert_eq!(hart.check_fetch(0x3000, true), FetchResult::TrapTaken);
        assert_eq!(
            hart.last_trap(),
            Some(Trap::Exception(Exception::InstructionAccessFault))
        );
        assert_eq!(
            hart.trap_regs(PrivilegeLevel::Machine).read_tval(),
            0x3000
        );
    }

    #[test]
    fn vm_miss_can_raise_the_fault_itself() {
        let (host, mut hart) = hart_with(Config::default());
        host.make_non_executable(0x3000);
        host.vm_miss_raises.set(true);

        assert_eq!(hart.check_fetch(0x3000, true), FetchResult::TrapTaken);
        // The VM subsystem owned the exception; the gate raised nothing.
        assert_eq!(hart.last_trap(), None);
        assert_eq!(host.vm_misses.get(), 1);
    }

    #[test]
    fn vm_miss_resolution_lets_the_fetch_proceed() {
        let (host, mut hart) = hart_with(Config::default());
        host.make_non_executable(0x3000);
        host.vm_miss_raises.set(false);

        // Translation still missing after the miss call: access fault.
        assert_eq!(hart.check_fetch(0x3000, true), FetchResult::TrapTaken);
        assert_eq!(host.vm_misses.get(), 1);

        // Once the address is mapped executable, the gate is clean.
        host.make_executable(0x3000);
        assert_eq!(hart.check_fetch(0x3000, true), FetchResult::Fetch);
    }

    #[test]
    fn wide_instructions_probe_the_second_parcel() {
        let (host, mut hart) = hart_with(Config::default());
        host.insn_size.set(4);
        host.make_non_executable(0x4002);

        assert_eq!(hart.check_fetch(0x4000, true), FetchResult::TrapTaken);
        assert_eq!(
            hart.trap_regs(PrivilegeLevel::Machine).read_tval(),
            0x4002
        );

        // A compressed instruction at the same address does not cross.
        let (host, mut hart) = hart_with(Config::default());
        host.insn_size.set(2);
        host.make_non_executable(0x4002);
        assert_eq!(hart.check_fetch(0x4000, true), FetchResult::Fetch);
    }

    #[test]
    fn debug_entry_outranks_interrupt_dispatch() {
        let (_, mut hart) = hart_with(debug_config());
        hart.status_mut().set_mie(true);
        hart.write_mie(1 << 7, !0);
        hart.write_net(PortTarget::Interrupt(7), 1);
        hart.write_net(PortTarget::HaltReq, 1);

        assert_eq!(hart.check_fetch(0x1000, true), FetchResult::TrapTaken);
        assert!(hart.debug_mode());
        // The interrupt was not dispatched.
        assert_eq!(hart.last_trap(), None);
    }
}
