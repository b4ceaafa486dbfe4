//! Save/restore of the state that the CSR read/write interface does not
//! cover: latched net levels, the pending-interrupt vector, and the
//! single-step timer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::Host;

use super::{Hart, InterruptDiag, NetValue};

/// Serializable snapshot of a hart's net and pending-interrupt state.
///
/// The architectural CSRs are saved and restored through the register
/// interface by the host; this record complements them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedNetState {
    /// Pending-interrupt bit vector, `ceil(interrupts / 64)` words.
    pub ip: Vec<u64>,
    /// Software-written pending bits.
    pub swip: u64,
    /// Latched control input levels, including the sampled
    /// halt-out-of-reset request.
    pub net: NetValue,
    /// Last reported interrupt-state diagnostic.
    pub diag: InterruptDiag,
    /// Whether the one-shot single-step timer was armed.
    pub step_timer_armed: bool,
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("pending-interrupt vector has {found} words, hart expects {expected}")]
    IpSizeMismatch { expected: usize, found: usize },
}

impl<H: Host> Hart<H> {
    pub fn save_net_state(&self) -> SavedNetState {
        SavedNetState {
            ip: self.ints.ip.clone(),
            swip: self.ints.swip,
            net: self.net_value,
            diag: self.ints.diag.clone(),
            step_timer_armed: self.step_timer_armed,
        }
    }

    /// Restore a previously saved net state. Finishes by recomposing mip
    /// and re-running the arbiter, so a pending-and-enabled trap is taken
    /// at the next fetch exactly as the saved hart would have taken it.
    pub fn restore_net_state(&mut self, state: SavedNetState) -> Result<(), RestoreError> {
        if state.ip.len() != self.ints.ip.len() {
            return Err(RestoreError::IpSizeMismatch {
                expected: self.ints.ip.len(),
                found: state.ip.len(),
            });
        }

        self.ints.ip = state.ip;
        self.ints.swip = state.swip;
        self.net_value = state.net;
        self.ints.diag = state.diag;
        self.ints.mip = self.ints.ip[0] | self.ints.swip;

        self.step_timer_armed = state.step_timer_armed;
        if self.step_timer_armed {
            self.host().arm_step_timer();
        }

        self.test_interrupt();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::hart_with;
    use super::super::PortTarget;
    use super::*;
    use crate::exception::Trap;
    use crate::hart::fetch::FetchResult;
    use crate::Config;

    #[test]
    fn round_trip_takes_the_identical_trap() {
        let (_, mut hart) = hart_with(Config::default());
        hart.status_mut().set_mie(true);
        hart.write_mie(1 << 7, !0);
        hart.write_net(PortTarget::Interrupt(7), 1);

        let saved = hart.save_net_state();
        let json = serde_json::to_string(&saved).unwrap();
        let reloaded: SavedNetState = serde_json::from_str(&json).unwrap();

        // Fresh hart, with the CSR state the register interface would have
        // restored.
        let (host, mut restored) = hart_with(Config::default());
        restored.status_mut().set_mie(true);
        restored.write_mie(1 << 7, !0);
        restored.restore_net_state(reloaded).unwrap();

        assert_eq!(restored.read_mip(), hart.read_mip());
        // The reconstituted trap fires at the next fetch.
        assert!(host.sync_interrupts.get() > 0);
        assert_eq!(restored.check_fetch(0x1000, true), FetchResult::TrapTaken);
        assert_eq!(restored.last_trap(), Some(Trap::Interrupt(7)));
    }

    #[test]
    fn restore_rejects_a_mismatched_vector_width() {
        let (_, hart) = hart_with(Config::default());
        let mut saved = hart.save_net_state();
        saved.ip.push(0);

        let (_, mut other) = hart_with(Config::default());
        assert!(matches!(
            other.restore_net_state(saved),
            Err(RestoreError::IpSizeMismatch {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn restore_rearms_the_step_timer() {
        let config = Config {
            debug: crate::DebugPolicy::Halt,
            ..Config::default()
        };
        let (_, mut hart) = hart_with(config.clone());
        hart.dcsr_mut().set_step(true);
        hart.set_step_breakpoint();

        let saved = hart.save_net_state();
        let (host, mut restored) = hart_with(config);
        restored.dcsr_mut().set_step(true);
        restored.restore_net_state(saved).unwrap();
        assert!(host.step_timer_armed.get());
    }

    #[test]
    fn net_levels_survive_the_round_trip() {
        let config = Config {
            debug: crate::DebugPolicy::Halt,
            ..Config::default()
        };
        let (_, mut hart) = hart_with(config.clone());
        hart.write_net(PortTarget::Nmi, 1);
        hart.write_net(PortTarget::ResetHaltReq, 1);

        let saved = hart.save_net_state();
        let (_, mut restored) = hart_with(config);
        restored.restore_net_state(saved).unwrap();

        assert!(restored.net_value.nmi);
        assert!(restored.net_value.resethaltreq);
        // A falling edge on the restored hart still triggers the NMI.
        restored.write_net(PortTarget::Nmi, 0);
        assert_eq!(
            restored.host().trap_pc.get(),
            Some(restored.config().nmi_address)
        );
    }
}
