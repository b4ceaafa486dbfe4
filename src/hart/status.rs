//! The mstatus fields this core coordinates on trap entry and return.
//!
//! > The mstatus register keeps track of and controls the hart's current
//! > operating state.
//!
//! Only the interrupt-enable stack, the previous-privilege fields and MPRV
//! are owned here; the remaining mstatus fields belong to subsystems outside
//! this core.

use bitvec::{order::Lsb0, view::BitView};

use crate::{PrivilegeLevel, RawPrivilegeLevel};

#[derive(Debug, Clone)]
pub struct Status {
    mstatus: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Self {
            mstatus: 0x0000_0000,
        }
    }

    /// Returns `true` if the UIE (U-mode Interrupt Enable) bit is set.
    pub fn uie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::UIE]
    }

    /// Sets the UIE (U-mode Interrupt Enable) bit to `value`.
    pub fn set_uie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::UIE, value);
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SIE]
    }

    /// Sets the SIE (S-mode Interrupt Enable) bit to `value`.
    pub fn set_sie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the UPIE (U-mode Previous Interrupt Enable) bit is
    /// set.
    pub fn upie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::UPIE]
    }

    /// Sets the UPIE (U-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_upie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::UPIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is
    /// set.
    pub fn spie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SPIE]
    }

    /// Sets the SPIE (S-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_spie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is
    /// set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous
    /// Privilege level) field.
    ///
    /// The SPP field is **WARL**.
    pub fn spp(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(self.mstatus.view_bits::<Lsb0>()[idx::SPP] as u8)
            .try_into()
            .unwrap()
    }

    /// Sets the privilege level encoded by the SPP (S-mode Previous
    /// Privilege level) field to `value`.
    ///
    /// The SPP field is **WARL**.
    pub fn set_spp(&mut self, value: RawPrivilegeLevel) {
        match PrivilegeLevel::try_from(value) {
            Ok(value) if value <= PrivilegeLevel::Supervisor => {
                let bit = value as u8 != 0;
                self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
            }
            _ => {} // SPP is a WARL field, so ignore illegal values.
        };
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous
    /// Privilege level) field.
    ///
    /// The MPP field is **WARL**.
    pub fn mpp(&self) -> PrivilegeLevel {
        use bitvec::field::BitField;
        RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        )
        .try_into()
        .unwrap()
    }

    /// Sets the privilege level encoded by the MPP (M-mode Previous
    /// Privilege level) field to `value`.
    ///
    /// The MPP field is **WARL**.
    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        use bitvec::field::BitField;
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            // MPP is a WARL field, so ignore illegal values.
            return;
        };
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }

    /// Returns `true` if the MPRV (Modify PRiVilege) bit is set.
    pub fn mprv(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPRV]
    }

    /// Sets the MPRV (Modify PRiVilege) bit to `value`.
    pub fn set_mprv(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPRV, value);
    }

    /// Interrupt-enable bit for `mode` (xIE).
    pub fn ie(&self, mode: PrivilegeLevel) -> bool {
        match mode {
            PrivilegeLevel::User => self.uie(),
            PrivilegeLevel::Supervisor => self.sie(),
            PrivilegeLevel::Machine => self.mie(),
        }
    }

    /// Sets the interrupt-enable bit for `mode` (xIE).
    pub fn set_ie(&mut self, mode: PrivilegeLevel, value: bool) {
        match mode {
            PrivilegeLevel::User => self.set_uie(value),
            PrivilegeLevel::Supervisor => self.set_sie(value),
            PrivilegeLevel::Machine => self.set_mie(value),
        }
    }

    /// Previous-interrupt-enable bit for `mode` (xPIE).
    pub fn pie(&self, mode: PrivilegeLevel) -> bool {
        match mode {
            PrivilegeLevel::User => self.upie(),
            PrivilegeLevel::Supervisor => self.spie(),
            PrivilegeLevel::Machine => self.mpie(),
        }
    }

    /// Sets the previous-interrupt-enable bit for `mode` (xPIE).
    pub fn set_pie(&mut self, mode: PrivilegeLevel, value: bool) {
        match mode {
            PrivilegeLevel::User => self.set_upie(value),
            PrivilegeLevel::Supervisor => self.set_spie(value),
            PrivilegeLevel::Machine => self.set_mpie(value),
        }
    }
}

/// Bit indices into mstatus register.
mod idx {
    pub const UIE: usize = 0;
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const UPIE: usize = 4;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
    pub const MPRV: usize = 17;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpp_is_warl() {
        let mut status = Status::new();
        status.set_mpp(RawPrivilegeLevel::Supervisor);
        assert_eq!(status.mpp(), PrivilegeLevel::Supervisor);
        // Writing the reserved level leaves the field unchanged.
        status.set_mpp(RawPrivilegeLevel::Hypervisor);
        assert_eq!(status.mpp(), PrivilegeLevel::Supervisor);
        status.set_mpp(RawPrivilegeLevel::Machine);
        assert_eq!(status.mpp(), PrivilegeLevel::Machine);
    }

    #[test]
    fn spp_rejects_machine() {
        let mut status = Status::new();
        status.set_spp(RawPrivilegeLevel::Machine);
        assert_eq!(status.spp(), PrivilegeLevel::User);
        status.set_spp(RawPrivilegeLevel::Supervisor);
        assert_eq!(status.spp(), PrivilegeLevel::Supervisor);
    }

    #[test]
    fn mode_indexed_accessors_alias_the_fields() {
        let mut status = Status::new();
        status.set_ie(PrivilegeLevel::Supervisor, true);
        assert!(status.sie());
        status.set_pie(PrivilegeLevel::Machine, true);
        assert!(status.mpie());
        assert!(status.pie(PrivilegeLevel::Machine));
        assert!(!status.ie(PrivilegeLevel::Machine));
    }
}
