//! Retired-instruction and cycle accounting, and the mcountinhibit register.

use bitvec::{order::Lsb0, view::BitView};

/// The mcountinhibit register is **WARL**.
#[derive(Debug, Clone)]
pub struct Mcountinhibit(u32);

impl Default for Mcountinhibit {
    fn default() -> Self {
        Self::new()
    }
}

impl Mcountinhibit {
    // Bit indices for the fields of the mcountinhibit register.
    // Index 1 is a read-only zero bit.
    const CY: usize = 0;
    const IR: usize = 2;

    pub fn new() -> Self {
        Self(0x0000_0000)
    }

    pub fn read(&self) -> u32 {
        self.0
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        // Bit 1 is always read-only 0.
        self.0 = self.0 & !mask | value & mask & !0b10;
    }

    pub fn cy(&self) -> bool {
        self.0.view_bits::<Lsb0>()[Self::CY]
    }

    pub fn set_cy(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(Self::CY, value);
    }

    pub fn ir(&self) -> bool {
        self.0.view_bits::<Lsb0>()[Self::IR]
    }

    pub fn set_ir(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(Self::IR, value);
    }
}

/// Base counts feeding the mcycle and minstret CSRs.
///
/// The instruction engine owns the fast path; this core only applies the
/// corrections trap entry and Debug mode call for. Trap entry bumps
/// `instret` for the instruction cut short by a trap that architecturally
/// still retires the preceding one, and EBREAK-into-debug with
/// `dcsr.stopcount` pre-counts what the debug inhibit would swallow.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub cycle: u64,
    pub instret: u64,
    pub inhibit: Mcountinhibit,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcountinhibit_bit_one_reads_zero() {
        let mut inhibit = Mcountinhibit::new();
        inhibit.write(!0, !0);
        assert_eq!(inhibit.read() & 0b10, 0);
        assert!(inhibit.cy());
        assert!(inhibit.ir());
        inhibit.write(0, 0b100);
        assert!(!inhibit.ir());
        assert!(inhibit.cy());
    }
}
