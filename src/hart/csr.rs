//! Trap-owned CSR state: per-mode cause/epc/tval/tvec, the debug CSRs, and
//! the slice of vector state consulted by fault-only-first handling.

use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::config::Isa;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// Interrupt bit of the xcause registers (MXLEN = 64).
pub const CAUSE_INTERRUPT_BIT: u64 = 1 << 63;

/// Trap Vector Base Address Register (mtvec, stvec and utvec).
///
/// > The mtvec register is an MXLEN-bit WARL read/write register that holds
/// > trap vector configuration, consisting of a vector base address (BASE)
/// > and a vector mode (MODE).
///
/// > When MODE=Direct, all traps into machine mode cause the pc to be set to
/// > the address in the BASE field. When MODE=Vectored, all synchronous
/// > exceptions into machine mode cause the pc to be set to the address in
/// > the BASE field, whereas interrupts cause the pc to be set to the
/// > address in the BASE field plus four times the interrupt cause number.
#[derive(Debug, Clone)]
pub struct Tvec(u64);

impl Default for Tvec {
    fn default() -> Self {
        Self::new()
    }
}

impl Tvec {
    pub fn new() -> Self {
        Self(0x0000_0000)
    }

    pub fn read(&self) -> u64 {
        self.0
    }

    pub fn write(&mut self, value: u64, mask: u64) {
        let new_value = self.0 & !mask | value & mask;
        if new_value & 0b11 >= 2 {
            // Reserved MODE. Since this is a WARL register, we can set it to
            // any legal value here; preserve the old value.
        } else {
            self.0 = new_value;
        }
    }

    /// Returns the vector base address (stored in BASE field).
    ///
    /// Note that the returned address was encoded in the field right shifted
    /// by 2 bits.
    pub fn base(&self) -> u64 {
        self.0.view_bits::<Lsb0>()[2..].load_le::<u64>() << 2
    }

    /// Raw value of the MODE field. Zero selects either Direct mode or, on
    /// legacy privileged-ISA versions, a configured custom mode.
    pub fn mode_raw(&self) -> u8 {
        (self.0 & 0b11) as u8
    }
}

/// Trap vectoring behavior selected by a tvec register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VectorMode {
    #[default]
    Direct,
    Vectored,
}

/// The cause/epc/tval/tvec quadruple of one privilege mode.
#[derive(Debug, Clone, Default)]
pub struct TrapRegs {
    cause: u64,
    epc: u64,
    tval: u64,
    pub tvec: Tvec,
}

impl TrapRegs {
    /// Writable bits of the epc registers. Bit 0 reads as zero always;
    /// IALIGN=16 is assumed supported, so bit 1 is writable.
    const EPC_MASK: u64 = !0b1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_cause(&self) -> u64 {
        self.cause
    }

    pub fn write_cause(&mut self, value: u64, mask: u64) {
        self.cause = self.cause & !mask | value & mask;
    }

    /// Sets the Interrupt and ExceptionCode fields in one go, as trap entry
    /// does.
    pub fn set_cause(&mut self, interrupt: bool, code: u64) {
        self.cause = code & !CAUSE_INTERRUPT_BIT;
        if interrupt {
            self.cause |= CAUSE_INTERRUPT_BIT;
        }
    }

    pub fn cause_code(&self) -> u64 {
        self.cause & !CAUSE_INTERRUPT_BIT
    }

    pub fn cause_is_interrupt(&self) -> bool {
        self.cause & CAUSE_INTERRUPT_BIT != 0
    }

    pub fn read_epc(&self) -> u64 {
        self.epc
    }

    pub fn write_epc(&mut self, value: u64) {
        self.epc = value & Self::EPC_MASK;
    }

    pub fn read_tval(&self) -> u64 {
        self.tval
    }

    pub fn write_tval(&mut self, value: u64) {
        self.tval = value;
    }
}

/// Reason a hart is in Debug mode, as reported in `dcsr.cause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCause {
    /// No cause recorded; used when re-entering Debug mode because a trap
    /// was raised while already debugging.
    None = 0,
    Ebreak = 1,
    Trigger = 2,
    HaltReq = 3,
    Step = 4,
    ResetHaltReq = 5,
}

/// Debug Control and Status register.
///
/// Follows the layout of the RISC-V External Debug Support specification:
/// prv in bits 1:0, cause in bits 8:6, xdebugver reading as 4 (conforming
/// implementation). Fields the core does not model read as zero.
#[derive(Debug, Clone)]
pub struct Dcsr(u32);

impl Default for Dcsr {
    fn default() -> Self {
        Self::new()
    }
}

impl Dcsr {
    const XDEBUGVER: u32 = 4 << 28;

    pub fn new() -> Self {
        // prv resets to M-mode.
        Self(Self::XDEBUGVER | PrivilegeLevel::Machine as u32)
    }

    pub fn read(&self) -> u32 {
        self.0
    }

    /// Debugger write. cause, nmip and xdebugver are read-only; the
    /// remaining modeled fields are writable.
    pub fn write(&mut self, value: u32, mask: u32) {
        let mask_bits = mask.view_bits::<Lsb0>();
        let value_bits = value.view_bits::<Lsb0>();
        if mask_bits[idx::PRV] | mask_bits[idx::PRV + 1] {
            self.set_prv_raw(RawPrivilegeLevel::from_u2(
                value_bits[idx::PRV..(idx::PRV + 2)].load_le(),
            ));
        }
        if mask_bits[idx::STEP] {
            self.set_step(value_bits[idx::STEP]);
        }
        if mask_bits[idx::STOPCOUNT] {
            self.set_stopcount(value_bits[idx::STOPCOUNT]);
        }
        if mask_bits[idx::EBREAKU] {
            self.set_ebreaku(value_bits[idx::EBREAKU]);
        }
        if mask_bits[idx::EBREAKS] {
            self.set_ebreaks(value_bits[idx::EBREAKS]);
        }
        if mask_bits[idx::EBREAKM] {
            self.set_ebreakm(value_bits[idx::EBREAKM]);
        }
    }

    /// Privilege level the hart was in when Debug mode was entered, and the
    /// level it returns to on DRET.
    ///
    /// The prv field is **WARL**.
    pub fn prv(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(self.0.view_bits::<Lsb0>()[idx::PRV..(idx::PRV + 2)].load_le())
            .try_into()
            .unwrap()
    }

    pub fn set_prv(&mut self, value: PrivilegeLevel) {
        self.0.view_bits_mut::<Lsb0>()[idx::PRV..(idx::PRV + 2)].store_le(value as u8);
    }

    fn set_prv_raw(&mut self, value: RawPrivilegeLevel) {
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            // prv is a WARL field, so ignore the reserved level.
            return;
        };
        self.set_prv(value);
    }

    pub fn step(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::STEP]
    }

    pub fn set_step(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::STEP, value);
    }

    /// Mirror of the NMI input level; read-only for the debugger.
    pub fn nmip(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::NMIP]
    }

    pub fn set_nmip(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::NMIP, value);
    }

    pub fn cause(&self) -> DebugCause {
        match self.0.view_bits::<Lsb0>()[idx::CAUSE..(idx::CAUSE + 3)].load_le::<u8>() {
            1 => DebugCause::Ebreak,
            2 => DebugCause::Trigger,
            3 => DebugCause::HaltReq,
            4 => DebugCause::Step,
            5 => DebugCause::ResetHaltReq,
            _ => DebugCause::None,
        }
    }

    pub fn set_cause(&mut self, value: DebugCause) {
        self.0.view_bits_mut::<Lsb0>()[idx::CAUSE..(idx::CAUSE + 3)].store_le(value as u8);
    }

    /// Stop incrementing counters while in Debug mode.
    pub fn stopcount(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::STOPCOUNT]
    }

    pub fn set_stopcount(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::STOPCOUNT, value);
    }

    pub fn ebreaku(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::EBREAKU]
    }

    pub fn set_ebreaku(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::EBREAKU, value);
    }

    pub fn ebreaks(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::EBREAKS]
    }

    pub fn set_ebreaks(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::EBREAKS, value);
    }

    pub fn ebreakm(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::EBREAKM]
    }

    pub fn set_ebreakm(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::EBREAKM, value);
    }
}

/// Bit indices into the dcsr register.
mod idx {
    pub const PRV: usize = 0;
    pub const STEP: usize = 2;
    pub const NMIP: usize = 3;
    pub const CAUSE: usize = 6;
    pub const STOPCOUNT: usize = 10;
    pub const EBREAKU: usize = 12;
    pub const EBREAKS: usize = 13;
    pub const EBREAKM: usize = 15;
}

/// The slice of vector-extension state that memory-trap handling touches.
#[derive(Debug, Clone)]
pub struct VectorCsrs {
    /// Index of the first element still to be processed by the current
    /// vector instruction.
    pub vstart: u64,
    /// Current vector length.
    pub vl: u64,
    /// Fault-only-first mode is armed for the current instruction. A memory
    /// fault past element zero then clamps vl instead of trapping.
    pub first_fault: bool,
    /// Dispatch key for translated vector code; anything consuming vl must
    /// be re-keyed after a fault-only-first clamp.
    pub poly_key: u32,
    /// Writable bits of vstart. Zero on variants without the vector
    /// extension, forcing vstart to read as zero.
    vstart_mask: u64,
}

impl VectorCsrs {
    /// 16 writable vstart bits cover element indices for any supported VLEN.
    const VSTART_MASK: u64 = 0xFFFF;

    pub fn new(isa: Isa) -> Self {
        Self {
            vstart: 0,
            vl: 0,
            first_fault: false,
            poly_key: 0,
            vstart_mask: if isa.has(Isa::V) { Self::VSTART_MASK } else { 0 },
        }
    }

    /// Clamp vstart to its writable bits.
    pub fn mask_vstart(&mut self) {
        self.vstart &= self.vstart_mask;
    }

    pub fn set_vl(&mut self, vl: u64) {
        self.vl = vl;
    }

    pub fn refresh_poly_key(&mut self) {
        // vl is the only varying key component modeled by this core.
        self.poly_key = self.vl as u32;
    }
}
