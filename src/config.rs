//! Static configuration of a hart, fixed at construction time.

use crate::hart::csr::VectorMode;
use crate::PrivilegeLevel;
use std::ops::BitOr;

/// Set of implemented ISA features, encoded as misa-style letter bits.
///
/// > The misa CSR is a WARL read-write register reporting the ISA supported
/// > by the hart.
///
/// Only the letters this core cares about are named; arbitrary letters can
/// still be composed with `|`. Feature presence is tested with
/// [`Isa::has`], which requires *all* bits of the probe to be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Isa(u32);

impl Isa {
    pub const NONE: Isa = Isa(0);
    /// Atomic extension.
    pub const A: Isa = Isa(1 << 0);
    /// Compressed instructions. Tested dynamically (misa.C is writable), so
    /// the hart keeps a current copy beside the configured one.
    pub const C: Isa = Isa(1 << 2);
    /// Base integer ISA.
    pub const I: Isa = Isa(1 << 8);
    /// Integer multiply/divide.
    pub const M: Isa = Isa(1 << 12);
    /// User-level interrupts.
    pub const N: Isa = Isa(1 << 13);
    /// Supervisor mode.
    pub const S: Isa = Isa(1 << 18);
    /// User mode.
    pub const U: Isa = Isa(1 << 20);
    /// Vector extension.
    pub const V: Isa = Isa(1 << 21);

    /// Returns `true` if all features in `required` are present in `self`.
    pub fn has(self, required: Isa) -> bool {
        self.0 & required.0 == required.0
    }
}

impl BitOr for Isa {
    type Output = Isa;
    fn bitor(self, rhs: Isa) -> Isa {
        Isa(self.0 | rhs.0)
    }
}

impl Default for Isa {
    /// RV64IMASU, the most common configuration in the test suite.
    fn default() -> Self {
        Isa::I | Isa::M | Isa::A | Isa::S | Isa::U
    }
}

/// How a debug-mode halt stalls the hart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DebugPolicy {
    /// Debug mode is not implemented; no debug ports are created.
    #[default]
    Disabled,
    /// Halt the hart through the scheduler while it is stalled in Debug mode.
    Halt,
    /// Deliver a synchronous interrupt instead of halting, so an external
    /// debug module gets control at the next instruction boundary.
    Interrupt,
}

/// Version of the RISC-V Privileged Architecture the hart implements.
///
/// Only behavior differences modeled by this core hang off of it: the
/// MPRV-clearing rule on xRET (1.12 and later) and support for legacy custom
/// vectored trap modes (before 1.10, the `tvec.MODE` field did not exist and
/// some implementations vectored in a vendor-specific way).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivVersion {
    V1_09,
    V1_10,
    #[default]
    V1_11,
    V1_12,
}

/// Per-mode trap vectoring override for legacy privileged-ISA versions.
///
/// Applied only while the raw `tvec.MODE` field reads zero; a nonzero MODE
/// always wins. With the default of `Direct` everywhere this is invisible.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomTrapModes {
    pub user: VectorMode,
    pub supervisor: VectorMode,
    pub machine: VectorMode,
}

impl CustomTrapModes {
    pub fn for_mode(&self, mode: PrivilegeLevel) -> VectorMode {
        match mode {
            PrivilegeLevel::User => self.user,
            PrivilegeLevel::Supervisor => self.supervisor,
            PrivilegeLevel::Machine => self.machine,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Implemented ISA features. Determines which exceptions and standard
    /// interrupts exist, which privilege modes are implemented, and the
    /// initial value of the hart's dynamic ISA state.
    pub isa: Isa,
    /// Address execution restarts from on reset.
    pub reset_address: u64,
    /// Address the hart vectors to on a non-maskable interrupt. NMI bypasses
    /// delegation, enables and the trap vector registers entirely.
    pub nmi_address: u64,
    /// Number of implementation-defined local interrupts. These occupy cause
    /// codes `16..16+n`; at most 48 of them participate in `mip`/`mie`.
    pub local_interrupt_count: u32,
    /// Mask of standard interrupt causes that this variant explicitly does
    /// not implement, even though the ISA features would imply them.
    pub unimplemented_interrupt_mask: u64,
    /// If `true`, external-interrupt claim-ID input ports are created, one
    /// per privilege mode. A nonzero claimed ID replaces the architectural
    /// cause code when the corresponding external interrupt is taken.
    pub external_interrupt_id: bool,
    /// Debug-mode implementation choice. See [`DebugPolicy`].
    pub debug: DebugPolicy,
    /// Implemented privileged-architecture version.
    pub priv_version: PrivVersion,
    /// If `true`, an illegal-instruction trap reports the faulting
    /// instruction word in `tval`; otherwise `tval` is zero.
    pub tval_ii_code: bool,
    /// If `true`, MRET/SRET/URET leave an active load reservation in place.
    /// Trap *entry* always clears it.
    pub xret_preserves_lr: bool,
    /// Legacy vectoring overrides, see [`CustomTrapModes`].
    pub custom_trap_modes: CustomTrapModes,
    /// Emit diagnostics for memory traps and for DRET outside Debug mode.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            isa: Isa::default(),
            reset_address: 0x0000_1000,
            nmi_address: 0x0000_0000,
            local_interrupt_count: 0,
            unimplemented_interrupt_mask: 0,
            external_interrupt_id: false,
            debug: DebugPolicy::Disabled,
            priv_version: PrivVersion::default(),
            tval_ii_code: false,
            xret_preserves_lr: false,
            custom_trap_modes: CustomTrapModes::default(),
            verbose: false,
        }
    }
}
