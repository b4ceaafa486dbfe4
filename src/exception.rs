//! The architectural trap code space and the static descriptor table.

use crate::config::Isa;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a naturally aligned boundary in memory.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved, unimplemented or disabled instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub fn code(&self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreOrAmoAddressMisaligned => 6,
            Self::StoreOrAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreOrAmoPageFault => 15,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Interrupt {
    UserSoftwareInterrupt,
    SupervisorSoftwareInterrupt,
    MachineSoftwareInterrupt,
    UserTimerInterrupt,
    SupervisorTimerInterrupt,
    MachineTimerInterrupt,
    UserExternalInterrupt,
    SupervisorExternalInterrupt,
    MachineExternalInterrupt,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt.
    pub fn code(&self) -> u32 {
        match self {
            Self::UserSoftwareInterrupt => 0,
            Self::SupervisorSoftwareInterrupt => 1,
            Self::MachineSoftwareInterrupt => 3,
            Self::UserTimerInterrupt => 4,
            Self::SupervisorTimerInterrupt => 5,
            Self::MachineTimerInterrupt => 7,
            Self::UserExternalInterrupt => 8,
            Self::SupervisorExternalInterrupt => 9,
            Self::MachineExternalInterrupt => 11,
        }
    }
}

/// First cause code of the implementation-defined local interrupts.
pub const LOCAL_INTERRUPT_BASE: u32 = 16;

/// Cause codes of the per-mode external interrupts (`8..=11`, including the
/// hypervisor slot).
pub(crate) fn is_external_interrupt(code: u32) -> bool {
    (Interrupt::UserExternalInterrupt.code()..=Interrupt::MachineExternalInterrupt.code())
        .contains(&code)
}

/// A trap: either a synchronous exception or an interrupt. The two share the
/// cause code space, disambiguated by the Interrupt bit of `xcause`.
///
/// Interrupts are carried by cause code rather than by [`Interrupt`] variant
/// so local interrupts (codes [`LOCAL_INTERRUPT_BASE`] and up) fit the same
/// type.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Trap {
    Exception(Exception),
    Interrupt(u32),
}

impl Trap {
    /// The trap for local interrupt number `index`.
    pub fn local_interrupt(index: u32) -> Self {
        Trap::Interrupt(LOCAL_INTERRUPT_BASE + index)
    }

    pub fn is_interrupt(self) -> bool {
        matches!(self, Trap::Interrupt(_))
    }

    /// Architectural cause code, without the Interrupt bit.
    pub fn code(self) -> u32 {
        match self {
            Trap::Exception(e) => e.code(),
            Trap::Interrupt(code) => code,
        }
    }
}

impl From<Exception> for Trap {
    fn from(e: Exception) -> Self {
        Trap::Exception(e)
    }
}

impl From<Interrupt> for Trap {
    fn from(i: Interrupt) -> Self {
        Trap::Interrupt(i.code())
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match descriptor_for(*self) {
            Some(desc) => f.write_str(desc.name),
            None => match *self {
                Trap::Interrupt(code) if code >= LOCAL_INTERRUPT_BASE => {
                    write!(f, "LocalInterrupt{}", code - LOCAL_INTERRUPT_BASE)
                }
                Trap::Interrupt(code) => write!(f, "Interrupt{code}"),
                Trap::Exception(e) => write!(f, "{e:?}"),
            },
        }
    }
}

/// Static descriptor of one architectural trap.
///
/// `requires` names the ISA features that must all be present for this trap
/// to exist on a given variant; descriptors failing the test are excluded
/// from the hart's implemented set and from its port catalogue.
#[derive(Debug, Clone, Copy)]
pub struct TrapDescriptor {
    pub name: &'static str,
    pub trap: Trap,
    pub requires: Isa,
    pub description: &'static str,
}

/// The standard synchronous exceptions and standard interrupts defined by
/// the Privileged Architecture. Append-only; order is the enumeration order
/// reported to the host.
pub static TRAP_DESCRIPTORS: &[TrapDescriptor] = &[
    //
    // Exceptions
    //
    TrapDescriptor {
        name: "InstructionAddressMisaligned",
        trap: Trap::Exception(Exception::InstructionAddressMisaligned),
        requires: Isa::NONE,
        description: "Fetch from unaligned address",
    },
    TrapDescriptor {
        name: "InstructionAccessFault",
        trap: Trap::Exception(Exception::InstructionAccessFault),
        requires: Isa::NONE,
        description: "No access permission for fetch",
    },
    TrapDescriptor {
        name: "IllegalInstruction",
        trap: Trap::Exception(Exception::IllegalInstruction),
        requires: Isa::NONE,
        description: "Undecoded, unimplemented or disabled instruction",
    },
    TrapDescriptor {
        name: "Breakpoint",
        trap: Trap::Exception(Exception::Breakpoint),
        requires: Isa::NONE,
        description: "EBREAK instruction executed",
    },
    TrapDescriptor {
        name: "LoadAddressMisaligned",
        trap: Trap::Exception(Exception::LoadAddressMisaligned),
        requires: Isa::NONE,
        description: "Load from unaligned address",
    },
    TrapDescriptor {
        name: "LoadAccessFault",
        trap: Trap::Exception(Exception::LoadAccessFault),
        requires: Isa::NONE,
        description: "No access permission for load",
    },
    TrapDescriptor {
        name: "StoreAMOAddressMisaligned",
        trap: Trap::Exception(Exception::StoreOrAmoAddressMisaligned),
        requires: Isa::NONE,
        description: "Store/atomic memory operation at unaligned address",
    },
    TrapDescriptor {
        name: "StoreAMOAccessFault",
        trap: Trap::Exception(Exception::StoreOrAmoAccessFault),
        requires: Isa::NONE,
        description: "No access permission for store/atomic memory operation",
    },
    TrapDescriptor {
        name: "EnvironmentCallFromUMode",
        trap: Trap::Exception(Exception::EnvironmentCallFromUMode),
        requires: Isa::U,
        description: "ECALL instruction executed in User mode",
    },
    TrapDescriptor {
        name: "EnvironmentCallFromSMode",
        trap: Trap::Exception(Exception::EnvironmentCallFromSMode),
        requires: Isa::S,
        description: "ECALL instruction executed in Supervisor mode",
    },
    TrapDescriptor {
        name: "EnvironmentCallFromMMode",
        trap: Trap::Exception(Exception::EnvironmentCallFromMMode),
        requires: Isa::NONE,
        description: "ECALL instruction executed in Machine mode",
    },
    TrapDescriptor {
        name: "InstructionPageFault",
        trap: Trap::Exception(Exception::InstructionPageFault),
        requires: Isa::NONE,
        description: "Page fault at fetch address",
    },
    TrapDescriptor {
        name: "LoadPageFault",
        trap: Trap::Exception(Exception::LoadPageFault),
        requires: Isa::NONE,
        description: "Page fault at load address",
    },
    TrapDescriptor {
        name: "StoreAMOPageFault",
        trap: Trap::Exception(Exception::StoreOrAmoPageFault),
        requires: Isa::NONE,
        description: "Page fault at store/atomic memory operation address",
    },
    //
    // Standard interrupts
    //
    TrapDescriptor {
        name: "USWInterrupt",
        trap: Trap::Interrupt(0),
        requires: Isa::N,
        description: "User software interrupt",
    },
    TrapDescriptor {
        name: "SSWInterrupt",
        trap: Trap::Interrupt(1),
        requires: Isa::S,
        description: "Supervisor software interrupt",
    },
    TrapDescriptor {
        name: "MSWInterrupt",
        trap: Trap::Interrupt(3),
        requires: Isa::NONE,
        description: "Machine software interrupt",
    },
    TrapDescriptor {
        name: "UTimerInterrupt",
        trap: Trap::Interrupt(4),
        requires: Isa::N,
        description: "User timer interrupt",
    },
    TrapDescriptor {
        name: "STimerInterrupt",
        trap: Trap::Interrupt(5),
        requires: Isa::S,
        description: "Supervisor timer interrupt",
    },
    TrapDescriptor {
        name: "MTimerInterrupt",
        trap: Trap::Interrupt(7),
        requires: Isa::NONE,
        description: "Machine timer interrupt",
    },
    TrapDescriptor {
        name: "UExternalInterrupt",
        trap: Trap::Interrupt(8),
        requires: Isa::N,
        description: "User external interrupt",
    },
    TrapDescriptor {
        name: "SExternalInterrupt",
        trap: Trap::Interrupt(9),
        requires: Isa::S,
        description: "Supervisor external interrupt",
    },
    TrapDescriptor {
        name: "MExternalInterrupt",
        trap: Trap::Interrupt(11),
        requires: Isa::NONE,
        description: "Machine external interrupt",
    },
];

pub(crate) fn descriptor_for(trap: Trap) -> Option<&'static TrapDescriptor> {
    TRAP_DESCRIPTORS.iter().find(|desc| desc.trap == trap)
}

/// Human-readable description of a trap, synthesizing one for local
/// interrupts.
pub(crate) fn describe(trap: Trap) -> Cow<'static, str> {
    match descriptor_for(trap) {
        Some(desc) => Cow::Borrowed(desc.description),
        None => match trap {
            Trap::Interrupt(code) if code >= LOCAL_INTERRUPT_BASE => {
                Cow::Owned(format!("Local interrupt {}", code - LOCAL_INTERRUPT_BASE))
            }
            other => Cow::Owned(format!("{other}")),
        },
    }
}

/// One entry of a hart's implemented-trap enumeration, as reported to the
/// host. Standard entries borrow from [`TRAP_DESCRIPTORS`]; local-interrupt
/// and extension entries own their strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapInfo {
    pub name: Cow<'static, str>,
    pub trap: Trap,
    pub description: Cow<'static, str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_privileged_architecture() {
        assert_eq!(Exception::IllegalInstruction.code(), 2);
        assert_eq!(Exception::EnvironmentCallFromMMode.code(), 11);
        assert_eq!(Exception::StoreOrAmoPageFault.code(), 15);
        assert_eq!(Interrupt::MachineTimerInterrupt.code(), 7);
        assert_eq!(Interrupt::MachineExternalInterrupt.code(), 11);
        assert_eq!(Trap::local_interrupt(3).code(), 19);
    }

    #[test]
    fn descriptor_table_is_consistent() {
        // Every descriptor's name must resolve back to its own trap.
        for desc in TRAP_DESCRIPTORS {
            assert_eq!(descriptor_for(desc.trap).unwrap().name, desc.name);
        }
        // 14 standard exceptions and 9 standard interrupts.
        let (ints, excs): (Vec<&TrapDescriptor>, Vec<&TrapDescriptor>) = TRAP_DESCRIPTORS
            .iter()
            .partition(|d| d.trap.is_interrupt());
        assert_eq!(excs.len(), 14);
        assert_eq!(ints.len(), 9);
    }

    #[test]
    fn local_interrupts_synthesize_descriptions() {
        assert_eq!(describe(Trap::local_interrupt(5)), "Local interrupt 5");
        assert_eq!(format!("{}", Trap::local_interrupt(5)), "LocalInterrupt5");
        assert_eq!(
            describe(Trap::Interrupt(7)),
            "Machine timer interrupt"
        );
    }
}
