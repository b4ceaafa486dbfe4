//! The hart itself: one instance of the trap-and-interrupt state machine.

pub mod csr;
mod counters;
mod debug;
pub mod fetch;
mod interrupts;
pub mod persist;
mod ports;
mod status;
mod trap;

use std::cell::OnceCell;
use std::fmt;

use crate::config::{Config, Isa};
use crate::exception::{describe, Trap, TrapInfo, LOCAL_INTERRUPT_BASE, TRAP_DESCRIPTORS};
use crate::host::Host;
use crate::PrivilegeLevel;

use csr::{Dcsr, TrapRegs, VectorCsrs};
pub use counters::{Counters, Mcountinhibit};
pub use interrupts::InterruptDiag;
use interrupts::InterruptState;
pub use ports::{Disable, NetValue, PortDesc, PortKind, PortTarget};
pub use status::Status;

/// Detail latched alongside an access-fault exception, reported to the host
/// through [`Hart::af_error_out`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessFaultKind {
    #[default]
    None,
    /// Fault raised by the bus (no slave, or slave error response).
    Bus,
    /// Fault raised by physical memory protection.
    Pmp,
}

/// Observer hooks for derived models layered on top of the base hart.
///
/// Notifications run in registration order. A derived model that defines
/// additional trap causes contributes them through [`extra_traps`], which is
/// consulted once, when the hart first enumerates its implemented traps;
/// register extensions before that point.
///
/// [`extra_traps`]: HartExtension::extra_traps
pub trait HartExtension {
    /// Called after all architectural side effects of a trap entry to
    /// `mode` have been committed.
    fn on_trap(&mut self, mode: PrivilegeLevel, trap: Trap) {
        let _ = (mode, trap);
    }

    /// Called on return from an exception handler of `mode` (xRET or
    /// leaving Debug mode).
    fn on_trap_return(&mut self, mode: PrivilegeLevel) {
        let _ = mode;
    }

    /// Called at the end of the architectural reset sequence.
    fn on_reset(&mut self) {}

    /// Additional trap causes this model defines.
    fn extra_traps(&self) -> Vec<TrapInfo> {
        Vec::new()
    }
}

#[derive(Default)]
struct Extensions(Vec<Box<dyn HartExtension>>);

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// A simulated RISC-V hart, reduced to the state machine that coordinates
/// traps, interrupts and Debug mode.
///
/// > From the perspective of software running in a given execution
/// > environment, a hart is a resource that autonomously fetches and
/// > executes RISC-V instructions within that execution environment.
///
/// The hart owns its half of the simulation contract: the host kernel calls
/// in through the net ports ([`Hart::write_net`]), the fetch gate
/// ([`Hart::check_fetch`]) and the timer callback
/// ([`Hart::step_timer_fired`]); the instruction engine calls in for ECALL,
/// EBREAK, xRET, DRET, WFI and memory faults. Everything the hart needs in
/// the other direction goes through its [`Host`].
pub struct Hart<H: Host> {
    host: H,
    config: Config,
    /// Dynamic ISA state; misa writes may differ from the configured set
    /// (most relevantly the C bit, which changes xRET address masking).
    current_isa: Isa,
    privilege: PrivilegeLevel,
    status: Status,
    /// Trap CSRs of U, S and M mode, in that order.
    regs: [TrapRegs; 3],
    dcsr: Dcsr,
    dpc: u64,
    vector: VectorCsrs,
    counters: Counters,
    ints: InterruptState,
    net_value: NetValue,
    net_ports: Vec<PortDesc>,
    disable: Disable,
    dm: bool,
    dm_stall: bool,
    step_timer_armed: bool,
    /// Address tag of an active load reservation, if any.
    exclusive_tag: Option<u64>,
    af_error_in: AccessFaultKind,
    af_error_out: AccessFaultKind,
    /// Call-site PC latched by the instruction engine for instruction-table
    /// extension sequences; used as EPC while a delay-slot offset is active.
    jump_base: u64,
    last_trap: Option<Trap>,
    /// Bit per implemented synchronous exception code.
    exception_mask: u64,
    /// Bit per implemented interrupt cause code (standard and local).
    interrupt_mask: u64,
    extensions: Extensions,
    trap_infos: OnceCell<Vec<TrapInfo>>,
}

impl<H: Host> Hart<H> {
    pub fn new(host: H, config: Config) -> Self {
        let mut exception_mask = 0u64;
        let mut interrupt_mask = 0u64;
        for desc in TRAP_DESCRIPTORS {
            if !config.isa.has(desc.requires) {
                continue;
            }
            match desc.trap {
                Trap::Exception(e) => exception_mask |= 1 << e.code(),
                Trap::Interrupt(code) => interrupt_mask |= 1 << code,
            }
        }
        interrupt_mask |= local_interrupt_mask(config.local_interrupt_count);
        interrupt_mask &= !config.unimplemented_interrupt_mask;

        let net_ports = ports::build_net_ports(&config, interrupt_mask);
        let ints = InterruptState::new(interrupt_count(&config));

        Self {
            host,
            current_isa: config.isa,
            privilege: PrivilegeLevel::Machine,
            status: Status::new(),
            regs: Default::default(),
            dcsr: Dcsr::new(),
            dpc: 0,
            vector: VectorCsrs::new(config.isa),
            counters: Counters::new(),
            ints,
            net_value: NetValue::default(),
            net_ports,
            disable: Disable::default(),
            dm: false,
            dm_stall: false,
            step_timer_armed: false,
            exclusive_tag: None,
            af_error_in: AccessFaultKind::None,
            af_error_out: AccessFaultKind::None,
            jump_base: 0,
            last_trap: None,
            exception_mask,
            interrupt_mask,
            extensions: Extensions::default(),
            trap_infos: OnceCell::new(),
            config,
        }
    }

    /// Register a derived-model observer. Must happen before the first call
    /// to [`trap_infos`](Self::trap_infos) for its extra traps to be seen.
    pub fn register_extension(&mut self, extension: Box<dyn HartExtension>) {
        debug_assert!(
            self.trap_infos.get().is_none(),
            "extension registered after the trap enumeration was built"
        );
        self.extensions.0.push(extension);
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Provide a read-only view of this hart's configuration.
    ///
    /// It is not possible to modify the configuration after creation.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the current privilege mode the hart is in.
    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    pub(crate) fn set_privilege(&mut self, mode: PrivilegeLevel) {
        self.privilege = mode;
    }

    /// Returns `true` while the hart is in Debug mode. Debug mode implies
    /// M-mode privilege and suppresses all interrupts.
    pub fn debug_mode(&self) -> bool {
        self.dm
    }

    pub fn debug_stalled(&self) -> bool {
        self.dm_stall
    }

    /// Reasons the hart is currently not being scheduled.
    pub fn disable(&self) -> Disable {
        self.disable
    }

    /// Dynamic ISA state, as reflected by misa.
    pub fn current_isa(&self) -> Isa {
        self.current_isa
    }

    /// Update the dynamic ISA state after a misa write.
    pub fn set_current_isa(&mut self, isa: Isa) {
        self.current_isa = isa;
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }

    /// Trap CSRs (cause, epc, tval, tvec) of the given privilege mode.
    pub fn trap_regs(&self, mode: PrivilegeLevel) -> &TrapRegs {
        &self.regs[mode_index(mode)]
    }

    pub fn trap_regs_mut(&mut self, mode: PrivilegeLevel) -> &mut TrapRegs {
        &mut self.regs[mode_index(mode)]
    }

    pub fn dcsr(&self) -> &Dcsr {
        &self.dcsr
    }

    pub fn dcsr_mut(&mut self) -> &mut Dcsr {
        &mut self.dcsr
    }

    /// Debug program counter: the address execution resumes at on DRET.
    pub fn dpc(&self) -> u64 {
        self.dpc
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    pub fn vector(&self) -> &VectorCsrs {
        &self.vector
    }

    pub fn vector_mut(&mut self) -> &mut VectorCsrs {
        &mut self.vector
    }

    /// The most recently taken trap, cleared by reset and NMI.
    pub fn last_trap(&self) -> Option<Trap> {
        self.last_trap
    }

    pub fn exclusive_tag(&self) -> Option<u64> {
        self.exclusive_tag
    }

    /// Record an active load reservation. Any trap entry clears it; xRET
    /// clears it unless configured to preserve it.
    pub fn set_exclusive_tag(&mut self, tag: Option<u64>) {
        self.exclusive_tag = tag;
    }

    /// Latch access-fault detail for the access currently in flight.
    pub fn set_af_error_in(&mut self, kind: AccessFaultKind) {
        self.af_error_in = kind;
    }

    /// Access-fault detail of the last taken trap; [`AccessFaultKind::None`]
    /// unless that trap was an access fault.
    pub fn af_error_out(&self) -> AccessFaultKind {
        self.af_error_out
    }

    /// Latch the call-site PC of an instruction-table extension sequence.
    pub fn set_jump_base(&mut self, pc: u64) {
        self.jump_base = pc;
    }

    /// Returns `true` if this variant implements the given trap.
    pub fn implements(&self, trap: Trap) -> bool {
        match trap {
            Trap::Exception(e) => self.exception_mask & (1 << e.code()) != 0,
            Trap::Interrupt(code) if code < 64 => self.interrupt_mask & (1 << code) != 0,
            Trap::Interrupt(_) => false,
        }
    }

    pub(crate) fn interrupt_mask(&self) -> u64 {
        self.interrupt_mask
    }

    pub(crate) fn exception_mask(&self) -> u64 {
        self.exception_mask
    }

    /// All traps implemented on this variant: the standard descriptors
    /// filtered by ISA, derived-model contributions in registration order,
    /// then one entry per local interrupt. Built once, on first call.
    pub fn trap_infos(&self) -> &[TrapInfo] {
        self.trap_infos.get_or_init(|| {
            let mut all: Vec<TrapInfo> = TRAP_DESCRIPTORS
                .iter()
                .filter(|desc| self.implements(desc.trap))
                .map(|desc| TrapInfo {
                    name: desc.name.into(),
                    trap: desc.trap,
                    description: desc.description.into(),
                })
                .collect();
            for ext in &self.extensions.0 {
                all.extend(ext.extra_traps());
            }
            for i in 0..self.config.local_interrupt_count {
                let trap = Trap::local_interrupt(i);
                all.push(TrapInfo {
                    name: format!("LocalInterrupt{i}").into(),
                    trap,
                    description: describe(trap).into_owned().into(),
                });
            }
            all
        })
    }

    /// Enumeration entry of the most recently taken trap, if any.
    pub fn last_trap_info(&self) -> Option<&TrapInfo> {
        let last = self.last_trap?;
        self.trap_infos().iter().find(|info| info.trap == last)
    }

    /// Effective instret inhibit: mcountinhibit.IR, or Debug mode with
    /// dcsr.stopcount set.
    pub(crate) fn inhibit_instret(&self) -> bool {
        self.counters.inhibit.ir() || (self.dm && self.dcsr.stopcount())
    }

    /// Effective cycle inhibit, analogous to
    /// [`inhibit_instret`](Self::inhibit_instret).
    pub(crate) fn inhibit_cycle(&self) -> bool {
        self.counters.inhibit.cy() || (self.dm && self.dcsr.stopcount())
    }

    /// Reset all CSR state owned by this core. Latched net inputs and the
    /// external pending bits survive; they are signals, not registers.
    pub(crate) fn reset_csrs(&mut self) {
        self.status = Status::new();
        self.regs = Default::default();
        self.dcsr = Dcsr::new();
        self.dpc = 0;
        self.vector = VectorCsrs::new(self.config.isa);
        self.counters.inhibit = Mcountinhibit::new();
        self.current_isa = self.config.isa;
        self.ints.reset_csrs();
        self.exclusive_tag = None;
        self.af_error_in = AccessFaultKind::None;
        self.af_error_out = AccessFaultKind::None;
    }

    pub(crate) fn notify_trap(&mut self, mode: PrivilegeLevel, trap: Trap) {
        let mut exts = std::mem::take(&mut self.extensions);
        for ext in exts.0.iter_mut() {
            ext.on_trap(mode, trap);
        }
        self.extensions = exts;
    }

    pub(crate) fn notify_trap_return(&mut self, mode: PrivilegeLevel) {
        let mut exts = std::mem::take(&mut self.extensions);
        for ext in exts.0.iter_mut() {
            ext.on_trap_return(mode);
        }
        self.extensions = exts;
    }

    pub(crate) fn notify_reset(&mut self) {
        let mut exts = std::mem::take(&mut self.extensions);
        for ext in exts.0.iter_mut() {
            ext.on_reset();
        }
        self.extensions = exts;
    }

    /// Lowest implemented privilege mode.
    pub(crate) fn min_mode(&self) -> PrivilegeLevel {
        if self.config.isa.has(Isa::U) {
            PrivilegeLevel::User
        } else {
            PrivilegeLevel::Machine
        }
    }

    pub(crate) fn has_mode(&self, mode: PrivilegeLevel) -> bool {
        match mode {
            PrivilegeLevel::User => self.config.isa.has(Isa::U),
            PrivilegeLevel::Supervisor => self.config.isa.has(Isa::S),
            PrivilegeLevel::Machine => true,
        }
    }
}

/// Total number of interrupt cause codes, standard and local.
fn interrupt_count(config: &Config) -> u32 {
    LOCAL_INTERRUPT_BASE + config.local_interrupt_count
}

/// Mask of implemented local interrupts within the 64-bit cause space. At
/// most 48 local causes fit above the 16 standard ones.
fn local_interrupt_mask(local_count: u32) -> u64 {
    let shift = local_count.min(48);
    ((1u64 << shift) - 1) << LOCAL_INTERRUPT_BASE
}

fn mode_index(mode: PrivilegeLevel) -> usize {
    match mode {
        PrivilegeLevel::User => 0,
        PrivilegeLevel::Supervisor => 1,
        PrivilegeLevel::Machine => 2,
    }
}
