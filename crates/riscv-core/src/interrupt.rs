//! Interrupt pending/enable bit numbering shared by `mip`/`mie`/`sip`/`sie`.
//!
//! Grounded on `examples/developeruche-hybrid/crates/rv64-emu/src/reg/csr/mod.rs`
//! (`*SIP_BIT`/`*SIE_BIT` constants) and the priority order used by
//! `CPU::check_pending_interrupt` in `cpu/mod.rs`.

/// The six standard interrupt causes, ordered exactly as the priority rule in
/// spec.md §4.I requires: highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCause {
    MachineExternal,
    MachineSoftware,
    MachineTimer,
    SupervisorExternal,
    SupervisorSoftware,
    SupervisorTimer,
}

impl InterruptCause {
    /// Priority-ordered, highest first, matching `check_pending_interrupt`'s scan
    /// order (MEIP, MSIP, MTIP, SEIP, SSIP, STIP).
    pub const PRIORITY: [InterruptCause; 6] = [
        InterruptCause::MachineExternal,
        InterruptCause::MachineSoftware,
        InterruptCause::MachineTimer,
        InterruptCause::SupervisorExternal,
        InterruptCause::SupervisorSoftware,
        InterruptCause::SupervisorTimer,
    ];

    /// Bit position within `mip`/`mie`.
    pub const fn bit(self) -> u32 {
        match self {
            InterruptCause::SupervisorSoftware => 1,
            InterruptCause::MachineSoftware => 3,
            InterruptCause::SupervisorTimer => 5,
            InterruptCause::MachineTimer => 7,
            InterruptCause::SupervisorExternal => 9,
            InterruptCause::MachineExternal => 11,
        }
    }

    pub const fn mask(self) -> u64 {
        1u64 << self.bit()
    }

    /// The code stored into `xcause` with the interrupt flag (MSB) already set by
    /// the caller.
    pub const fn code(self) -> u64 {
        self.bit() as u64
    }

    /// Whether this cause targets M-mode (vs. S-mode) by construction; used when
    /// deciding delegability against `mideleg`.
    pub const fn is_machine_level(self) -> bool {
        matches!(
            self,
            InterruptCause::MachineExternal
                | InterruptCause::MachineSoftware
                | InterruptCause::MachineTimer
        )
    }

    /// Map a raw interrupt number (spec.md §6's `interrupt_up`/`interrupt_down`
    /// external interface, `{1, 3, 5, 7, 9, 11}`) to the cause whose `mip`/`mie`
    /// bit it names. Any other number defaults to `MachineExternal`, matching the
    /// "unrecognized interrupt numbers raise MEI" fallback named there.
    pub const fn from_bit(no: u32) -> InterruptCause {
        match no {
            1 => InterruptCause::SupervisorSoftware,
            3 => InterruptCause::MachineSoftware,
            5 => InterruptCause::SupervisorTimer,
            7 => InterruptCause::MachineTimer,
            9 => InterruptCause::SupervisorExternal,
            _ => InterruptCause::MachineExternal,
        }
    }
}
