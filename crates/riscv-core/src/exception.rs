//! RISC-V exception and interrupt codes, as stored in `xcause`.
//!
//! The exception-code numbering and the MSB-as-interrupt-flag convention follow
//! `original_source/src/device/cpu/riscv_rv_ima/exception.h` (`rv_exc_t`); the two
//! simulator-only trap kinds (`EHalt`, `EDump`/`ETrace` are modelled as `HaltReason`,
//! not exceptions, since spec.md §7 says they "never fault").

use thiserror::Error;

/// A fault or request raised while executing or decoding an instruction.
///
/// Each variant that carries a `u64` records the value spec.md §7 assigns to it:
/// illegal instructions carry the raw encoding, every other fault carries the
/// offending virtual address.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    #[error("instruction address misaligned: {0:#x}")]
    InstructionAddressMisaligned(u64),
    #[error("instruction access fault: {0:#x}")]
    InstructionAccessFault(u64),
    #[error("illegal instruction: {0:#x}")]
    IllegalInstruction(u64),
    #[error("breakpoint")]
    Breakpoint,
    #[error("load address misaligned: {0:#x}")]
    LoadAddressMisaligned(u64),
    #[error("load access fault: {0:#x}")]
    LoadAccessFault(u64),
    #[error("store/amo address misaligned: {0:#x}")]
    StoreAmoAddressMisaligned(u64),
    #[error("store/amo access fault: {0:#x}")]
    StoreAmoAccessFault(u64),
    #[error("environment call from u-mode")]
    UmodeEnvironmentCall,
    #[error("environment call from s-mode")]
    SmodeEnvironmentCall,
    #[error("environment call from m-mode")]
    MmodeEnvironmentCall,
    #[error("instruction page fault: {0:#x}")]
    InstructionPageFault(u64),
    #[error("load page fault: {0:#x}")]
    LoadPageFault(u64),
    #[error("store/amo page fault: {0:#x}")]
    StoreAmoPageFault(u64),
}

impl Exception {
    /// The code stored into `xcause`. Bit 63 (interrupt flag) is always clear.
    pub fn code(&self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned(_) => 0,
            Exception::InstructionAccessFault(_) => 1,
            Exception::IllegalInstruction(_) => 2,
            Exception::Breakpoint => 3,
            Exception::LoadAddressMisaligned(_) => 4,
            Exception::LoadAccessFault(_) => 5,
            Exception::StoreAmoAddressMisaligned(_) => 6,
            Exception::StoreAmoAccessFault(_) => 7,
            Exception::UmodeEnvironmentCall => 8,
            Exception::SmodeEnvironmentCall => 9,
            Exception::MmodeEnvironmentCall => 11,
            Exception::InstructionPageFault(_) => 12,
            Exception::LoadPageFault(_) => 13,
            Exception::StoreAmoPageFault(_) => 15,
        }
    }

    /// The value to latch into `xtval`/`tval_next` on trap delivery.
    ///
    /// Illegal-instruction records the raw encoding; every other exception records
    /// the offending virtual address (spec.md §7).
    pub fn tval(&self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned(v)
            | Exception::InstructionAccessFault(v)
            | Exception::IllegalInstruction(v)
            | Exception::LoadAddressMisaligned(v)
            | Exception::LoadAccessFault(v)
            | Exception::StoreAmoAddressMisaligned(v)
            | Exception::StoreAmoAccessFault(v)
            | Exception::InstructionPageFault(v)
            | Exception::LoadPageFault(v)
            | Exception::StoreAmoPageFault(v) => *v,
            Exception::Breakpoint
            | Exception::UmodeEnvironmentCall
            | Exception::SmodeEnvironmentCall
            | Exception::MmodeEnvironmentCall => 0,
        }
    }

    /// Derive the page-fault variant matching an access kind, used by the page
    /// walker (spec.md §4.F) which raises the same shape of fault for instruction
    /// fetch, load, and store/AMO accesses.
    pub fn page_fault(kind: crate::mmu::AccessType, addr: u64) -> Exception {
        match kind {
            crate::mmu::AccessType::Instruction => Exception::InstructionPageFault(addr),
            crate::mmu::AccessType::Load => Exception::LoadPageFault(addr),
            crate::mmu::AccessType::Store => Exception::StoreAmoPageFault(addr),
        }
    }
}

/// A reason the hart stopped retiring instructions without a trap, surfaced to the
/// calling harness instead of handled internally (EBREAK's terminal-attached vs.
/// halt distinction from spec.md §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// A simulator-only `EHALT` instruction retired.
    Halt,
    /// EBREAK was hit with no debugger/terminal attached.
    Ebreak,
    /// A simulator-only `EDUMP`/`ETRACE*` instruction retired; the harness should
    /// render hart state but execution continues.
    Debug,
}
