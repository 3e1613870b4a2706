//! SYSTEM-opcode instructions (ECALL/EBREAK/MRET/SRET/WFI/SFENCE.VMA/CSR*) and the
//! simulator-only debug instructions. Grounded on the SYSTEM arm of
//! `examples/developeruche-hybrid/crates/rv64-emu/src/cpu/general_exec.rs`
//! (MRET/SRET xIE/xPIE/xPP bookkeeping at lines 1812-1856); MRET/SRET themselves
//! are delegated to `crate::trap::return_from_trap` since spec.md §4.I makes trap
//! return part of trap delivery, not a bespoke SYSTEM-arm implementation.

use crate::csr::numbers::*;
use crate::decode::{DebugOp, SystemOp};
use crate::exception::{Exception, HaltReason};
use crate::hart::{Hart, Mode};

pub enum SystemOutcome {
    Continue,
    Jump(u64),
    Halt(HaltReason),
}

pub fn exec(hart: &mut Hart, op: SystemOp) -> Result<SystemOutcome, Exception> {
    match op {
        SystemOp::Ecall => Err(match hart.mode {
            Mode::User => Exception::UmodeEnvironmentCall,
            Mode::Supervisor => Exception::SmodeEnvironmentCall,
            Mode::Machine => Exception::MmodeEnvironmentCall,
        }),
        // No exception is raised (spec.md §4.H): whether this becomes an
        // interactive break or a hard halt is a call only the harness attached
        // to the hart can make (terminal/debugger presence is an external
        // collaborator, spec.md §1), so the core just surfaces the event.
        SystemOp::Ebreak => Ok(SystemOutcome::Halt(HaltReason::Ebreak)),
        SystemOp::Mret => Ok(SystemOutcome::Jump(crate::trap::return_from_trap(hart, Mode::Machine))),
        SystemOp::Sret => {
            // mstatus.TSR traps SRET out of S-mode back to M-mode, even though
            // S-mode is otherwise the instruction's natural privilege (spec.md §4.H).
            if hart.mode == Mode::Supervisor && field(hart.csr.read_mstatus(), MSTATUS_TSR) != 0 {
                return Err(Exception::IllegalInstruction(0));
            }
            Ok(SystemOutcome::Jump(crate::trap::return_from_trap(hart, Mode::Supervisor)))
        }
        SystemOp::Wfi => {
            // U-mode can never execute WFI; S-mode can only when mstatus.TW is
            // clear (spec.md §4.H "Wait For Interrupt").
            if hart.mode == Mode::User
                || (hart.mode == Mode::Supervisor && field(hart.csr.read_mstatus(), MSTATUS_TW) != 0)
            {
                return Err(Exception::IllegalInstruction(0));
            }
            hart.idle = true;
            Ok(SystemOutcome::Continue)
        }
        SystemOp::SfenceVma { rs1, rs2 } => {
            if hart.mode == Mode::User
                || (hart.mode == Mode::Supervisor && field(hart.csr.read_mstatus(), MSTATUS_TVM) != 0)
            {
                return Err(Exception::IllegalInstruction(0));
            }
            let asid = if rs2 == 0 { None } else { Some(hart.read_reg(rs2) as u32) };
            let addr = if rs1 == 0 { None } else { Some(hart.read_reg(rs1)) };
            match (addr, asid) {
                (None, None) => hart.tlb.flush_all(),
                (None, Some(asid)) => hart.tlb.flush_by_asid(asid),
                (Some(addr), None) => hart.tlb.flush_by_addr(addr),
                (Some(addr), Some(asid)) => hart.tlb.flush_by_asid_and_addr(addr, asid),
            }
            Ok(SystemOutcome::Continue)
        }
        SystemOp::CsrRw { rd, rs1, csr } => {
            let operand = hart.read_reg(rs1);
            csr_op(hart, rd, csr, |_old, new| new, operand, true)
        }
        SystemOp::CsrRs { rd, rs1, csr } => {
            let write_back = rs1 != 0;
            let operand = hart.read_reg(rs1);
            csr_op(hart, rd, csr, |old, mask| old | mask, operand, write_back)
        }
        SystemOp::CsrRc { rd, rs1, csr } => {
            let write_back = rs1 != 0;
            let operand = hart.read_reg(rs1);
            csr_op(hart, rd, csr, |old, mask| old & !mask, operand, write_back)
        }
        SystemOp::CsrRwi { rd, imm, csr } => csr_op(hart, rd, csr, |_old, new| new, imm as u64, true),
        SystemOp::CsrRsi { rd, imm, csr } => {
            csr_op(hart, rd, csr, |old, mask| old | mask, imm as u64, imm != 0)
        }
        SystemOp::CsrRci { rd, imm, csr } => {
            csr_op(hart, rd, csr, |old, mask| old & !mask, imm as u64, imm != 0)
        }
    }
}

/// Shared CSRRx body: read-modify-write with the exact "read old value even when
/// `rd == x0`, write back only when the instruction's semantics call for it"
/// rule the RISC-V spec requires (e.g. `CSRRS x0, csr, rs1` must not write).
fn csr_op(
    hart: &mut Hart,
    rd: u32,
    csr: u16,
    combine: impl Fn(u64, u64) -> u64,
    operand: u64,
    write_back: bool,
) -> Result<SystemOutcome, Exception> {
    let old = hart.csr.read(csr, hart.mode)?;
    if write_back {
        let new = combine(old, operand);
        hart.csr.write(csr, hart.mode, new)?;
        if csr == crate::csr::numbers::SATP {
            hart.tlb.flush_all();
        }
    }
    hart.write_reg(rd, old);
    Ok(SystemOutcome::Continue)
}

pub fn exec_debug(hart: &mut Hart, op: DebugOp) -> Result<SystemOutcome, Exception> {
    match op {
        DebugOp::Halt => Ok(SystemOutcome::Halt(HaltReason::Halt)),
        DebugOp::Dump | DebugOp::Trace => Ok(SystemOutcome::Halt(HaltReason::Debug)),
        DebugOp::CsrRead { csr } => {
            // Read-only, ignores the result: the harness observes state through
            // its own inspection API, not through a register side effect.
            let _ = hart.csr.read(csr, Mode::Machine);
            Ok(SystemOutcome::Continue)
        }
    }
}
