//! Instruction execution (spec.md §4.H), dispatched from the decoded-instruction
//! enum. Split into families the way
//! `examples/developeruche-hybrid/crates/rv64-emu/src/cpu/general_exec.rs`
//! groups its opcode match arms, but each family is now a free function over
//! explicit state instead of one `CPU::execute_general` monolith.

mod atomic;
mod base;
mod load_store;
mod mul_div;
mod system;

use crate::decode::DecodeCache;
use crate::decode::{AmoOp, DecodedInstr};
use crate::exception::{Exception, HaltReason};
use crate::hart::Hart;
use crate::memory::MemoryFacade;

impl Hart {
    pub(crate) fn execute(
        &mut self,
        instr: DecodedInstr,
        mem: &mut MemoryFacade,
        decode_cache: &mut DecodeCache,
    ) -> Result<Option<HaltReason>, Exception> {
        let mut next_pc = self.pc.wrapping_add(4);
        let mut halt = None;

        match instr {
            DecodedInstr::Lui { rd, imm } => self.write_reg(rd, imm),
            DecodedInstr::Auipc { rd, imm } => self.write_reg(rd, self.pc.wrapping_add(imm)),
            DecodedInstr::Jal { rd, imm } => {
                let target = self.pc.wrapping_add(imm);
                if target % 4 != 0 {
                    return Err(Exception::InstructionAddressMisaligned(target));
                }
                self.write_reg(rd, next_pc);
                next_pc = target;
            }
            DecodedInstr::Jalr { rd, rs1, imm } => {
                let target = self.read_reg(rs1).wrapping_add(imm) & !1u64;
                if target % 4 != 0 {
                    return Err(Exception::InstructionAddressMisaligned(target));
                }
                self.write_reg(rd, next_pc);
                next_pc = target;
            }
            DecodedInstr::Branch { op, rs1, rs2, imm } => {
                if base::branch_taken(self.config.xlen, op, self.read_reg(rs1), self.read_reg(rs2)) {
                    let target = self.pc.wrapping_add(imm);
                    if target % 4 != 0 {
                        return Err(Exception::InstructionAddressMisaligned(target));
                    }
                    next_pc = target;
                }
            }
            DecodedInstr::OpImm { op, rd, rs1, imm, word } => {
                let result = base::alu(self.config.xlen, op, self.read_reg(rs1), imm, word);
                self.write_reg(rd, result);
            }
            DecodedInstr::Op { op, rd, rs1, rs2, word } => {
                let result =
                    base::alu(self.config.xlen, op, self.read_reg(rs1), self.read_reg(rs2), word);
                self.write_reg(rd, result);
            }
            DecodedInstr::MulDiv { op, rd, rs1, rs2, word } => {
                let result = mul_div::exec(self.config.xlen, op, self.read_reg(rs1), self.read_reg(rs2), word);
                self.write_reg(rd, result);
            }
            DecodedInstr::Load { width, rd, rs1, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm);
                let value = load_store::load(self, width, addr, mem)?;
                self.write_reg(rd, value);
            }
            DecodedInstr::Store { width, rs1, rs2, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm);
                let value = self.read_reg(rs2);
                load_store::store(self, width, addr, value, mem, decode_cache)?;
            }
            DecodedInstr::Amo { op, width, rd, rs1, rs2, .. } => {
                let addr = self.read_reg(rs1);
                if op == AmoOp::Sc {
                    atomic::exec_sc(self, width, rd, addr, rs2, mem, decode_cache)?;
                } else {
                    let result = atomic::exec(self, op, width, addr, rs2, mem, decode_cache)?;
                    self.write_reg(rd, result);
                }
            }
            DecodedInstr::Fence | DecodedInstr::FenceI => { /* single-hart-per-step model: no-op */ }
            DecodedInstr::System(op) => match system::exec(self, op)? {
                system::SystemOutcome::Continue => {}
                system::SystemOutcome::Jump(target) => next_pc = target,
                system::SystemOutcome::Halt(reason) => halt = Some(reason),
            },
            DecodedInstr::Debug(op) => match system::exec_debug(self, op)? {
                system::SystemOutcome::Continue => {}
                system::SystemOutcome::Jump(target) => next_pc = target,
                system::SystemOutcome::Halt(reason) => halt = Some(reason),
            },
        }

        self.pc = next_pc & self.config.xlen.mask();
        Ok(halt)
    }
}
