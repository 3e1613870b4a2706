//! AMO, LR, and SC (spec.md §4.C/§4.H), grounded on the 0x2f opcode arm in
//! `examples/developeruche-hybrid/crates/rv64-emu/src/cpu/general_exec.rs`
//! (alignment checks) with reservation semantics from spec.md §4.C.

use crate::decode::{AmoOp, DecodeCache, StoreWidth};
use crate::exception::Exception;
use crate::hart::Hart;
use crate::memory::MemoryFacade;
use crate::mmu::AccessType;

pub fn exec(
    hart: &mut Hart,
    op: AmoOp,
    width: StoreWidth,
    addr: u64,
    rs2: u32,
    mem: &mut MemoryFacade,
    decode_cache: &mut DecodeCache,
) -> Result<u64, Exception> {
    let size = width.bytes() as u64;
    if !crate::bits::is_aligned(addr, size) {
        if op == AmoOp::Lr {
            mem.reservations.unregister(hart.id);
        }
        return Err(Exception::StoreAmoAddressMisaligned(addr));
    }

    match op {
        AmoOp::Lr => match hart.translate(addr, AccessType::Load, mem) {
            Ok(phys) => {
                let raw = mem.read(phys, width.bytes(), true);
                mem.reservations.register(hart.id, phys);
                Ok(sign_extend_width(raw, width))
            }
            Err(e) => {
                mem.reservations.unregister(hart.id);
                Err(e)
            }
        },
        AmoOp::Sc => unreachable!("SC is dispatched through exec_sc"),
        _ => {
            let phys = hart.translate(addr, AccessType::Store, mem)?;
            let old_raw = mem.read(phys, width.bytes(), true);
            let old = sign_extend_width(old_raw, width);
            let operand = hart.read_reg(rs2);
            let new = rmw(op, old, operand, width);
            mem.write(phys, width.bytes(), new, true);
            decode_cache.invalidate_page(phys & !(crate::memory::PAGE_SIZE - 1));
            Ok(old)
        }
    }
}

/// SC.W/D (spec.md §4.H/§7): unlike every other access, alignment and translation
/// are checked *after* the reservation is already gone — "always unregister
/// first" — and `rd` is written on every path, including the ones that also
/// raise a fault. Takes `rd` itself (rather than returning a value for the
/// caller to write back) so a failing translate/align still leaves `rd=1`
/// before the `?`-propagated exception reaches the caller.
pub fn exec_sc(
    hart: &mut Hart,
    width: StoreWidth,
    rd: u32,
    addr: u64,
    rs2: u32,
    mem: &mut MemoryFacade,
    decode_cache: &mut DecodeCache,
) -> Result<(), Exception> {
    let size = width.bytes() as u64;
    let reserved = mem.reservations.take(hart.id);

    let Some(reserved_phys) = reserved else {
        hart.write_reg(rd, 1);
        return Ok(());
    };

    if !crate::bits::is_aligned(addr, size) {
        hart.write_reg(rd, 1);
        return Err(Exception::StoreAmoAddressMisaligned(addr));
    }

    let phys = match hart.translate(addr, AccessType::Store, mem) {
        Ok(phys) => phys,
        Err(e) => {
            hart.write_reg(rd, 1);
            return Err(e);
        }
    };

    if phys == reserved_phys {
        let value = hart.read_reg(rs2);
        mem.write(phys, width.bytes(), value, true);
        decode_cache.invalidate_page(phys & !(crate::memory::PAGE_SIZE - 1));
        hart.write_reg(rd, 0);
    } else {
        hart.write_reg(rd, 1);
    }
    Ok(())
}

fn sign_extend_width(raw: u64, width: StoreWidth) -> u64 {
    match width {
        StoreWidth::Word => crate::bits::sign_extend(raw, 32),
        StoreWidth::Double => raw,
        _ => raw,
    }
}

fn rmw(op: AmoOp, old: u64, operand: u64, width: StoreWidth) -> u64 {
    let result = match op {
        AmoOp::Swap => operand,
        AmoOp::Add => old.wrapping_add(operand),
        AmoOp::Xor => old ^ operand,
        AmoOp::And => old & operand,
        AmoOp::Or => old | operand,
        AmoOp::Min => cmp_signed(width, old, operand, true),
        AmoOp::Max => cmp_signed(width, old, operand, false),
        AmoOp::Minu => old.min(operand),
        AmoOp::Maxu => old.max(operand),
        AmoOp::Lr | AmoOp::Sc => unreachable!("handled separately"),
    };
    match width {
        StoreWidth::Word => result & 0xffff_ffff,
        _ => result,
    }
}

fn cmp_signed(width: StoreWidth, a: u64, b: u64, want_min: bool) -> u64 {
    let (a, b) = match width {
        StoreWidth::Word => (a as i32 as i64, b as i32 as i64),
        _ => (a as i64, b as i64),
    };
    let chosen = if want_min { a.min(b) } else { a.max(b) };
    chosen as u64
}
