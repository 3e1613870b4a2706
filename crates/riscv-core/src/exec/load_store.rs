//! Loads and stores: address alignment, translation, and the sentinel-on-fault
//! vs. access-fault policy gated by `HartConfig::strict_memory_faults` (spec.md
//! §4.H, §9 REDESIGN FLAG). Grounded on the 0x03/0x23 opcode arms in
//! `examples/developeruche-hybrid/crates/rv64-emu/src/cpu/general_exec.rs`.

use crate::bits::{sign_extend, zero_extend};
use crate::decode::{DecodeCache, LoadWidth, StoreWidth};
use crate::exception::Exception;
use crate::hart::Hart;
use crate::memory::{MemoryFacade, MTIMECMP_BASE, MTIME_ADDR};
use crate::mmu::AccessType;

pub fn load(hart: &mut Hart, width: LoadWidth, addr: u64, mem: &mut MemoryFacade) -> Result<u64, Exception> {
    let size = width.bytes() as u64;
    if !crate::bits::is_aligned(addr, size) {
        return Err(Exception::LoadAddressMisaligned(addr));
    }
    let phys = hart.translate(addr, AccessType::Load, mem)?;
    if let Some(raw) = mmio_timer_read(hart, phys, width.bytes()) {
        return Ok(if width.is_signed() {
            sign_extend(raw, (width.bytes() as u32) * 8)
        } else {
            zero_extend(raw, (width.bytes() as u32) * 8)
        });
    }
    let raw = mem.read(phys, width.bytes(), true);
    Ok(if width.is_signed() {
        sign_extend(raw, (width.bytes() as u32) * 8)
    } else {
        zero_extend(raw, (width.bytes() as u32) * 8)
    })
}

pub fn store(
    hart: &mut Hart,
    width: StoreWidth,
    addr: u64,
    value: u64,
    mem: &mut MemoryFacade,
    decode_cache: &mut DecodeCache,
) -> Result<(), Exception> {
    let size = width.bytes() as u64;
    if !crate::bits::is_aligned(addr, size) {
        return Err(Exception::StoreAmoAddressMisaligned(addr));
    }
    let phys = hart.translate(addr, AccessType::Store, mem)?;
    if mmio_timer_write(hart, phys, width.bytes(), value) {
        return Ok(());
    }
    let ok = mem.write(phys, width.bytes(), value, true);
    if ok {
        decode_cache.invalidate_page(phys & !(crate::memory::PAGE_SIZE - 1));
    } else if hart.config.strict_memory_faults {
        return Err(Exception::StoreAmoAccessFault(addr));
    }
    Ok(())
}

/// Sub-register offset (in bits) of `phys` within the 8-byte register at
/// `reg_addr`, if `[phys, phys+size)` lies entirely within it — matching the
/// `EXTRACT_BITS`/`WRITE_BITS` narrow-access handling
/// `original_source/src/device/cpu/riscv_rv32ima/cpu.c`'s MTIME/MTIMECMP
/// interception applies for 1/2/4-byte accesses to the 8-byte register.
fn sub_register_shift(phys: u64, size: u8, reg_addr: u64) -> Option<u32> {
    if phys >= reg_addr && phys + size as u64 <= reg_addr + 8 {
        Some(((phys - reg_addr) * 8) as u32)
    } else {
        None
    }
}

fn mmio_timer_read(hart: &Hart, phys: u64, size: u8) -> Option<u64> {
    let mtimecmp_addr = MTIMECMP_BASE + 8 * hart.id as u64;
    if let Some(shift) = sub_register_shift(phys, size, MTIME_ADDR) {
        return Some((hart.csr.mtime() >> shift) & size_mask(size));
    }
    if let Some(shift) = sub_register_shift(phys, size, mtimecmp_addr) {
        return Some((hart.csr.mtimecmp() >> shift) & size_mask(size));
    }
    None
}

fn mmio_timer_write(hart: &mut Hart, phys: u64, size: u8, value: u64) -> bool {
    let mtimecmp_addr = MTIMECMP_BASE + 8 * hart.id as u64;
    if let Some(shift) = sub_register_shift(phys, size, MTIME_ADDR) {
        let mask = size_mask(size) << shift;
        let merged = (hart.csr.mtime() & !mask) | ((value << shift) & mask);
        hart.csr.set_mtime(merged);
        return true;
    }
    if let Some(shift) = sub_register_shift(phys, size, mtimecmp_addr) {
        let mask = size_mask(size) << shift;
        let merged = (hart.csr.mtimecmp() & !mask) | ((value << shift) & mask);
        hart.csr.set_mtimecmp(merged);
        return true;
    }
    false
}

const fn size_mask(size: u8) -> u64 {
    match size {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HartConfig;

    fn hart_with_ram() -> (Hart, MemoryFacade, DecodeCache) {
        let mut mem = MemoryFacade::new();
        mem.map_ram(0x8000_0000, 0x1000);
        let hart = Hart::new(0, HartConfig::default());
        (hart, mem, DecodeCache::new())
    }

    #[test]
    fn misaligned_load_faults() {
        let (mut hart, mut mem, _) = hart_with_ram();
        let result = load(&mut hart, LoadWidth::Word, 0x8000_0001, &mut mem);
        assert!(matches!(result, Err(Exception::LoadAddressMisaligned(_))));
    }

    #[test]
    fn store_then_load_round_trips() {
        let (mut hart, mut mem, mut dc) = hart_with_ram();
        store(&mut hart, StoreWidth::Word, 0x8000_0000, 0x1234, &mut mem, &mut dc).unwrap();
        let value = load(&mut hart, LoadWidth::Word, 0x8000_0000, &mut mem).unwrap();
        assert_eq!(value, 0x1234);
    }

    #[test]
    fn unmapped_store_is_silently_dropped_by_default() {
        let (mut hart, mut mem, mut dc) = hart_with_ram();
        let result = store(&mut hart, StoreWidth::Word, 0x9000_0000, 1, &mut mem, &mut dc);
        assert!(result.is_ok());
    }

    #[test]
    fn unmapped_store_faults_under_strict_memory_faults() {
        let mut mem = MemoryFacade::new();
        let mut config = HartConfig::default();
        config.strict_memory_faults = true;
        let mut hart = Hart::new(0, config);
        let mut dc = DecodeCache::new();
        let result = store(&mut hart, StoreWidth::Word, 0x9000_0000, 1, &mut mem, &mut dc);
        assert!(matches!(result, Err(Exception::StoreAmoAccessFault(_))));
    }

    #[test]
    fn load_sign_extends_byte() {
        let (mut hart, mut mem, _) = hart_with_ram();
        mem.write(0x8000_0000, 1, 0xff, false);
        let v = load(&mut hart, LoadWidth::Byte, 0x8000_0000, &mut mem).unwrap();
        assert_eq!(v, u64::MAX);
    }

    #[test]
    fn mtime_register_reads_back_the_csr_not_physical_memory() {
        let (mut hart, mut mem, _) = hart_with_ram();
        hart.csr.set_mtime(0x1122_3344_5566_7788);
        let v = load(&mut hart, LoadWidth::Double, MTIME_ADDR, &mut mem).unwrap();
        assert_eq!(v, 0x1122_3344_5566_7788);
    }

    #[test]
    fn storing_mtimecmp_recomputes_mtip() {
        let (mut hart, mut mem, mut dc) = hart_with_ram();
        hart.csr.set_mtime(100);
        store(&mut hart, StoreWidth::Double, MTIMECMP_BASE, 50, &mut mem, &mut dc).unwrap();
        assert_eq!(hart.csr.read_mip() & crate::csr::MTIP_BIT, crate::csr::MTIP_BIT);
    }

    #[test]
    fn narrow_mtime_write_only_touches_its_own_bytes() {
        let (mut hart, mut mem, mut dc) = hart_with_ram();
        hart.csr.set_mtime(0xffff_ffff_ffff_ffff);
        store(&mut hart, StoreWidth::Word, MTIME_ADDR, 0, &mut mem, &mut dc).unwrap();
        assert_eq!(hart.csr.mtime(), 0xffff_ffff_0000_0000);
    }
}
