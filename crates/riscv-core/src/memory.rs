//! Physical memory facade (spec.md §4.B): a flat address space made of named
//! areas (RAM or read-only ROM image), a breakpoint log, and the owned
//! reservation registry it invokes on every write.
//!
//! Grounded on `original_source/src/physmem.c` (area-list design: a machine is a
//! sparse collection of named regions, not one giant array) adapted to the
//! idiomatic Rust shape the teacher uses for owned-state components: one struct,
//! no raw pointers, `BTreeMap` standing in for the original's linked area list.

use crate::reservation::ReservationRegistry;
use tracing::warn;

pub const PAGE_SIZE: u64 = 4096;

/// Fixed physical address of the free-running `MTIME` register (spec.md §6).
/// `original_source`'s CPU intercepts these addresses inline in its own
/// physmem read/write macros rather than defining them in a shared device
/// registry; the filtered source pack doesn't carry the board header that picks
/// the actual constant, so this follows the widely-used SiFive CLINT layout
/// (`mtime` at the CLINT's fixed offset) that every other RISC-V software stack
/// assumes by convention.
pub const MTIME_ADDR: u64 = 0x0200_bff8;
/// Base of the per-hart `MTIMECMP` array, one 8-byte register per hart id
/// (`MTIMECMP_BASE + 8 * hart_id`), matching the same CLINT layout.
pub const MTIMECMP_BASE: u64 = 0x0200_4000;

/// Sentinel value returned by a read that misses every mapped area, matching
/// spec.md §4.B ("reads to unmapped physical memory return a fixed sentinel");
/// `original_source/src/physmem.c` returns all-ones for the equivalent case.
pub const DEFAULT_MEMORY_VALUE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointEvent {
    pub addr: u64,
    pub size: u8,
    pub is_write: bool,
}

struct Area {
    base: u64,
    len: u64,
    data: Vec<u8>,
    writable: bool,
}

impl Area {
    fn contains(&self, addr: u64, size: u64) -> bool {
        addr >= self.base && addr.saturating_add(size) <= self.base + self.len
    }
}

/// The owned physical memory of a `System`: RAM/ROM areas, breakpoints, the frame
/// decode-cache validity map, and the reservation registry writes must invalidate.
pub struct MemoryFacade {
    areas: Vec<Area>,
    breakpoints: Vec<u64>,
    hits: Vec<BreakpointEvent>,
    pub reservations: ReservationRegistry,
}

impl MemoryFacade {
    pub fn new() -> Self {
        MemoryFacade {
            areas: Vec::new(),
            breakpoints: Vec::new(),
            hits: Vec::new(),
            reservations: ReservationRegistry::new(),
        }
    }

    /// Map a writable RAM region of `len` bytes at `base`, zero-initialized.
    pub fn map_ram(&mut self, base: u64, len: u64) {
        self.areas.push(Area {
            base,
            len,
            data: vec![0u8; len as usize],
            writable: true,
        });
    }

    /// Map a read-only region backed by `image`; writes to it are silently
    /// dropped but still report success to the caller, matching the source's
    /// observed ROM-write behavior.
    pub fn map_rom(&mut self, base: u64, image: Vec<u8>) {
        let len = image.len() as u64;
        self.areas.push(Area {
            base,
            len,
            data: image,
            writable: false,
        });
    }

    pub fn add_breakpoint(&mut self, addr: u64) {
        if !self.breakpoints.contains(&addr) {
            self.breakpoints.push(addr);
        }
    }

    pub fn remove_breakpoint(&mut self, addr: u64) {
        self.breakpoints.retain(|&a| a != addr);
    }

    /// Drain the log of breakpoint hits accumulated since the last call.
    pub fn take_breakpoint_hits(&mut self) -> Vec<BreakpointEvent> {
        std::mem::take(&mut self.hits)
    }

    fn check_breakpoint(&mut self, addr: u64, size: u8, is_write: bool, protected: bool) {
        if !protected {
            return;
        }
        let size64 = size as u64;
        if self
            .breakpoints
            .iter()
            .any(|&bp| bp >= addr && bp < addr + size64)
        {
            self.hits.push(BreakpointEvent {
                addr,
                size,
                is_write,
            });
        }
    }

    fn find_area(&self, addr: u64, size: u64) -> Option<usize> {
        self.areas.iter().position(|a| a.contains(addr, size))
    }

    /// Read `size` (1/2/4/8) bytes at `addr`. Out-of-range reads return
    /// [`DEFAULT_MEMORY_VALUE`] truncated to `size`, never an error (spec.md
    /// §4.B).
    pub fn read(&mut self, addr: u64, size: u8, protected: bool) -> u64 {
        self.check_breakpoint(addr, size, false, protected);
        let size64 = size as u64;
        let Some(idx) = self.find_area(addr, size64) else {
            return DEFAULT_MEMORY_VALUE & size_mask(size);
        };
        let area = &self.areas[idx];
        let offset = (addr - area.base) as usize;
        let mut buf = [0u8; 8];
        buf[..size as usize].copy_from_slice(&area.data[offset..offset + size as usize]);
        u64::from_le_bytes(buf)
    }

    /// Write `size` bytes at `addr`. Returns whether the write landed in a
    /// mapped, writable area; callers decide (per `HartConfig::strict_memory_faults`)
    /// whether a `false` result becomes `StoreAmoAccessFault` or is ignored.
    ///
    /// Always invokes `ReservationRegistry::on_write` first, even on a failed
    /// write to an unmapped area. The decode cache's per-page invalidation
    /// (spec.md §4.B/§4.G) is the caller's responsibility — every store/AMO/SC
    /// executor that reaches this invokes `DecodeCache::invalidate_page` itself,
    /// since the decode cache is owned by `System`, not by this facade.
    pub fn write(&mut self, addr: u64, size: u8, value: u64, protected: bool) -> bool {
        self.check_breakpoint(addr, size, true, protected);
        self.reservations.on_write(addr, size as u64);
        let size64 = size as u64;
        let Some(idx) = self.find_area(addr, size64) else {
            warn!(addr, size, "write to unmapped physical address silently fell through");
            return false;
        };
        let area = &mut self.areas[idx];
        if !area.writable {
            warn!(addr, size, "write to read-only area silently dropped");
            return true;
        }
        let offset = (addr - area.base) as usize;
        area.data[offset..offset + size as usize]
            .copy_from_slice(&value.to_le_bytes()[..size as usize]);
        true
    }

    /// Raw byte-slice access for loading a boot image at construction time; not
    /// used by the fetch/load/store path, which always goes through
    /// [`MemoryFacade::read`]/[`MemoryFacade::write`].
    pub fn load_image(&mut self, base: u64, image: &[u8]) {
        let Some(idx) = self.find_area(base, image.len() as u64) else {
            return;
        };
        let area = &mut self.areas[idx];
        let offset = (base - area.base) as usize;
        area.data[offset..offset + image.len()].copy_from_slice(image);
    }
}

impl Default for MemoryFacade {
    fn default() -> Self {
        Self::new()
    }
}

const fn size_mask(size: u8) -> u64 {
    match size {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}
