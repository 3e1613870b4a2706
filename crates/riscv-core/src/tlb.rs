//! Translation lookaside buffer (spec.md §4.E): a fixed-capacity, ASID- and
//! global-bit-aware cache of page-table walks with LRU eviction.
//!
//! Grounded directly on
//! `original_source/src/device/cpu/riscv_rv64ima/tlb.c`: the intrusive
//! free-list/LRU-list design is re-expressed here as a `Vec<Slot>` plus two
//! `VecDeque<usize>` index lists (free and LRU-ordered, most-recently-used at the
//! back), since Rust's ownership model makes an intrusive doubly-linked list
//! (the C `item_t`) more trouble than it's worth for a capacity in the tens.

use std::collections::VecDeque;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Page,
    /// Sv39's 2 MiB superpage (a leaf at the middle of three levels).
    Megapage,
    /// Sv39's 1 GiB superpage (a leaf at the root of three levels).
    Gigapage,
    /// Sv32's 4 MiB superpage (a leaf at the root of Sv32's two levels) — a
    /// distinct variant from [`PageType::Megapage`] because Sv32's superpage
    /// offset width (22 bits) differs from Sv39's (21 bits); reusing one
    /// variant for both would compose the wrong physical address under Sv32.
    Sv32Megapage,
}

impl PageType {
    /// Page-offset width in bits: 12 for a 4 KiB page, 21 for a 2 MiB (Sv39)
    /// megapage, 22 for a 4 MiB (Sv32) megapage, 30 for a 1 GiB (Sv39)
    /// gigapage — matches `RV64_PAGESIZE`/`MEGAPAGESIZE`/`GIGAPAGESIZE` in
    /// `tlb.c`, plus the Sv32-specific width from `virt_mem.h`.
    pub fn shift(self) -> u32 {
        match self {
            PageType::Page => 12,
            PageType::Megapage => 21,
            PageType::Sv32Megapage => 22,
            PageType::Gigapage => 30,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TlbEntry {
    pub vpn: u64,
    pub ppn: u64,
    pub asid: u32,
    pub global: bool,
    pub page_type: PageType,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub user: bool,
    pub dirty: bool,
}

struct Slot {
    entry: Option<TlbEntry>,
}

/// A single hart's TLB. Each hart owns one (spec.md §5: "a hart's TLB is private
/// to it"); a `System` with several harts holds one `Tlb` per `Hart`.
pub struct Tlb {
    slots: Vec<Slot>,
    free: VecDeque<usize>,
    /// Front = least recently used, back = most recently used, matching the
    /// "push to head on insert/hit" behavior of `tlb.c`'s LRU list (there "head"
    /// is MRU; here the back of the deque is).
    lru: VecDeque<usize>,
}

impl Tlb {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot { entry: None }).collect();
        Tlb {
            slots,
            free: (0..capacity).collect(),
            lru: VecDeque::with_capacity(capacity),
        }
    }

    pub fn resize(&mut self, capacity: usize) {
        *self = Tlb::new(capacity);
    }

    fn vpn_for(addr: u64, page_type: PageType) -> u64 {
        addr >> page_type.shift()
    }

    fn entry_maps(entry: &TlbEntry, vpn: u64, asid: u32) -> bool {
        if !entry.global && entry.asid != asid {
            return false;
        }
        let shift_diff = entry.page_type.shift() - PageType::Page.shift();
        (entry.vpn) == (vpn >> shift_diff)
    }

    /// Insert a mapping, evicting the free-list head or, if none is free, the
    /// least-recently-used slot (`rv64_tlb_add_mapping` in `tlb.c`). A stale
    /// mapping for the same page is dropped first, so a TLB-hit re-walk (mmu.rs's
    /// dirty-bit recheck) never leaves two entries racing for the same page.
    pub fn add_mapping(&mut self, entry: TlbEntry) {
        self.remove_duplicate(&entry);
        let idx = if let Some(idx) = self.free.pop_front() {
            idx
        } else {
            self.lru.pop_front().expect("tlb has nonzero capacity")
        };
        self.slots[idx].entry = Some(entry);
        self.lru.push_back(idx);
    }

    fn remove_duplicate(&mut self, new: &TlbEntry) {
        if let Some(pos) = self.lru.iter().position(|&idx| match &self.slots[idx].entry {
            Some(e) => {
                e.page_type == new.page_type
                    && e.vpn == new.vpn
                    && e.global == new.global
                    && (e.global || e.asid == new.asid)
            }
            None => false,
        }) {
            let idx = self.lru.remove(pos).unwrap();
            self.slots[idx].entry = None;
            self.free.push_back(idx);
        }
    }

    /// Look up the mapping covering virtual page `vpn` (already shifted to
    /// 4 KiB-page units) for `asid`, promoting it to most-recently-used on a hit.
    pub fn get_mapping(&mut self, addr: u64, asid: u32) -> Option<TlbEntry> {
        let vpn = Self::vpn_for(addr, PageType::Page);
        let pos = self
            .lru
            .iter()
            .position(|&idx| match &self.slots[idx].entry {
                Some(e) => Self::entry_maps(e, vpn, asid),
                None => false,
            })?;
        let idx = self.lru.remove(pos).unwrap();
        self.lru.push_back(idx);
        self.slots[idx].entry
    }

    /// Like [`Tlb::get_mapping`] but never promotes the hit to most-recently-used
    /// — used by `convert_addr` (spec.md §6), whose debugger-facing probe must
    /// not perturb eviction order for the instructions the hart is actually
    /// executing.
    pub fn peek(&self, addr: u64, asid: u32) -> Option<TlbEntry> {
        let vpn = Self::vpn_for(addr, PageType::Page);
        self.lru.iter().find_map(|&idx| match &self.slots[idx].entry {
            Some(e) if Self::entry_maps(e, vpn, asid) => Some(*e),
            _ => None,
        })
    }

    pub fn remove_mapping(&mut self, addr: u64, asid: u32) {
        let vpn = Self::vpn_for(addr, PageType::Page);
        if let Some(pos) = self.lru.iter().position(|&idx| match &self.slots[idx].entry {
            Some(e) => Self::entry_maps(e, vpn, asid),
            None => false,
        }) {
            let idx = self.lru.remove(pos).unwrap();
            self.slots[idx].entry = None;
            self.free.push_back(idx);
        }
    }

    pub fn flush_all(&mut self) {
        debug!("tlb flush: all");
        self.resize(self.slots.len());
    }

    /// Flush every non-global entry for `asid` (SFENCE.VMA with rs1=x0, rs2!=x0).
    pub fn flush_by_asid(&mut self, asid: u32) {
        debug!(asid, "tlb flush: by asid");
        self.retain(|e| e.global || e.asid != asid);
    }

    /// Flush every entry (of any ASID) covering `addr` (SFENCE.VMA with
    /// rs1!=x0, rs2=x0).
    pub fn flush_by_addr(&mut self, addr: u64) {
        debug!(addr, "tlb flush: by addr");
        let vpn = Self::vpn_for(addr, PageType::Page);
        self.retain(|e| !Self::entry_maps(e, vpn, e.asid));
    }

    /// Flush entries for `asid` covering `addr`, skipping globals (SFENCE.VMA
    /// with both operands non-zero).
    pub fn flush_by_asid_and_addr(&mut self, addr: u64, asid: u32) {
        debug!(addr, asid, "tlb flush: by asid and addr");
        let vpn = Self::vpn_for(addr, PageType::Page);
        self.retain(|e| (e.global || e.asid != asid) || !Self::entry_maps(e, vpn, asid));
    }

    fn retain(&mut self, keep: impl Fn(&TlbEntry) -> bool) {
        let mut i = 0;
        while i < self.lru.len() {
            let idx = self.lru[i];
            let drop = match &self.slots[idx].entry {
                Some(e) => !keep(e),
                None => false,
            };
            if drop {
                self.lru.remove(i);
                self.slots[idx].entry = None;
                self.free.push_back(idx);
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(vpn: u64, asid: u32, global: bool) -> TlbEntry {
        TlbEntry {
            vpn,
            ppn: vpn,
            asid,
            global,
            page_type: PageType::Page,
            readable: true,
            writable: true,
            executable: true,
            user: false,
            dirty: false,
        }
    }

    #[test]
    fn hit_after_insert() {
        let mut tlb = Tlb::new(4);
        tlb.add_mapping(entry(1, 0, false));
        assert!(tlb.get_mapping(0x1000, 0).is_some());
    }

    #[test]
    fn miss_on_asid_mismatch_unless_global() {
        let mut tlb = Tlb::new(4);
        tlb.add_mapping(entry(1, 7, false));
        assert!(tlb.get_mapping(0x1000, 0).is_none());
        tlb.add_mapping(entry(1, 7, true));
        assert!(tlb.get_mapping(0x1000, 0).is_some());
    }

    #[test]
    fn lru_eviction_when_full() {
        let mut tlb = Tlb::new(2);
        tlb.add_mapping(entry(1, 0, false));
        tlb.add_mapping(entry(2, 0, false));
        // touch vpn 1 so vpn 2 becomes LRU
        assert!(tlb.get_mapping(0x1000, 0).is_some());
        tlb.add_mapping(entry(3, 0, false));
        assert!(tlb.get_mapping(0x2000, 0).is_none()); // vpn 2 evicted
        assert!(tlb.get_mapping(0x1000, 0).is_some());
        assert!(tlb.get_mapping(0x3000, 0).is_some());
    }

    #[test]
    fn flush_by_asid_keeps_globals() {
        let mut tlb = Tlb::new(4);
        tlb.add_mapping(entry(1, 5, false));
        tlb.add_mapping(entry(2, 5, true));
        tlb.flush_by_asid(5);
        assert!(tlb.get_mapping(0x1000, 5).is_none());
        assert!(tlb.get_mapping(0x2000, 5).is_some());
    }
}
