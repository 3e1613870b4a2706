//! The owning container for a whole machine: harts, physical memory, and the
//! shared decode cache (spec.md §5). No `Arc`/`Mutex` anywhere — a single
//! `System` steps its harts in a plain loop, and multi-hart correctness comes
//! from call ordering (write-then-invalidate), not synchronization, matching
//! the teacher's already-single-threaded `CPU`/`Emu` split in
//! `examples/developeruche-hybrid/crates/rv64-emu/src/emu.rs`.

use crate::config::HartConfig;
use crate::decode::DecodeCache;
use crate::exception::HaltReason;
use crate::hart::Hart;
use crate::memory::MemoryFacade;

pub struct System {
    pub harts: Vec<Hart>,
    pub mem: MemoryFacade,
    decode_cache: DecodeCache,
    mtime: u64,
    /// Wall-clock reading at the last [`System::step_all`] call, for computing
    /// the elapsed delta to add to `mtime` (spec.md §3 "last_tick_time"). `None`
    /// until the first call, so the first tick never adds a spurious delta
    /// against an arbitrary epoch.
    last_tick_time: Option<u64>,
}

impl System {
    pub fn new() -> Self {
        System {
            harts: Vec::new(),
            mem: MemoryFacade::new(),
            decode_cache: DecodeCache::new(),
            mtime: 0,
            last_tick_time: None,
        }
    }

    /// Add a hart with the given config, returning its index (used as its hart
    /// id for the reservation registry and `mhartid`).
    pub fn add_hart(&mut self, config: HartConfig) -> usize {
        let id = self.harts.len() as u32;
        self.harts.push(Hart::new(id, config));
        id as usize
    }

    /// Advance every hart by exactly one fetch-decode-execute (or trap, or idle)
    /// cycle, in hart-index order, then advance the shared wall clock by the
    /// elapsed time since the previous call.
    ///
    /// `now` is a wall-clock timestamp from the platform (spec.md §1's "wall-clock
    /// timestamp source" external collaborator) in whatever unit the harness
    /// wants `mtime` to tick in; the core only ever computes a delta against the
    /// previous call, never reads a clock itself.
    ///
    /// Returns the halt reasons of any harts that retired a simulator-only debug
    /// instruction this cycle, paired with their hart index.
    pub fn step_all(&mut self, now: u64) -> Vec<(usize, HaltReason)> {
        let delta = match self.last_tick_time {
            Some(last) => now.wrapping_sub(last),
            None => 0,
        };
        self.last_tick_time = Some(now);
        self.mtime = self.mtime.wrapping_add(delta);

        let mut halts = Vec::new();
        for idx in 0..self.harts.len() {
            if let Some(reason) = self.harts[idx].step(&mut self.mem, &mut self.decode_cache, self.mtime) {
                halts.push((idx, reason));
            }
        }
        halts
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Raise or lower an external interrupt line (the platform's device-interrupt
    /// signal, spec.md §1) on a given hart's `mip.SEIP`/`mip.MEIP`.
    pub fn set_external_interrupt(&mut self, hart_idx: usize, cause: crate::interrupt::InterruptCause, level: bool) {
        self.harts[hart_idx].csr.set_external_interrupt(cause, level);
    }

    /// `set_pc` (spec.md §6): force a hart's program counter, bypassing fetch.
    pub fn set_pc(&mut self, hart_idx: usize, addr: u64) {
        self.harts[hart_idx].set_pc(addr);
    }

    /// `interrupt_up`/`interrupt_down` (spec.md §6): raise or lower the external
    /// interrupt line named by a raw interrupt number (`{1, 3, 5, 7, 9, 11}`;
    /// anything else is treated as `MachineExternal`).
    pub fn interrupt_up(&mut self, hart_idx: usize, no: u32) {
        self.harts[hart_idx].interrupt_up(no);
    }

    pub fn interrupt_down(&mut self, hart_idx: usize, no: u32) {
        self.harts[hart_idx].interrupt_down(no);
    }

    /// `sc_access` (spec.md §6): whether `[phys, phys + size)` overlaps a hart's
    /// live LR reservation, without consuming it.
    pub fn sc_access(&self, hart_idx: usize, phys: u64, size: u64) -> bool {
        self.harts[hart_idx].sc_access(&self.mem, phys, size)
    }

    /// Narrow a hart's `satp.asid_len` at runtime (spec.md §3), fully flushing
    /// its TLB.
    pub fn set_asid_len(&mut self, hart_idx: usize, asid_len: u32) {
        self.harts[hart_idx].set_asid_len(asid_len);
    }

    /// `convert_addr` (spec.md §6): translate `virt` for `hart_idx` without
    /// trapping or mutating TLB/PTE state, for debugger-style address queries.
    pub fn convert_addr(&mut self, hart_idx: usize, virt: u64, write: bool) -> Option<u64> {
        self.harts[hart_idx].convert_addr(virt, write, &mut self.mem)
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HartConfig;

    #[test]
    fn stepping_an_empty_program_counter_faults_on_unmapped_fetch() {
        let mut sys = System::new();
        sys.add_hart(HartConfig::default());
        sys.harts[0].reset(0x8000_0000);
        // No RAM mapped: fetch misses, IllegalInstruction raised internally and
        // delivered as a trap rather than panicking the step loop.
        let halts = sys.step_all(0);
        assert!(halts.is_empty());
        assert_eq!(sys.harts[0].mode, crate::hart::Mode::Machine);
    }

    #[test]
    fn step_executes_one_instruction() {
        let mut sys = System::new();
        sys.add_hart(HartConfig::default());
        sys.mem.map_ram(0x8000_0000, 0x1000);
        // addi x1, x0, 5
        sys.mem.write(0x8000_0000, 4, 0x00500093, false);
        sys.harts[0].reset(0x8000_0000);
        sys.step_all(0);
        assert_eq!(sys.harts[0].read_reg(1), 5);
        assert_eq!(sys.harts[0].pc, 0x8000_0004);
    }

    #[test]
    fn set_pc_and_interrupt_up_reach_the_target_hart() {
        let mut sys = System::new();
        sys.add_hart(HartConfig::default());
        sys.set_pc(0, 0x8000_0004);
        assert_eq!(sys.harts[0].pc, 0x8000_0004);
        sys.interrupt_up(0, 7); // MTI
        assert_eq!(sys.harts[0].csr.read_mip() & crate::csr::MTIP_BIT, crate::csr::MTIP_BIT);
    }

    #[test]
    fn convert_addr_in_machine_mode_passes_through_untranslated() {
        let mut sys = System::new();
        sys.add_hart(HartConfig::default());
        assert_eq!(sys.convert_addr(0, 0x8000_0000, false), Some(0x8000_0000));
    }

    #[test]
    fn mtime_advances_by_the_wall_clock_delta_between_calls() {
        let mut sys = System::new();
        sys.add_hart(HartConfig::default());
        sys.harts[0].reset(0x8000_0000);
        sys.step_all(1_000);
        assert_eq!(sys.mtime(), 0); // first call only establishes the baseline
        sys.step_all(1_030);
        assert_eq!(sys.mtime(), 30);
    }
}
