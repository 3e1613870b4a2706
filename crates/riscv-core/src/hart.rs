//! Hart state and the fetch-decode-execute step (spec.md §4.J/§4.K).
//!
//! The register file, PC, and step-loop shape are grounded on `CPU` in
//! `examples/developeruche-hybrid/crates/rv64-emu/src/cpu/mod.rs`; the CSR file,
//! TLB, and reservation tracking it used as ad-hoc fields are pulled out into
//! their own components here (spec.md §4.C/§4.D/§4.E) so a `System` can own
//! several independently-steppable harts (spec.md §5).

use crate::bits::is_aligned;
use crate::config::HartConfig;
use crate::csr::{numbers::*, CsrFile};
use crate::decode::DecodeCache;
use crate::exception::{Exception, HaltReason};
use crate::interrupt::InterruptCause;
use crate::memory::MemoryFacade;
use crate::mmu::{self, AccessType};
use crate::tlb::Tlb;

use tracing::debug;
#[cfg(feature = "instruction_trace")]
use tracing::trace;

pub const NUM_REGISTERS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mode {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

pub struct Hart {
    pub id: u32,
    pub regs: [u64; NUM_REGISTERS],
    pub pc: u64,
    pub mode: Mode,
    pub csr: CsrFile,
    pub tlb: Tlb,
    pub config: HartConfig,
    /// Set by WFI, cleared the moment any pending-and-enabled interrupt bit
    /// appears in `mip & mie` (spec.md §4.H: WFI is a hint, not a real stall).
    pub idle: bool,
    pub retired: u64,
}

impl Hart {
    pub fn new(id: u32, config: HartConfig) -> Self {
        let mut regs = [0u64; NUM_REGISTERS];
        // x2 (sp) convention carried from the teacher: point at the top of the
        // physical RAM region the harness maps, adjusted by the harness after
        // construction if it maps RAM elsewhere.
        regs[2] = 0;
        Hart {
            csr: CsrFile::new(config.xlen, config.asid_len, id as u64),
            tlb: Tlb::new(config.tlb_size),
            id,
            regs,
            pc: 0,
            mode: Mode::Machine,
            idle: false,
            retired: 0,
            config,
        }
    }

    pub fn reset(&mut self, pc: u64) {
        self.regs = [0u64; NUM_REGISTERS];
        self.pc = pc;
        self.mode = Mode::Machine;
        self.idle = false;
        self.retired = 0;
        self.csr.reset(self.id as u64);
        self.tlb.resize(self.config.tlb_size);
    }

    pub fn read_reg(&self, r: u32) -> u64 {
        if r == 0 {
            0
        } else {
            self.regs[r as usize] & self.config.xlen.mask()
        }
    }

    pub fn write_reg(&mut self, r: u32, value: u64) {
        if r != 0 {
            self.regs[r as usize] = value & self.config.xlen.mask();
        }
    }

    /// Whether privileged counters `mcounteren`/`scounteren` would gate a given
    /// CSR for the hart's current mode; exposed for the decode cache warmers and
    /// tests, the CSR file itself enforces this on every access.
    pub fn translate(
        &mut self,
        addr: u64,
        access: AccessType,
        mem: &mut MemoryFacade,
    ) -> Result<u64, Exception> {
        let effective_mode = if access != AccessType::Instruction
            && field(self.csr.read_mstatus(), MSTATUS_MPRV) != 0
        {
            mode_from_mpp(field(self.csr.read_mstatus(), MSTATUS_MPP))
        } else {
            self.mode
        };
        mmu::translate(addr, access, effective_mode, &self.csr, &mut self.tlb, mem)
    }

    /// One fetch-decode-execute cycle. Returns `Ok(None)` on a normal retire,
    /// `Ok(Some(reason))` when a simulator-only halt/debug instruction retired,
    /// and never returns `Err` — traps are delivered internally via
    /// [`crate::trap::deliver`] and observed only through CSR/PC state.
    pub fn step(
        &mut self,
        mem: &mut MemoryFacade,
        decode_cache: &mut DecodeCache,
        mtime: u64,
    ) -> Option<HaltReason> {
        self.csr.set_mtime(mtime);

        if let Some(cause) = self.pending_interrupt() {
            self.idle = false;
            debug!(hart = self.id, ?cause, pc = self.pc, "interrupt taken");
            crate::trap::deliver_interrupt(self, cause);
            self.account(false);
            return None;
        }
        if self.idle {
            self.account(false);
            return None;
        }

        let result = self.fetch_and_execute(mem, decode_cache);
        match result {
            Ok(None) => {
                self.retired += 1;
                #[cfg(feature = "instruction_trace")]
                trace!(hart = self.id, pc = self.pc, retired = self.retired, "instruction retired");
                self.account(true);
                None
            }
            Ok(Some(reason)) => {
                self.retired += 1;
                self.account(true);
                Some(reason)
            }
            Err(exc) => {
                debug!(hart = self.id, pc = self.pc, ?exc, "trap entry");
                crate::trap::deliver_exception(self, exc);
                self.account(false);
                None
            }
        }
    }

    /// Advance `mcycle`/`minstret`/HPM counters for the cycle just spent, then
    /// re-derive `external_STIP` so a bare cycle rollover across `scyclecmp`
    /// still raises the line without a CSR write (spec.md §4.J step 5).
    fn account(&mut self, instret: bool) {
        let event = if self.idle {
            crate::csr::HpmEvent::WfiIdleCycles
        } else {
            match self.mode {
                Mode::User => crate::csr::HpmEvent::UserCycles,
                Mode::Supervisor => crate::csr::HpmEvent::SupervisorCycles,
                Mode::Machine => crate::csr::HpmEvent::MachineCycles,
            }
        };
        self.csr.account(instret, event);
    }

    fn fetch_and_execute(
        &mut self,
        mem: &mut MemoryFacade,
        decode_cache: &mut DecodeCache,
    ) -> Result<Option<HaltReason>, Exception> {
        if !is_aligned(self.pc, 4) {
            return Err(Exception::InstructionAddressMisaligned(self.pc));
        }
        let phys = self.translate(self.pc, AccessType::Instruction, mem)?;
        let raw = mem.read(phys, 4, true) as u32;
        if raw & 0b11 != 0b11 {
            // Compressed 16-bit encodings are a Non-goal (spec.md §1).
            return Err(Exception::IllegalInstruction(raw as u64));
        }
        let word_width_is_64 = matches!(self.config.xlen, crate::config::Xlen::Rv64);
        let decoded = match decode_cache.get_or_decode(
            phys,
            raw,
            word_width_is_64,
            self.config.machine_specific_instructions,
        ) {
            Ok(d) => d,
            Err(_) => return Err(Exception::IllegalInstruction(raw as u64)),
        };
        self.execute(decoded, mem, decode_cache)
    }

    fn pending_interrupt(&self) -> Option<InterruptCause> {
        let mstatus = self.csr.read_mstatus();
        let pending = self.csr.read_mip() & self.csr.mie();
        if pending == 0 {
            return None;
        }
        for cause in InterruptCause::PRIORITY {
            if pending & cause.mask() == 0 {
                continue;
            }
            if !self.interrupt_globally_enabled(cause, mstatus) {
                continue;
            }
            return Some(cause);
        }
        None
    }

    /// `set_pc` (spec.md §6): force the program counter to `addr`. Never traps —
    /// a misaligned target is simply stored and left to fault naturally the next
    /// time `step` tries to fetch from it, the same way a branch or `mret` target
    /// would.
    pub fn set_pc(&mut self, addr: u64) {
        self.pc = addr & self.config.xlen.mask();
    }

    /// `interrupt_up`/`interrupt_down` (spec.md §6): raise or lower the external
    /// interrupt line named by a raw interrupt number rather than an
    /// [`InterruptCause`], for harnesses that model interrupts as numbered wires.
    pub fn interrupt_up(&mut self, no: u32) {
        self.csr.set_external_interrupt(InterruptCause::from_bit(no), true);
    }

    pub fn interrupt_down(&mut self, no: u32) {
        self.csr.set_external_interrupt(InterruptCause::from_bit(no), false);
    }

    /// `sc_access` (spec.md §6): whether `[phys, phys + size)` overlaps this
    /// hart's live LR reservation, without consuming it — for instrumentation
    /// that wants to watch reservations form and break without acting as a
    /// competing store.
    pub fn sc_access(&self, mem: &MemoryFacade, phys: u64, size: u64) -> bool {
        mem.reservations.overlaps(self.id, phys, size)
    }

    /// Narrow the number of ASID bits honoured by `satp` at runtime (spec.md
    /// §3: "0 ≤ asid_len ≤ default"). A configuration-plane operation, not an
    /// ISA instruction — the privileged spec has no CSR for it — so it lives
    /// alongside `set_pc`/`interrupt_up` as a harness-facing entry point.
    /// Always fully flushes the TLB: stale entries tagged with ASID bits that
    /// just became invisible would otherwise alias unrelated address spaces.
    pub fn set_asid_len(&mut self, asid_len: u32) {
        self.csr.set_asid_len(asid_len);
        self.tlb.flush_all();
    }

    /// `convert_addr` (spec.md §6): translate `virt` the way a load or store
    /// would, but never trap and never mutate TLB or PTE state — a debugger's
    /// "what does this address resolve to" query, evaluated at the hart's
    /// current privilege (`MPRV` does not apply; this isn't an instruction).
    pub fn convert_addr(&self, virt: u64, write: bool, mem: &mut MemoryFacade) -> Option<u64> {
        let access = if write { AccessType::Store } else { AccessType::Load };
        mmu::probe(virt, access, self.mode, &self.csr, &self.tlb, mem)
    }

    fn interrupt_globally_enabled(&self, cause: InterruptCause, mstatus: u64) -> bool {
        let delegated = self.csr.mideleg() & cause.mask() != 0;
        let target_mode = if delegated { Mode::Supervisor } else { Mode::Machine };
        match (self.mode, target_mode) {
            (Mode::Machine, Mode::Machine) => field(mstatus, MSTATUS_MIE) != 0,
            (m, Mode::Machine) if m != Mode::Machine => true,
            (Mode::Supervisor, Mode::Supervisor) => field(mstatus, XSTATUS_SIE) != 0,
            (Mode::User, Mode::Supervisor) => true,
            _ => false,
        }
    }
}

pub fn mode_from_mpp(mpp: u64) -> Mode {
    match mpp {
        0 => Mode::User,
        1 => Mode::Supervisor,
        _ => Mode::Machine,
    }
}
