//! End-to-end scenarios from spec.md §8, driven through the public `System` API
//! the way a harness embedding this crate would: map memory, seed registers and
//! page tables, step, and inspect CSR/register state afterward.

use riscv_core::config::HartConfig;
use riscv_core::csr::numbers::{MCAUSE, MEPC, MTVAL, MTVEC, SATP};
use riscv_core::hart::Mode;
use riscv_core::System;

fn new_system() -> System {
    let mut sys = System::new();
    sys.add_hart(HartConfig::default());
    sys.mem.map_ram(0x8000_0000, 0x10_0000);
    sys
}

/// S1: `addi x6, x5, 3` with `x5 = 0x7FFF_FFFE` retires normally and advances PC.
#[test]
fn s1_addi_wraps_into_a_negative_result_with_no_trap() {
    let mut sys = new_system();
    sys.harts[0].reset(0x8000_0000);
    sys.harts[0].write_reg(5, 0x7FFF_FFFE);
    // addi x6, x5, 3
    sys.mem.write(0x8000_0000, 4, 0x00328313, false);
    sys.step_all(0);

    assert_eq!(sys.harts[0].read_reg(6), 0x8000_0001);
    assert_eq!(sys.harts[0].pc, 0x8000_0004);
    assert_eq!(sys.harts[0].mode, Mode::Machine);
}

/// S2: `lw x2, 0(x1)` with a misaligned `x1` traps with `mcause=4`, `mtval` set to
/// the offending address, and `pc` redirected to `mtvec` (direct mode).
#[test]
fn s2_misaligned_load_traps_with_mtval_set_to_the_address() {
    let mut sys = new_system();
    sys.harts[0].reset(0x8000_0000);
    sys.harts[0].csr.raw_write(MTVEC, 0x8000_1000);
    sys.harts[0].write_reg(1, 0x8000_0001);
    // lw x2, 0(x1)
    sys.mem.write(0x8000_0000, 4, 0x0000a103, false);
    sys.step_all(0);

    assert_eq!(sys.harts[0].csr.raw_read(MCAUSE), 4);
    assert_eq!(sys.harts[0].csr.raw_read(MTVAL), 0x8000_0001);
    assert_eq!(sys.harts[0].pc, 0x8000_1000);
}

/// S3: an Sv32 walk through a single-level leaf translates correctly and a
/// second access to the same page is served from the TLB rather than re-walked.
#[test]
fn s3_sv32_single_level_leaf_translates_and_then_tlb_hits() {
    use riscv_core::config::Xlen;
    use riscv_core::mmu::{self, AccessType};
    use riscv_core::memory::MemoryFacade;
    use riscv_core::csr::CsrFile;
    use riscv_core::tlb::Tlb;

    let mut csr = CsrFile::new(Xlen::Rv32, 9, 0);
    let mut mem = MemoryFacade::new();
    mem.map_ram(0x0000_0000, 0x20_0000);
    let mut tlb = Tlb::new(8);

    // satp.ppn = 0x1 (root table at 0x1000); Sv32 mode bit is the top bit.
    const SATP_MODE_SV32: u64 = 1 << 31;
    csr.raw_write(SATP, SATP_MODE_SV32 | 0x1);

    // virt 0x0000_0400 -> VPN1 = 0, VPN0 = 1. A single-level leaf at VPN1 means
    // the entry at vpn1 in the root table is itself R|W|X (a 4 MiB megapage).
    // PPN=0x80000 (its low 10 bits are zero, satisfying the megapage alignment
    // check) so the leaf's physical base is the round 0x8000_0000.
    let pte = (0x80000u64 << 10) | 0b1111 | (1 << 6); // PPN=0x80000, V|R|W|X, A pre-set
    mem.write(0x1000, 4, pte, false);

    let phys = mmu::translate(0x0000_0400, AccessType::Load, Mode::Supervisor, &csr, &mut tlb, &mut mem)
        .unwrap();
    assert_eq!(phys, 0x8000_0400);

    // Corrupt the PTE in memory: a second walk would now fault, so a correct
    // pass here only happens if the previous mapping was cached.
    mem.write(0x1000, 4, 0, false);
    let phys2 = mmu::translate(0x0000_0400, AccessType::Load, Mode::Supervisor, &csr, &mut tlb, &mut mem)
        .unwrap();
    assert_eq!(phys2, 0x8000_0400);
}

/// S4: hart 0 reserves a word via LR, hart 1 writes to it, hart 0's SC then
/// fails and observes hart 1's stored value rather than clobbering it.
#[test]
fn s4_sc_fails_after_a_cross_hart_write_to_the_reserved_word() {
    let mut sys = System::new();
    sys.add_hart(HartConfig::default());
    sys.add_hart(HartConfig::default());
    sys.mem.map_ram(0x4000, 0x1000);

    sys.harts[0].reset(0x8000_0000);
    sys.harts[1].reset(0x9000_0000);
    sys.harts[0].write_reg(2, 0x4000);
    sys.harts[1].write_reg(2, 0x4000);
    sys.harts[1].write_reg(3, 0x77);
    sys.harts[0].write_reg(5, 0x11);

    // Unmap the default program area and instead drive execution by hand
    // through `execute`-adjacent primitives isn't available publicly, so this
    // scenario is driven through the atomic/memory primitives directly, the
    // same shape a harness without an assembler would use.
    let phys0 = sys.convert_addr(0, 0x4000, false).unwrap();
    sys.mem.reservations.register(0, phys0);

    // hart 1's store clears hart 0's reservation.
    sys.mem.write(phys0, 4, 0x77, true);

    // hart 0's SC must now fail (no live reservation).
    assert!(sys.mem.reservations.check_and_clear(0, phys0).is_none());
    assert_eq!(sys.mem.read(phys0, 4, false), 0x77);
}

/// S5: an ECALL from S-mode traps to M-mode with `mcause=9`; `mret` then
/// restores S-mode with `MIE` and `MPIE` exactly as spec.md §4.I requires.
#[test]
fn s5_mret_restores_supervisor_mode_and_interrupt_enable() {
    use riscv_core::csr::numbers::MSTATUS;

    let mut sys = new_system();
    sys.harts[0].reset(0x8000_0000);
    sys.harts[0].mode = Mode::Supervisor;
    // Set MIE before the trap so it round-trips through MPIE/MRET.
    sys.harts[0].csr.raw_write(MSTATUS, 1 << 3);
    sys.harts[0].csr.raw_write(MTVEC, 0x8000_1000);
    // ecall
    sys.mem.write(0x8000_0000, 4, 0x00000073, false);
    sys.step_all(0);

    assert_eq!(sys.harts[0].csr.raw_read(MCAUSE), 9);
    assert_eq!(sys.harts[0].mode, Mode::Machine);

    // mret
    sys.mem.write(sys.harts[0].pc, 4, 0x30200073, false);
    sys.step_all(1);

    assert_eq!(sys.harts[0].mode, Mode::Supervisor);
    assert_eq!(sys.harts[0].pc, 0x8000_0000);
    assert_ne!(sys.harts[0].csr.raw_read(MSTATUS) & (1 << 3), 0); // MIE restored
}

/// S6: `sfence.vma x0, a1` with `a1` holding an ASID drops that ASID's private
/// mapping but leaves a global mapping for the same ASID untouched.
#[test]
fn s6_sfence_vma_by_asid_keeps_the_global_mapping() {
    use riscv_core::tlb::{PageType, Tlb, TlbEntry};

    let mut tlb = Tlb::new(8);
    let private = TlbEntry {
        vpn: 0x12345,
        ppn: 0x9,
        asid: 7,
        global: false,
        page_type: PageType::Page,
        readable: true,
        writable: true,
        executable: false,
        user: true,
        dirty: false,
    };
    let global = TlbEntry {
        vpn: 0x22222,
        ppn: 0xa,
        asid: 7,
        global: true,
        page_type: PageType::Page,
        readable: true,
        writable: true,
        executable: false,
        user: true,
        dirty: false,
    };
    tlb.add_mapping(private);
    tlb.add_mapping(global);

    tlb.flush_by_asid(7);

    assert!(tlb.get_mapping(0x12345 << 12, 7).is_none());
    assert!(tlb.get_mapping(0x22222 << 12, 7).is_some());
}
