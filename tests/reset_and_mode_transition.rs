//! End-to-end scenarios for the reset vector and the real-to-protected
//! mode transition, exercised only through the public `Cpu` API.

use x86_core::{Cpu, Mode, Outcome, Segment, CR0_PE};

/// ROM spans exactly the top 64 KiB window a real-mode CPU can address,
/// so reset-vector offsets translate directly to ROM byte offsets.
fn rom_only_cpu() -> Cpu {
    Cpu::create(0, 0xFFFF, 0x1_0000, 0x1_FFFF).unwrap()
}

#[test]
fn reset_vector_far_jump_then_halt() {
    let mut cpu = rom_only_cpu();
    assert_eq!(cpu.eip, 0x0000_FFF0);
    assert_eq!(cpu.mode, Mode::Real);

    // `JMP FAR 0008:00000000`, at the reset-vector offset (F000:FFF0
    // folds to the last 16 bytes of the ROM window).
    cpu.load_rom_bytes(0xFFF0, &[0xEA, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00]);
    // The jump target, at offset 0 (which also folds to the start of
    // the ROM window, since ROM here is exactly 64 KiB).
    cpu.load_rom_bytes(0x0000, &[0xF4]);

    assert_eq!(cpu.step(), Outcome::Success);
    assert_eq!(cpu.eip, 0x0000_0000);
    assert_eq!(cpu.segments[Segment::Cs as usize].selector, 0x0008);
    // CR0.PE was never set, so the jump leaves the CPU in real mode and
    // the CS descriptor is synthesized from the selector, not GDT-read.
    assert_eq!(cpu.mode, Mode::Real);
    assert_eq!(cpu.segments[Segment::Cs as usize].descriptor.base, 0x0008 << 4);

    assert_eq!(cpu.step(), Outcome::Halted);
    assert!(cpu.is_halted());
    assert_eq!(cpu.step(), Outcome::Halted, "stepping a halted CPU is a no-op");
}

#[test]
fn lgdt_then_far_jump_enters_protected_mode_and_loads_descriptor_from_gdt() {
    let mut cpu = rom_only_cpu();
    cpu.eip = 0;
    cpu.control[0] = CR0_PE;

    // LGDT [0x2000]: `0F 01 /2`, ModR/M `00_010_110` selects the 16-bit
    // disp16-direct form, so the 6-byte pseudo-descriptor can live
    // anywhere in the ROM window without a 0x67 override.
    cpu.load_rom_bytes(0x0000, &[0x0F, 0x01, 0x16, 0x00, 0x20]);
    // Pseudo-descriptor: limit 0x0FFF, base 0x0001_0000 (this crate's RAM span).
    cpu.load_rom_bytes(0x2000, &[0xFF, 0x0F, 0x00, 0x00, 0x01, 0x00]);

    // First far jump, `JMP FAR 0008:00000100`: executed while still in
    // real mode, so the CS load below happens before the mode switch
    // (the segment load always uses the *pre-jump* mode, per the
    // original's `jmp_far` — loading the descriptor and updating the
    // mode are two separate steps, in that order). This jump only
    // flips CR0.PE's effect into `mode`; the CS descriptor it installs
    // is still the real-mode synthesized one.
    cpu.load_rom_bytes(0x0005, &[0xEA, 0x00, 0x01, 0x00, 0x00, 0x08, 0x00]);

    // Second far jump, `JMP FAR 0008:00000000`, placed where the first
    // jump lands: protected-mode translation is `cs_base + offset`, and
    // CS.base is 0x0008 << 4 = 0x80 after the first jump, so offset
    // 0x100 resolves to ROM address 0x180.
    cpu.load_rom_bytes(0x180, &[0xEA, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00]);

    // The GDT entry for selector 0x0008 (index 1), written directly
    // into RAM at the base LGDT will load: base 0x0003_0000, limit
    // 0x0FFF, access 0x9A, flags 0x4 (default operand/address size 32).
    cpu.write_dword(0x1_0008, 0x0000_0FFF);
    cpu.write_dword(0x1_000C, 0x0040_9A03);

    assert_eq!(cpu.step(), Outcome::Success, "LGDT");
    assert_eq!(cpu.gdtr.base, 0x0001_0000);
    assert_eq!(cpu.gdtr.limit, 0x0FFF);

    assert_eq!(cpu.step(), Outcome::Success, "first far jump: real -> protected");
    assert_eq!(cpu.mode, Mode::Protected);
    assert_eq!(cpu.eip, 0x0000_0100);
    assert_eq!(cpu.segments[Segment::Cs as usize].descriptor.base, 0x0008 << 4);

    assert_eq!(cpu.step(), Outcome::Success, "second far jump: CS reloaded from the GDT");
    assert_eq!(cpu.mode, Mode::Protected);
    assert_eq!(cpu.eip, 0x0000_0000);
    let cs = &cpu.segments[Segment::Cs as usize];
    assert_eq!(cs.selector, 0x0008);
    assert_eq!(cs.descriptor.base, 0x0003_0000);
    assert_eq!(cs.descriptor.limit, 0x0FFF);
    assert_eq!(cs.descriptor.access, 0x9A);
    assert!(cs.descriptor.default_size_32);
}
