//! Mnemonic projection (spec §4.6, §6, §9, §10.7).
//!
//! This is a projection, not a formatter: it names the instruction at a
//! given EIP and shows the raw bytes consumed, but does not resolve
//! ModR/M operands into assembly syntax or grow a full printer beyond
//! that contract. It takes a read-only borrow and performs its own
//! prefix/opcode scan rather than calling into `decode`, so it can
//! never mutate CPU state even by accident.

use crate::cpu::Cpu;

/// Render a `"<bytes>  MNEMONIC"` label for the instruction at `eip`.
/// Never mutates `cpu`.
#[must_use]
pub fn disassemble_at(cpu: &Cpu, eip: u32) -> String {
    let mut bytes = Vec::with_capacity(8);
    let mut offset = eip;
    let mut escape_0f = false;
    let mut rep = false;
    let mut opcode = None;

    for _ in 0..15 {
        let addr = cpu.translate_offset(offset);
        let byte = cpu.read_byte(addr);
        bytes.push(byte);
        offset = offset.wrapping_add(1);
        match byte {
            0x66 | 0x67 => {}
            0xF3 => rep = true,
            0x0F => escape_0f = true,
            0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 => {}
            other => {
                opcode = Some(other);
                break;
            }
        }
    }

    let mnemonic = match opcode {
        None => "??",
        Some(op) if escape_0f => mnemonic_0f(op),
        Some(op) if rep && matches!(op, 0xA4 | 0xA5) => "REP MOVS",
        Some(op) => mnemonic_one_byte(op),
    };

    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
    format!("{:<24}{mnemonic}", hex.join(" "))
}

fn mnemonic_0f(op: u8) -> &'static str {
    match op {
        0x00 => "LLDT",
        0x01 => "LGDT/LIDT",
        0x08 => "INVD",
        0x09 => "WBINVD",
        0x20 => "MOV r32, CRn",
        0x22 => "MOV CRn, r32",
        0x30 => "WRMSR",
        0x80..=0x8F => "Jcc (near)",
        0xB6 | 0xB7 => "MOVZX",
        0xBE | 0xBF => "MOVSX",
        _ => "??",
    }
}

fn mnemonic_one_byte(op: u8) -> &'static str {
    match op {
        0x00..=0x03 | 0x04 | 0x05 => "ADD",
        0x08..=0x0B | 0x0C | 0x0D => "OR",
        0x20..=0x23 | 0x24 | 0x25 => "AND",
        0x28..=0x2B | 0x2C | 0x2D => "SUB",
        0x30..=0x33 => "XOR",
        0x38..=0x3B | 0x3C | 0x3D => "CMP",
        0x40..=0x47 => "INC",
        0x48..=0x4F => "DEC",
        0x50..=0x57 => "PUSH",
        0x58..=0x5F => "POP",
        0x70..=0x7F => "Jcc",
        0x80..=0x83 => "<group1> r/m, imm",
        0x84..=0x87 => "XCHG",
        0x88..=0x8B => "MOV",
        0x8E => "MOV Sreg, r/m16",
        0x90 => "NOP",
        0x91..=0x97 => "XCHG eAX, r",
        0xA0 | 0xA1 => "MOV moffs",
        0xA4 => "MOVSB",
        0xA5 => "MOVS",
        0xAA => "STOSB",
        0xAB => "STOS",
        0xB0..=0xB7 => "MOV r8, imm8",
        0xB8..=0xBF => "MOV r, imm",
        0xC0 | 0xC1 => "SHL/SHR",
        0xE0 => "LOOPNE",
        0xE1 => "LOOPE",
        0xE2 => "LOOP",
        0xE4 | 0xE5 | 0xEC | 0xED => "IN",
        0xE6 | 0xE7 | 0xEE | 0xEF => "OUT",
        0xE9 => "JMP rel",
        0xEA => "JMP far",
        0xEB => "JMP rel8",
        0xF4 => "HLT",
        0xFA => "CLI",
        0xFB => "STI",
        0xFC => "CLD",
        0xFD => "STD",
        0xFE => "INC/DEC r/m8",
        0xFF => "JMP r/m",
        _ => "??",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Mode;
    use crate::registers::Segment;

    fn test_cpu() -> Cpu {
        let mut cpu = Cpu::create(0, 0xFFF, 0x1000, 0x1FFF).unwrap();
        cpu.mode = Mode::Protected;
        cpu.segments[Segment::Cs as usize].descriptor.base = 0;
        cpu
    }

    #[test]
    fn names_a_plain_instruction() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0x04, 0x01]);
        let text = disassemble_at(&cpu, 0);
        assert!(text.contains("04 01"));
        assert!(text.contains("ADD"));
    }

    #[test]
    fn does_not_mutate_cpu_state() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0xF4]);
        let eip_before = cpu.eip;
        let halted_before = cpu.is_halted();
        let _ = disassemble_at(&cpu, 0);
        assert_eq!(cpu.eip, eip_before);
        assert_eq!(cpu.is_halted(), halted_before);
    }

    #[test]
    fn reports_rep_movs_and_0f_escape() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0xF3, 0xA4]);
        assert!(disassemble_at(&cpu, 0).contains("REP MOVS"));

        cpu.load_rom_bytes(4, &[0x0F, 0xB6, 0xC0]);
        assert!(disassemble_at(&cpu, 4).contains("MOVZX"));
    }
}
