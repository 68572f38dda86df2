//! Prefix scan, default operand/address size selection, and opcode
//! dispatch (spec §4.5).
//!
//! Grounded in `original_source/src/cpu.c`'s `x86CPUExecute` /
//! `decode_one_byte_opcode` / `decode_opcode` / `decode_extended_opcode`:
//! the same three-tier shape (prefix loop, then a one-byte table, then a
//! general ALU-family fallthrough keyed on the opcode's low 6 bits)
//! survives here, generalized to the distilled spec's opcode surface.
//! Instructions the source never implements (ADC/SBB, XCHG, STOS,
//! LOOP*, MOVSX, LLDT, PUSH/POP) are dispatched the same way their
//! neighbors are, even though their bodies in `execute.rs` are written
//! fresh.

use crate::addressing::{ModRm, OperandKind};
use crate::alu::{alu, AluOp, Size};
use crate::cpu::{Cpu, Outcome};
use crate::execute::{condition_holds, io_read};
use crate::memory::Mode;
use crate::registers::{Segment, EAX, EDX};

#[derive(Debug, Clone, Copy, Default)]
struct Prefixes {
    operand_override: bool,
    address_override: bool,
    rep: bool,
    escape_0f: bool,
    #[allow(dead_code)] // segment overrides are scanned but not modeled (spec §9, §10.6)
    segment_override: Option<Segment>,
}

/// Fetch, decode, and execute exactly one instruction. The single entry
/// point `Cpu::step` calls into.
pub(crate) fn decode_and_execute(cpu: &mut Cpu) -> Outcome {
    let mut counter: u32 = 0;
    let mut prefixes = Prefixes::default();
    let mut opcode = 0u8;
    let mut found_opcode = false;

    for _ in 0..15 {
        let byte = cpu.fetch_u8(&mut counter);
        match byte {
            0x66 => prefixes.operand_override = true,
            0x67 => prefixes.address_override = true,
            0xF3 => prefixes.rep = true,
            0x0F => prefixes.escape_0f = true,
            0x26 => prefixes.segment_override = Some(Segment::Es),
            0x2E => prefixes.segment_override = Some(Segment::Cs),
            0x36 => prefixes.segment_override = Some(Segment::Ss),
            0x3E => prefixes.segment_override = Some(Segment::Ds),
            0x64 => prefixes.segment_override = Some(Segment::Fs),
            0x65 => prefixes.segment_override = Some(Segment::Gs),
            other => {
                opcode = other;
                found_opcode = true;
                break;
            }
        }
    }

    if !found_opcode {
        // 15 prefix bytes with no terminating opcode: decode failure.
        // EIP is left untouched, as for any other undefined sequence.
        return Outcome::Undefined;
    }

    let (operand_size, address_size) = default_sizes(cpu, &prefixes);

    if prefixes.escape_0f {
        return decode_0f(cpu, opcode, operand_size, address_size, &mut counter);
    }

    if prefixes.rep && matches!(opcode, 0xA4 | 0xA5) {
        let size = if opcode == 0xA4 { Size::Byte } else { operand_size };
        cpu.exec_rep_movs(size);
        cpu.eip = cpu.eip.wrapping_add(counter);
        return Outcome::Success;
    }

    if let Some(outcome) = decode_one_byte(cpu, opcode, operand_size, address_size, &mut counter) {
        return outcome;
    }

    decode_general_alu(cpu, opcode, operand_size, address_size, &mut counter)
}

/// Default operand/address sizes (spec §4.5): 32-bit in protected mode
/// with `CS.default_size_32` set, 16-bit otherwise, each flipped by its
/// `66`/`67` override prefix.
fn default_sizes(cpu: &Cpu, prefixes: &Prefixes) -> (Size, u32) {
    let default_32 =
        cpu.mode == Mode::Protected && cpu.segments[Segment::Cs as usize].descriptor.default_size_32;

    let operand_size = match (default_32, prefixes.operand_override) {
        (true, false) | (false, true) => Size::Dword,
        (true, true) | (false, false) => Size::Word,
    };
    let address_size: u32 = match (default_32, prefixes.address_override) {
        (true, false) | (false, true) => 4,
        (true, true) | (false, false) => 2,
    };

    (operand_size, address_size)
}

fn fetch_sized(cpu: &mut Cpu, size: Size, counter: &mut u32) -> u32 {
    match size {
        Size::Byte => u32::from(cpu.fetch_u8(counter)),
        Size::Word => u32::from(cpu.fetch_u16(counter)),
        Size::Dword => cpu.fetch_u32(counter),
    }
}

fn fetch_signed(cpu: &mut Cpu, size: Size, counter: &mut u32) -> i32 {
    match size {
        Size::Byte => cpu.fetch_u8(counter) as i8 as i32,
        Size::Word => cpu.fetch_u16(counter) as i16 as i32,
        Size::Dword => cpu.fetch_u32(counter) as i32,
    }
}

/// The `0F`-escape table (spec §6): descriptor table loads, control
/// register moves, near `Jcc`, and `MOVZX`/`MOVSX`.
fn decode_0f(cpu: &mut Cpu, opcode: u8, operand_size: Size, address_size: u32, counter: &mut u32) -> Outcome {
    match opcode {
        // LLDT r/m16 (reg=2). Other sub-ops of the 0F 00 group (SLDT,
        // LTR, VERR/VERW) are not part of this core's opcode surface.
        0x00 => {
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            if modrm.reg != 0b010 {
                return Outcome::Undefined;
            }
            let resolved = cpu.resolve_modrm(modrm, address_size, Size::Word, counter);
            cpu.exec_lldt(resolved.value as u16);
            cpu.eip = cpu.eip.wrapping_add(*counter);
            Outcome::Success
        }
        // LGDT (reg=2) / LIDT (reg=3).
        0x01 => {
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            let is_gdt = match modrm.reg {
                0b010 => true,
                0b011 => false,
                _ => return Outcome::Undefined,
            };
            let resolved = cpu.resolve_modrm(modrm, address_size, operand_size, counter);
            let OperandKind::Indirect(addr) = resolved.kind else {
                return Outcome::Undefined;
            };
            cpu.exec_load_table_register(addr, operand_size, is_gdt);
            cpu.eip = cpu.eip.wrapping_add(*counter);
            Outcome::Success
        }
        // INVD / WBINVD / WRMSR: modeled as no-ops (spec §6).
        0x08 | 0x09 | 0x30 => {
            cpu.eip = cpu.eip.wrapping_add(*counter);
            Outcome::Success
        }
        0x20 => {
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            let outcome = cpu.exec_mov_control_register(modrm, false);
            if outcome == Outcome::Success {
                cpu.eip = cpu.eip.wrapping_add(*counter);
            }
            outcome
        }
        0x22 => {
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            let outcome = cpu.exec_mov_control_register(modrm, true);
            if outcome == Outcome::Success {
                cpu.eip = cpu.eip.wrapping_add(*counter);
            }
            outcome
        }
        // Jcc rel16/32, near form.
        0x80..=0x8F => {
            let offset = fetch_signed(cpu, operand_size, counter);
            if condition_holds(opcode, cpu.eflags) {
                cpu.apply_relative_jump(*counter, offset);
            } else {
                cpu.eip = cpu.eip.wrapping_add(*counter);
            }
            Outcome::Success
        }
        0xB6 | 0xB7 => {
            let src_size = if opcode == 0xB6 { Size::Byte } else { Size::Word };
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            let resolved = cpu.resolve_modrm(modrm, address_size, src_size, counter);
            cpu.exec_move_extend(modrm.reg, resolved.value, src_size, operand_size, false);
            cpu.eip = cpu.eip.wrapping_add(*counter);
            Outcome::Success
        }
        0xBE | 0xBF => {
            let src_size = if opcode == 0xBE { Size::Byte } else { Size::Word };
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            let resolved = cpu.resolve_modrm(modrm, address_size, src_size, counter);
            cpu.exec_move_extend(modrm.reg, resolved.value, src_size, operand_size, true);
            cpu.eip = cpu.eip.wrapping_add(*counter);
            Outcome::Success
        }
        _ => Outcome::Undefined,
    }
}

/// The enumerated one-byte opcode table (spec §6), everything that
/// isn't part of the general ALU-family dispatch. Returns `None` to
/// fall through to [`decode_general_alu`].
fn decode_one_byte(
    cpu: &mut Cpu,
    opcode: u8,
    operand_size: Size,
    address_size: u32,
    counter: &mut u32,
) -> Option<Outcome> {
    match opcode {
        0x40..=0x47 => {
            cpu.exec_inc_dec_reg(opcode & 7, operand_size, AluOp::Inc);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0x48..=0x4F => {
            cpu.exec_inc_dec_reg(opcode & 7, operand_size, AluOp::Dec);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0x50..=0x57 => {
            cpu.exec_push_reg(opcode & 7, operand_size);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0x58..=0x5F => {
            cpu.exec_pop_reg(opcode & 7, operand_size);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0x70..=0x7F => {
            let offset = fetch_signed(cpu, Size::Byte, counter);
            if condition_holds(opcode, cpu.eflags) {
                cpu.apply_relative_jump(*counter, offset);
            } else {
                commit(cpu, counter);
            }
            Some(Outcome::Success)
        }
        0x8E => {
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            let Some(seg) = Segment::from_index(modrm.reg) else {
                return Some(Outcome::Undefined);
            };
            let resolved = cpu.resolve_modrm(modrm, address_size, Size::Word, counter);
            cpu.load_segment(seg, resolved.value as u16);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0x90 => {
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0x91..=0x97 => {
            cpu.exec_xchg(EAX, OperandKind::Register(opcode & 7), operand_size);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xA0 | 0xA1 => {
            let addr_size = Size::from_bytes(address_size).expect("address_size is 2 or 4");
            let offset = fetch_sized(cpu, addr_size, counter);
            let linear = cpu.translate_offset(offset);
            let size = if opcode == 0xA0 { Size::Byte } else { operand_size };
            let value = cpu.read_memory(linear, size);
            cpu.regs.set(EAX, size, value);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xA4 => {
            cpu.exec_movs_once(Size::Byte);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xA5 => {
            cpu.exec_movs_once(operand_size);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xAA => {
            cpu.exec_stos_once(Size::Byte);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xAB => {
            cpu.exec_stos_once(operand_size);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xB0..=0xB7 => {
            let reg = opcode & 7;
            let imm = cpu.fetch_u8(counter);
            cpu.regs.set(reg, Size::Byte, u32::from(imm));
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xB8..=0xBF => {
            let reg = opcode & 7;
            let imm = fetch_sized(cpu, operand_size, counter);
            cpu.regs.set(reg, operand_size, imm);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xC0 | 0xC1 => {
            let width = if opcode == 0xC0 { Size::Byte } else { operand_size };
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            let resolved = cpu.resolve_modrm(modrm, address_size, width, counter);
            let amount = cpu.fetch_u8(counter);
            let left = match modrm.reg {
                0b100 => true,
                0b101 => false,
                _ => return Some(Outcome::Undefined),
            };
            cpu.exec_shift(resolved.kind, resolved.value, width, amount, left);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xE0 => {
            let offset = fetch_signed(cpu, Size::Byte, counter);
            cpu.exec_loop(*counter, offset, Some(false));
            Some(Outcome::Success)
        }
        0xE1 => {
            let offset = fetch_signed(cpu, Size::Byte, counter);
            cpu.exec_loop(*counter, offset, Some(true));
            Some(Outcome::Success)
        }
        0xE2 => {
            let offset = fetch_signed(cpu, Size::Byte, counter);
            cpu.exec_loop(*counter, offset, None);
            Some(Outcome::Success)
        }
        0xE4 => {
            let port = cpu.fetch_u8(counter);
            let value = io_read(u32::from(port));
            cpu.regs.set(EAX, Size::Byte, value);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xE5 => {
            let port = cpu.fetch_u8(counter);
            let value = io_read(u32::from(port));
            cpu.regs.set(EAX, operand_size, value);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xE6 | 0xE7 => {
            let _port = cpu.fetch_u8(counter); // OUT is a no-op stub (spec §6)
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xE9 => {
            let offset = fetch_signed(cpu, operand_size, counter);
            cpu.apply_relative_jump(*counter, offset);
            Some(Outcome::Success)
        }
        0xEA => {
            let offset = cpu.fetch_u32(counter);
            let selector = cpu.fetch_u16(counter);
            cpu.exec_far_jump(offset, selector);
            Some(Outcome::Success)
        }
        0xEB => {
            let offset = fetch_signed(cpu, Size::Byte, counter);
            cpu.apply_relative_jump(*counter, offset);
            Some(Outcome::Success)
        }
        0xEC => {
            let port = cpu.regs.get(EDX, Size::Word);
            let value = io_read(port);
            cpu.regs.set(EAX, Size::Byte, value);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xED => {
            let port = cpu.regs.get(EDX, Size::Word);
            let value = io_read(port);
            cpu.regs.set(EAX, operand_size, value);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xEE | 0xEF => {
            commit(cpu, counter); // OUT DX, AL/eAX: no-op stub
            Some(Outcome::Success)
        }
        0xF4 => {
            cpu.halted = true;
            commit(cpu, counter);
            Some(Outcome::Halted)
        }
        0xFA => {
            cpu.eflags.set_interrupt_enabled(false);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xFB => {
            cpu.eflags.set_interrupt_enabled(true);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xFC => {
            cpu.eflags.set_df(false);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xFD => {
            cpu.eflags.set_df(true);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        0xFE => {
            let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
            let resolved = cpu.resolve_modrm(modrm, address_size, Size::Byte, counter);
            let op = match modrm.reg {
                0b000 => AluOp::Inc,
                0b001 => AluOp::Dec,
                _ => return Some(Outcome::Undefined),
            };
            let (result, flags) = alu(op, resolved.value, 1, Size::Byte, cpu.eflags);
            cpu.eflags = flags;
            cpu.write_back(resolved.kind, Size::Byte, result);
            commit(cpu, counter);
            Some(Outcome::Success)
        }
        _ => None,
    }
}

fn commit(cpu: &mut Cpu, counter: &u32) {
    cpu.eip = cpu.eip.wrapping_add(*counter);
}

/// The general 6-bit ALU-family dispatch (spec §4.5, §6): `ADD/OR/AND/
/// SUB/XOR/CMP` each claim 8 opcodes (`base..base+7`) — the four
/// ModR/M direction/size forms (`+0..+3`) and the two accumulator-
/// immediate forms (`+4`/`+5`, AL/eAX vs imm8/imm); `+6`/`+7` are
/// unused (real ISA's segment push/pop, not part of this core). Then
/// the `80..83` immediate group, `XCHG`, `MOV`, and `JMP r/m` (`FF /4`).
fn decode_general_alu(cpu: &mut Cpu, opcode: u8, operand_size: Size, address_size: u32, counter: &mut u32) -> Outcome {
    if opcode & 0xFC == 0x80 {
        return decode_immediate_group(cpu, opcode, operand_size, address_size, counter);
    }

    if opcode == 0xFF {
        let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
        if modrm.reg != 0b100 {
            return Outcome::Undefined;
        }
        let resolved = cpu.resolve_modrm(modrm, address_size, operand_size, counter);
        cpu.eip = resolved.value;
        return Outcome::Success;
    }

    let alu_op = match opcode & 0xF8 {
        0x00 => Some(AluOp::Add),
        0x08 => Some(AluOp::Or),
        0x20 => Some(AluOp::And),
        0x28 => Some(AluOp::Sub),
        0x30 => Some(AluOp::Xor),
        0x38 => Some(AluOp::Cmp),
        _ => None,
    };

    if let Some(op) = alu_op {
        return match opcode & 0x07 {
            sub @ 0..=3 => exec_alu_modrm(cpu, op, sub, operand_size, address_size, counter),
            4 | 5 => exec_alu_accumulator(cpu, op, opcode, operand_size, counter),
            _ => Outcome::Undefined,
        };
    }

    if !matches!(opcode & 0xFC, 0x88 | 0x84) {
        return Outcome::Undefined;
    }

    let width = if opcode & 1 == 0 { Size::Byte } else { operand_size };
    let direction_bit = (opcode >> 1) & 1;
    let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
    let resolved = cpu.resolve_modrm(modrm, address_size, width, counter);

    match opcode & 0xFC {
        0x88 => {
            if direction_bit == 0 {
                let reg_value = cpu.regs.get(modrm.reg, width);
                cpu.write_back(resolved.kind, width, reg_value);
            } else {
                cpu.regs.set(modrm.reg, width, resolved.value);
            }
            cpu.eip = cpu.eip.wrapping_add(*counter);
            Outcome::Success
        }
        0x84 => {
            cpu.exec_xchg(modrm.reg, resolved.kind, width);
            cpu.eip = cpu.eip.wrapping_add(*counter);
            Outcome::Success
        }
        _ => unreachable!("checked above"),
    }
}

/// The ModR/M direction/size quadrant (`sub` 0..=3) of an ALU family.
fn exec_alu_modrm(cpu: &mut Cpu, op: AluOp, sub: u8, operand_size: Size, address_size: u32, counter: &mut u32) -> Outcome {
    let width = if sub & 1 == 0 { Size::Byte } else { operand_size };
    let direction_bit = (sub >> 1) & 1;

    let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
    let resolved = cpu.resolve_modrm(modrm, address_size, width, counter);
    let reg_value = cpu.regs.get(modrm.reg, width);

    let (dest_kind, dest_val, src_val) = if direction_bit == 0 {
        (resolved.kind, resolved.value, reg_value)
    } else {
        (OperandKind::Register(modrm.reg), reg_value, resolved.value)
    };
    let (result, flags) = alu(op, dest_val, src_val, width, cpu.eflags);
    cpu.eflags = flags;
    if op != AluOp::Cmp {
        cpu.write_back(dest_kind, width, result);
    }
    cpu.eip = cpu.eip.wrapping_add(*counter);
    Outcome::Success
}

/// The accumulator-immediate quadrant (`+4`/`+5`) of an ALU family:
/// `AL, imm8` or `eAX, imm(operand_size)`.
fn exec_alu_accumulator(cpu: &mut Cpu, op: AluOp, opcode: u8, operand_size: Size, counter: &mut u32) -> Outcome {
    let width = if opcode & 1 == 0 { Size::Byte } else { operand_size };
    let imm = fetch_sized(cpu, width, counter);
    let acc = cpu.regs.get(EAX, width);
    let (result, flags) = alu(op, acc, imm, width, cpu.eflags);
    cpu.eflags = flags;
    if op != AluOp::Cmp {
        cpu.regs.set(EAX, width, result);
    }
    cpu.eip = cpu.eip.wrapping_add(*counter);
    Outcome::Success
}

/// `80..83 /digit imm` (spec §6): the immediate ALU group, `digit`
/// selecting the operation from the ModR/M `reg` field.
fn decode_immediate_group(
    cpu: &mut Cpu,
    opcode: u8,
    operand_size: Size,
    address_size: u32,
    counter: &mut u32,
) -> Outcome {
    let size_bit = opcode & 1;
    let sign_extend_imm8 = (opcode >> 1) & 1 == 1;
    let width = if size_bit == 0 { Size::Byte } else { operand_size };
    let imm_size = if sign_extend_imm8 { Size::Byte } else { width };

    let modrm = ModRm::from_byte(cpu.fetch_u8(counter));
    let resolved = cpu.resolve_modrm(modrm, address_size, width, counter);

    let raw_imm = fetch_sized(cpu, imm_size, counter);
    let imm = if imm_size == Size::Byte && width != Size::Byte {
        width.truncate((raw_imm as i8 as i32) as u32)
    } else {
        raw_imm
    };

    let op = match modrm.reg {
        0b000 => AluOp::Add,
        0b001 => AluOp::Or,
        0b010 => AluOp::Adc,
        0b011 => AluOp::Sbb,
        0b100 => AluOp::And,
        0b101 => AluOp::Sub,
        0b110 => AluOp::Xor,
        0b111 => AluOp::Cmp,
        _ => unreachable!("3-bit ModR/M reg field"),
    };

    let (result, flags) = alu(op, resolved.value, imm, width, cpu.eflags);
    cpu.eflags = flags;
    if op != AluOp::Cmp {
        cpu.write_back(resolved.kind, width, result);
    }
    cpu.eip = cpu.eip.wrapping_add(*counter);
    Outcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{Segment as Seg, ECX, ESP};

    fn test_cpu() -> Cpu {
        // ROM holds the code under test at its base (0); RAM backs the
        // stack/data span used by PUSH/POP/string-op tests.
        let mut cpu = Cpu::create(0, 0xFFF, 0x1000, 0x1FFF).unwrap();
        cpu.mode = Mode::Protected;
        cpu.segments[Seg::Cs as usize].descriptor.base = 0;
        cpu.segments[Seg::Cs as usize].descriptor.default_size_32 = true;
        cpu.eip = 0;
        cpu
    }

    #[test]
    fn add_al_imm8_sets_flags_and_advances_eip() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0x04, 0x01]); // ADD AL, 1
        cpu.regs.set(EAX, Size::Byte, 0xFF);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.regs.get(EAX, Size::Byte), 0x00);
        assert!(cpu.eflags.cf());
        assert!(cpu.eflags.zf());
        assert_eq!(cpu.eip, 2);
    }

    #[test]
    fn sub_eax_imm32_borrows() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0x2D, 0x01, 0x00, 0x00, 0x00]); // SUB EAX, 1
        cpu.regs.set32(EAX, 0);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.regs.get32(EAX), 0xFFFF_FFFF);
        assert!(cpu.eflags.cf());
        assert_eq!(cpu.eip, 5);
    }

    #[test]
    fn push_pop_round_trips_through_ram() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0x50, 0x5B]); // PUSH EAX; POP EBX
        cpu.regs.set32(EAX, 0xCAFEBABE);
        cpu.regs.set32(ESP, 0x1800);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.eip, 1);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.regs.get32(crate::registers::EBX), 0xCAFEBABE);
        assert_eq!(cpu.regs.get32(ESP), 0x1800);
    }

    #[test]
    fn rep_movsb_copies_ecx_bytes_and_zeroes_it() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0xF3, 0xA4]); // REP MOVSB
        cpu.load_ram_bytes(0x100, b"hello");
        cpu.regs.set32(crate::registers::ESI, 0x1100);
        cpu.regs.set32(crate::registers::EDI, 0x1200);
        cpu.regs.set32(ECX, 5);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.eip, 2);
        assert_eq!(cpu.regs.get32(ECX), 0);
        for i in 0..5u32 {
            assert_eq!(cpu.read_byte(0x1200 + i), cpu.read_byte(0x1100 + i));
        }
    }

    #[test]
    fn jcc_not_taken_falls_through() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0x74, 0x10]); // JZ +0x10
        cpu.eflags.set_zf(false);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.eip, 2);
    }

    #[test]
    fn jcc_taken_adds_displacement_past_instruction() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0x74, 0x10]); // JZ +0x10
        cpu.eflags.set_zf(true);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.eip, 2 + 0x10);
    }

    #[test]
    fn undefined_opcode_leaves_eip_untouched() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0xF0]); // LOCK prefix, not modeled — undefined as an opcode
        let eip_before = cpu.eip;
        assert_eq!(cpu.step(), Outcome::Undefined);
        assert_eq!(cpu.eip, eip_before);
    }

    #[test]
    fn hlt_sets_halted_and_advances_past_itself() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0xF4]);
        assert_eq!(cpu.step(), Outcome::Halted);
        assert!(cpu.is_halted());
        assert_eq!(cpu.eip, 1);
        assert_eq!(cpu.step(), Outcome::Halted);
        assert_eq!(cpu.eip, 1);
    }

    #[test]
    fn mov_cr_reserved_register_faults_undefined() {
        let mut cpu = test_cpu();
        // 0F 22 /1: MOV CR1, EAX — reg field (bits 3..5 of ModRM) selects
        // the general register, rm field selects the control register.
        cpu.load_rom_bytes(0, &[0x0F, 0x22, 0b11_000_001]);
        let eip_before = cpu.eip;
        assert_eq!(cpu.step(), Outcome::Undefined);
        assert_eq!(cpu.eip, eip_before);
    }

    #[test]
    fn loop_decrements_ecx_and_branches_while_nonzero() {
        let mut cpu = test_cpu();
        cpu.load_rom_bytes(0, &[0xE2, 0xFE]); // LOOP $ (infinite if ECX>1, here just one step)
        cpu.regs.set32(ECX, 2);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.regs.get32(ECX), 1);
        assert_eq!(cpu.eip, 0); // branched back to itself: 2 + (-2)
    }

    #[test]
    fn shl_reg_with_count_32_masks_to_zero_bits() {
        let mut cpu = test_cpu();
        // C1 /4: SHL EAX, imm8; ModRM 11_100_000 selects EAX as r/m.
        cpu.load_rom_bytes(0, &[0xC1, 0b11_100_000, 32]);
        cpu.regs.set32(EAX, 0x1234_5678);
        assert_eq!(cpu.step(), Outcome::Success);
        // A count of 32 masks to 0 (IA-32 masks the count to 5 bits), not
        // a shift of 31 and not a panic.
        assert_eq!(cpu.regs.get32(EAX), 0x1234_5678);
    }

    #[test]
    fn shr_reg_with_count_beyond_32_masks_correctly() {
        let mut cpu = test_cpu();
        // C1 /5: SHR EAX, imm8; a count of 33 masks to 1.
        cpu.load_rom_bytes(0, &[0xC1, 0b11_101_000, 33]);
        cpu.regs.set32(EAX, 0x8000_0002);
        assert_eq!(cpu.step(), Outcome::Success);
        assert_eq!(cpu.regs.get32(EAX), 0x4000_0001);
    }
}
