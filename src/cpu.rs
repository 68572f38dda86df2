//! The CPU: all architectural state plus the fetch-decode-execute step driver (spec §3, §4.6).
//!
//! Follows `cpu-m68k`'s `Cpu68000` layout — one struct owning registers,
//! memory, and mode, with `step` as the single public entry point that
//! drives everything else. Unlike the teacher's cycle-accurate pipeline
//! (IR/IRC prefetch, a followup-tag state machine), this core executes
//! one instruction to completion per `step`, in the spirit of its own
//! doc note about "instant execute" designs.

use crate::alu::Size;
use crate::eflags::EFlags;
use crate::memory::{linear_address, Memory, MemoryError, Mode};
use crate::registers::{
    Ldtr, Registers, Segment, SegmentRegister, TableRegister, CONTROL_REGISTER_COUNT, SEGMENT_COUNT,
};

/// CR0.PE: protection enable.
pub const CR0_PE: u32 = 1 << 0;

/// Result of a single [`Cpu::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The instruction executed and architectural state was updated.
    Success,
    /// `HLT` just executed, or the CPU was already halted and `step`
    /// was a no-op.
    Halted,
    /// The fetched byte sequence does not decode to any instruction this
    /// core understands.
    Undefined,
    /// A reserved control register was targeted, or another condition
    /// this core treats as fatal rather than silently ignoring.
    Fatal,
}

/// All architectural state: general registers, segment registers and
/// their shadow descriptors, control registers, EFLAGS, the instruction
/// pointer, and the two memory spans.
#[derive(Debug, Clone)]
pub struct Cpu {
    pub regs: Registers,
    pub segments: [SegmentRegister; SEGMENT_COUNT],
    pub control: [u32; CONTROL_REGISTER_COUNT],
    pub eflags: EFlags,
    pub eip: u32,
    pub halted: bool,
    pub gdtr: TableRegister,
    pub idtr: TableRegister,
    pub ldtr: Ldtr,
    pub mode: Mode,
    pub(crate) mem: Memory,
}

impl Cpu {
    /// Allocate a CPU with zero-filled ROM/RAM spans (both bounds inclusive)
    /// and reset it to its power-on state.
    pub fn create(rom_base: u32, rom_end: u32, ram_base: u32, ram_end: u32) -> Result<Self, MemoryError> {
        let mem = Memory::new(rom_base, rom_end, ram_base, ram_end)?;
        let mut cpu = Self {
            regs: Registers::new(),
            segments: [SegmentRegister::default(); SEGMENT_COUNT],
            control: [0; CONTROL_REGISTER_COUNT],
            eflags: EFlags::new(),
            eip: 0,
            halted: false,
            gdtr: TableRegister::default(),
            idtr: TableRegister::default(),
            ldtr: Ldtr::default(),
            mode: Mode::Real,
            mem,
        };
        cpu.reset();
        Ok(cpu)
    }

    /// Power-on reset (spec §4.1): general registers cleared, EFLAGS to
    /// its reset value, CR0.PE cleared (real mode), CS loaded with the
    /// reset-vector selector/base and EIP set so the first fetch lands
    /// at the top of the ROM window (`0xFFFFFFF0` offset within CS).
    pub fn reset(&mut self) {
        self.regs = Registers::new();
        self.eflags = EFlags::new();
        self.control = [0; CONTROL_REGISTER_COUNT];
        self.mode = Mode::Real;
        self.halted = false;
        self.gdtr = TableRegister::default();
        self.idtr = TableRegister::default();
        self.ldtr = Ldtr::default();

        for seg in &mut self.segments {
            *seg = SegmentRegister::default();
        }
        let cs = &mut self.segments[Segment::Cs as usize];
        cs.selector = 0xF000;
        cs.descriptor.base = 0xFFFF_0000;
        cs.descriptor.limit = 0xFFFF;

        self.eip = 0x0000_FFF0;
    }

    pub fn load_rom_bytes(&mut self, offset: u32, bytes: &[u8]) {
        self.mem.load_rom(offset, bytes);
    }

    pub fn load_ram_bytes(&mut self, offset: u32, bytes: &[u8]) {
        self.mem.load_ram(offset, bytes);
    }

    #[must_use]
    pub fn read_byte(&self, address: u32) -> u8 {
        self.mem.read_byte(address)
    }

    #[must_use]
    pub fn read_word(&self, address: u32) -> u16 {
        self.mem.read_word(address)
    }

    #[must_use]
    pub fn read_dword(&self, address: u32) -> u32 {
        self.mem.read_dword(address)
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        self.mem.write_byte(address, value);
    }

    pub fn write_word(&mut self, address: u32, value: u16) {
        self.mem.write_word(address, value);
    }

    pub fn write_dword(&mut self, address: u32, value: u32) {
        self.mem.write_dword(address, value);
    }

    /// Read `size` bytes from a data address (no segment translation
    /// beyond the CS-based scheme used for every address in this core —
    /// see spec §4.2 and the Open Question resolution in `SPEC_FULL.md`).
    #[must_use]
    pub(crate) fn read_memory(&self, address: u32, size: Size) -> u32 {
        match size {
            Size::Byte => u32::from(self.read_byte(address)),
            Size::Word => u32::from(self.read_word(address)),
            Size::Dword => self.read_dword(address),
        }
    }

    pub(crate) fn write_memory(&mut self, address: u32, size: Size, value: u32) {
        match size {
            Size::Byte => self.write_byte(address, value as u8),
            Size::Word => self.write_word(address, value as u16),
            Size::Dword => self.write_dword(address, value),
        }
    }

    /// Translate a segment-relative offset into a linear memory address
    /// using the current mode and CS base. Every addressed access in this
    /// core — instruction fetch, ModR/M/SIB effective addresses, string
    /// operations, the stack — goes through this single function, mirroring
    /// `x86GetEffectiveAddress` in the source this core was distilled from,
    /// which does not distinguish data segments from the code segment.
    pub(crate) fn translate_offset(&self, offset: u32) -> u32 {
        let cs_base = self.segments[Segment::Cs as usize].descriptor.base;
        linear_address(self.mode, cs_base, self.mem.rom_end(), offset)
    }

    /// Linear address of `self.eip + counter`, the next unconsumed byte
    /// of the instruction currently being decoded.
    fn fetch_address(&self, counter: u32) -> u32 {
        self.translate_offset(self.eip.wrapping_add(counter))
    }

    pub(crate) fn fetch_u8(&mut self, counter: &mut u32) -> u8 {
        let b = self.read_byte(self.fetch_address(*counter));
        *counter += 1;
        b
    }

    pub(crate) fn fetch_u16(&mut self, counter: &mut u32) -> u16 {
        let lo = self.fetch_u8(counter);
        let hi = self.fetch_u8(counter);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    pub(crate) fn fetch_u32(&mut self, counter: &mut u32) -> u32 {
        let lo = self.fetch_u16(counter);
        let hi = self.fetch_u16(counter);
        u32::from(lo) | (u32::from(hi) << 16)
    }

    /// Load a segment register's shadow descriptor from the GDT given a
    /// selector (spec §4.5). In real mode the "descriptor" is synthesized
    /// from the selector itself (`base = selector << 4`, a 64 KiB limit);
    /// in protected mode it is read from the GDT at `gdtr.base + (selector & !7)`.
    pub(crate) fn load_segment(&mut self, seg: Segment, selector: u16) {
        let descriptor = match self.mode {
            Mode::Real => crate::registers::SegmentDescriptor {
                base: u32::from(selector) << 4,
                limit: 0xFFFF,
                access: 0,
                flags: 0,
                default_size_32: false,
            },
            Mode::Protected => self.read_gdt_descriptor(selector),
        };
        let reg = &mut self.segments[seg as usize];
        reg.selector = selector;
        reg.descriptor = descriptor;
    }

    pub(crate) fn read_gdt_descriptor(&self, selector: u16) -> crate::registers::SegmentDescriptor {
        let index = u32::from(selector) & !0b111;
        let entry_addr = self.gdtr.base.wrapping_add(index);
        let low = self.mem.read_dword(entry_addr);
        let high = self.mem.read_dword(entry_addr.wrapping_add(4));

        let limit_low = low & 0xFFFF;
        let base_low = (low >> 16) & 0xFFFF;
        let base_mid = high & 0xFF;
        let access = ((high >> 8) & 0xFF) as u8;
        let limit_high = (high >> 16) & 0xF;
        let flags = ((high >> 20) & 0xF) as u8;
        let base_high = (high >> 24) & 0xFF;

        let base = base_low | (base_mid << 16) | (base_high << 24);
        let limit = limit_low | (limit_high << 16);
        let default_size_32 = flags & 0b0100 != 0;

        crate::registers::SegmentDescriptor { base, limit, access, flags, default_size_32 }
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Human-readable register/flag dump, for tests and debugging tools.
    #[must_use]
    pub fn dump_registers(&self) -> String {
        format!(
            "EAX={:08X} ECX={:08X} EDX={:08X} EBX={:08X}\n\
             ESP={:08X} EBP={:08X} ESI={:08X} EDI={:08X}\n\
             EIP={:08X} EFLAGS={:08X} CS={:04X} MODE={:?}",
            self.regs.get32(crate::registers::EAX),
            self.regs.get32(crate::registers::ECX),
            self.regs.get32(crate::registers::EDX),
            self.regs.get32(crate::registers::EBX),
            self.regs.get32(crate::registers::ESP),
            self.regs.get32(crate::registers::EBP),
            self.regs.get32(crate::registers::ESI),
            self.regs.get32(crate::registers::EDI),
            self.eip,
            self.eflags.bits(),
            self.segments[Segment::Cs as usize].selector,
            self.mode,
        )
    }

    /// Fetch, decode, and execute exactly one instruction.
    pub fn step(&mut self) -> Outcome {
        if self.halted {
            return Outcome::Halted;
        }
        crate::decode::decode_and_execute(self)
    }
}
