//! A single-threaded functional emulator core for a subset of the
//! 32-bit x86 (IA-32) instruction set, sufficient to single-step
//! firmware images from reset through early initialization:
//! segment/descriptor-table setup, the real-to-protected mode
//! transition, string moves, and simple PCI-style port I/O.
//!
//! This crate covers the fetch-decode-execute pipeline itself: prefix
//! handling, ModR/M and SIB addressing resolution, the ALU with full
//! EFLAGS semantics, segment/descriptor machinery, and opcode dispatch.
//! ROM/RAM image loading, an interactive console, full mnemonic
//! formatting, the complete I/O device model, interrupts, paging, and
//! the FPU/SIMD surface are outside its scope — see each module's docs
//! for the boundary it actually draws.
//!
//! [`Cpu::step`] is the single entry point: fetch, decode, and execute
//! exactly one instruction, returning an [`Outcome`] rather than
//! panicking or erroring out from deep inside the pipeline.

pub mod addressing;
pub mod alu;
pub mod cpu;
mod decode;
pub mod disasm;
pub mod eflags;
mod execute;
pub mod memory;
pub mod registers;

pub use alu::{AluOp, Size};
pub use cpu::{Cpu, Outcome, CR0_PE};
pub use disasm::disassemble_at;
pub use eflags::EFlags;
pub use memory::{MemoryError, Mode};
pub use registers::{
    Ldtr, Registers, Segment, SegmentDescriptor, SegmentRegister, TableRegister, CONTROL_REGISTER_COUNT, EAX, EBP,
    EBX, ECX, EDI, EDX, ESI, ESP, SEGMENT_COUNT,
};
