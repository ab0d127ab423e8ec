//! Portable low-level IR used as the back end of the code generator.
//!
//! The emitter is a thin macro-assembler: callers push operations, allocate
//! labels and register jumps against them, and obtain an executable
//! [`Program`] at the end. It performs no instruction selection or register
//! allocation of its own; the lowering passes in [`crate::translate`] are
//! responsible for respecting the scratch-register conventions.

pub mod display;
pub mod emitter;
pub mod instruction;

pub use emitter::{Emitter, JumpId, Label, Program};
pub use instruction::{
    Arg, ArgPair, AtomicOp, BinaryOp, CallSig, Cond, FReg, Helper, LirInst, Reg, UnaryOp, ZeroOp,
};

/// Word size of the target the code is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    W32,
    W64,
}

/// Static description of the target machine.
///
/// The lowering consults this instead of compile-time configuration so a
/// single build can generate (and test) code for several target shapes.
#[derive(Debug, Clone)]
pub struct Target {
    pub word: WordSize,
    pub big_endian: bool,
    /// Hardware masks variable shift counts to the operation width.
    pub masked_shift: bool,
    /// Register the architecture requires variable shift counts in
    /// (CL on x86); `None` when any register works.
    pub pref_shift_reg: Option<Reg>,
    /// Binary operations accept two memory operands.
    pub two_mem_operands: bool,
    /// Conditional moves are available.
    pub has_cmov: bool,
}

impl Target {
    #[must_use]
    pub fn w64_le() -> Self {
        Self {
            word: WordSize::W64,
            big_endian: false,
            masked_shift: true,
            pref_shift_reg: None,
            two_mem_operands: false,
            has_cmov: true,
        }
    }

    /// Generic 32-bit little-endian RISC shape: no preferred shift
    /// register, shift counts not masked by hardware, no conditional move.
    #[must_use]
    pub fn w32_le() -> Self {
        Self {
            word: WordSize::W32,
            big_endian: false,
            masked_shift: false,
            pref_shift_reg: None,
            two_mem_operands: false,
            has_cmov: false,
        }
    }

    /// 32-bit x86 shape: counts live in a dedicated shift register, the
    /// hardware masks them, and two memory operands are tolerated.
    #[must_use]
    pub fn w32_x86() -> Self {
        Self {
            word: WordSize::W32,
            big_endian: false,
            masked_shift: true,
            pref_shift_reg: Some(Reg::R2),
            two_mem_operands: true,
            has_cmov: true,
        }
    }

    #[must_use]
    pub fn w32_be() -> Self {
        Self {
            big_endian: true,
            ..Self::w32_le()
        }
    }

    #[must_use]
    pub fn is_32bit(&self) -> bool {
        self.word == WordSize::W32
    }

    #[must_use]
    pub fn is_64bit(&self) -> bool {
        self.word == WordSize::W64
    }

    /// Byte offset of the low half of an `i64` within its frame slot.
    #[must_use]
    pub fn word_low_offset(&self) -> i32 {
        if self.big_endian { 4 } else { 0 }
    }

    /// Byte offset of the high half of an `i64` within its frame slot.
    #[must_use]
    pub fn word_high_offset(&self) -> i32 {
        if self.big_endian { 0 } else { 4 }
    }
}
