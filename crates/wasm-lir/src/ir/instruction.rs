//! Decoded-instruction data model consumed by the code generator.
//!
//! An [`Instruction`] carries an opcode from a closed enumeration, an
//! ordered operand list (inputs first, then outputs), and an opcode-shaped
//! payload. Instructions live in an arena owned by
//! [`super::Function`] and reference each other by index, never by
//! pointer, so the compare/branch back-references cannot form ownership
//! cycles.

/// Index of an instruction within its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrId(pub u32);

/// Index of a branch-target label within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelRef(pub u32);

/// An instruction operand. Inputs occupy positions `0..param_count`,
/// outputs the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Value produced by another instruction: an immediate constant, or
    /// the compare feeding a fused branch/select.
    Ref(InstrId),
    /// Stack-frame slot, in 4-byte units.
    Slot(u32),
}

/// Opcode-specific decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Const32(u32),
    Const64(u64),
    /// Static offset of a plain or atomic memory access.
    MemAccess { offset: u32 },
    MemoryInit { segment: u32 },
    DataDrop { segment: u32 },
    /// Operand width of a `select`, in bytes (4 or 8).
    Select { value_size: u32 },
    Branch { target: LabelRef },
}

impl Payload {
    #[must_use]
    pub fn mem_offset(&self) -> u32 {
        match self {
            Payload::MemAccess { offset } => *offset,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub payload: Payload,
}

/// Dispatch class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpGroup {
    Const,
    Binary,
    Unary,
    Convert,
    Compare,
    Select,
    Branch,
    Load,
    Store,
    Atomic,
    Memory,
}

/// The closed opcode set the code generator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Opcode {
    // Constants
    Const32,
    Const64,

    // i32 binary
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    // i64 binary
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // Bit counting
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I64Clz,
    I64Ctz,
    I64Popcnt,

    // Sign extensions
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    // Width conversions
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,

    // i32 comparisons
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // i64 comparisons
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    Select,

    // Control transfer within the decoded stream
    Jump,
    JumpIfTrue,
    JumpIfFalse,

    // Loads
    I32Load,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I64Load,
    I64Load8S,
    I64Load8U,
    I64Load16S,
    I64Load16U,
    I64Load32S,
    I64Load32U,
    F32Load,
    F64Load,

    // Stores
    I32Store,
    I32Store8,
    I32Store16,
    I64Store,
    I64Store8,
    I64Store16,
    I64Store32,
    F32Store,
    F64Store,

    // Atomic loads
    I32AtomicLoad,
    I32AtomicLoad8U,
    I32AtomicLoad16U,
    I64AtomicLoad,
    I64AtomicLoad8U,
    I64AtomicLoad16U,
    I64AtomicLoad32U,

    // Atomic stores
    I32AtomicStore,
    I32AtomicStore8,
    I32AtomicStore16,
    I64AtomicStore,
    I64AtomicStore8,
    I64AtomicStore16,
    I64AtomicStore32,

    // Atomic read-modify-write
    I32AtomicRmwAdd,
    I32AtomicRmw8AddU,
    I32AtomicRmw16AddU,
    I64AtomicRmwAdd,
    I64AtomicRmw8AddU,
    I64AtomicRmw16AddU,
    I64AtomicRmw32AddU,
    I32AtomicRmwSub,
    I32AtomicRmw8SubU,
    I32AtomicRmw16SubU,
    I64AtomicRmwSub,
    I64AtomicRmw8SubU,
    I64AtomicRmw16SubU,
    I64AtomicRmw32SubU,
    I32AtomicRmwAnd,
    I32AtomicRmw8AndU,
    I32AtomicRmw16AndU,
    I64AtomicRmwAnd,
    I64AtomicRmw8AndU,
    I64AtomicRmw16AndU,
    I64AtomicRmw32AndU,
    I32AtomicRmwOr,
    I32AtomicRmw8OrU,
    I32AtomicRmw16OrU,
    I64AtomicRmwOr,
    I64AtomicRmw8OrU,
    I64AtomicRmw16OrU,
    I64AtomicRmw32OrU,
    I32AtomicRmwXor,
    I32AtomicRmw8XorU,
    I32AtomicRmw16XorU,
    I64AtomicRmwXor,
    I64AtomicRmw8XorU,
    I64AtomicRmw16XorU,
    I64AtomicRmw32XorU,
    I32AtomicRmwXchg,
    I32AtomicRmw8XchgU,
    I32AtomicRmw16XchgU,
    I64AtomicRmwXchg,
    I64AtomicRmw8XchgU,
    I64AtomicRmw16XchgU,
    I64AtomicRmw32XchgU,

    // Atomic compare-exchange
    I32AtomicRmwCmpxchg,
    I32AtomicRmw8CmpxchgU,
    I32AtomicRmw16CmpxchgU,
    I64AtomicRmwCmpxchg,
    I64AtomicRmw8CmpxchgU,
    I64AtomicRmw16CmpxchgU,
    I64AtomicRmw32CmpxchgU,

    // Memory management
    MemorySize,
    MemoryGrow,
    MemoryInit,
    MemoryCopy,
    MemoryFill,
    DataDrop,
}

impl Opcode {
    #[must_use]
    pub fn group(self) -> OpGroup {
        use Opcode::{
            Const32, Const64, DataDrop, I32WrapI64, I64ExtendI32S, I64ExtendI32U, Jump,
            JumpIfFalse, JumpIfTrue, MemoryCopy, MemoryFill, MemoryGrow, MemoryInit, MemorySize,
            Select,
        };
        match self {
            Const32 | Const64 => OpGroup::Const,
            I32WrapI64 | I64ExtendI32S | I64ExtendI32U => OpGroup::Convert,
            Select => OpGroup::Select,
            Jump | JumpIfTrue | JumpIfFalse => OpGroup::Branch,
            MemorySize | MemoryGrow | MemoryInit | MemoryCopy | MemoryFill | DataDrop => {
                OpGroup::Memory
            }
            _ if self.is_compare() => OpGroup::Compare,
            _ if self.is_atomic() => OpGroup::Atomic,
            _ if self.is_load() => OpGroup::Load,
            _ if self.is_store() => OpGroup::Store,
            _ if self.is_unary() => OpGroup::Unary,
            _ => OpGroup::Binary,
        }
    }

    /// True when the instruction produces or consumes 32-bit values.
    #[must_use]
    pub fn is_32bit(self) -> bool {
        !matches!(
            self,
            Opcode::Const64
                | Opcode::I64Add
                | Opcode::I64Sub
                | Opcode::I64Mul
                | Opcode::I64DivS
                | Opcode::I64DivU
                | Opcode::I64RemS
                | Opcode::I64RemU
                | Opcode::I64And
                | Opcode::I64Or
                | Opcode::I64Xor
                | Opcode::I64Shl
                | Opcode::I64ShrS
                | Opcode::I64ShrU
                | Opcode::I64Rotl
                | Opcode::I64Rotr
                | Opcode::I64Clz
                | Opcode::I64Ctz
                | Opcode::I64Popcnt
                | Opcode::I64Extend8S
                | Opcode::I64Extend16S
                | Opcode::I64Extend32S
                | Opcode::I64Eqz
                | Opcode::I64Eq
                | Opcode::I64Ne
                | Opcode::I64LtS
                | Opcode::I64LtU
                | Opcode::I64GtS
                | Opcode::I64GtU
                | Opcode::I64LeS
                | Opcode::I64LeU
                | Opcode::I64GeS
                | Opcode::I64GeU
                | Opcode::I64Load
                | Opcode::I64Load8S
                | Opcode::I64Load8U
                | Opcode::I64Load16S
                | Opcode::I64Load16U
                | Opcode::I64Load32S
                | Opcode::I64Load32U
                | Opcode::I64Store
                | Opcode::I64Store8
                | Opcode::I64Store16
                | Opcode::I64Store32
                | Opcode::I64AtomicLoad
                | Opcode::I64AtomicLoad8U
                | Opcode::I64AtomicLoad16U
                | Opcode::I64AtomicLoad32U
                | Opcode::I64AtomicStore
                | Opcode::I64AtomicStore8
                | Opcode::I64AtomicStore16
                | Opcode::I64AtomicStore32
                | Opcode::I64AtomicRmwAdd
                | Opcode::I64AtomicRmw8AddU
                | Opcode::I64AtomicRmw16AddU
                | Opcode::I64AtomicRmw32AddU
                | Opcode::I64AtomicRmwSub
                | Opcode::I64AtomicRmw8SubU
                | Opcode::I64AtomicRmw16SubU
                | Opcode::I64AtomicRmw32SubU
                | Opcode::I64AtomicRmwAnd
                | Opcode::I64AtomicRmw8AndU
                | Opcode::I64AtomicRmw16AndU
                | Opcode::I64AtomicRmw32AndU
                | Opcode::I64AtomicRmwOr
                | Opcode::I64AtomicRmw8OrU
                | Opcode::I64AtomicRmw16OrU
                | Opcode::I64AtomicRmw32OrU
                | Opcode::I64AtomicRmwXor
                | Opcode::I64AtomicRmw8XorU
                | Opcode::I64AtomicRmw16XorU
                | Opcode::I64AtomicRmw32XorU
                | Opcode::I64AtomicRmwXchg
                | Opcode::I64AtomicRmw8XchgU
                | Opcode::I64AtomicRmw16XchgU
                | Opcode::I64AtomicRmw32XchgU
                | Opcode::I64AtomicRmwCmpxchg
                | Opcode::I64AtomicRmw8CmpxchgU
                | Opcode::I64AtomicRmw16CmpxchgU
                | Opcode::I64AtomicRmw32CmpxchgU
        )
    }

    #[must_use]
    pub fn is_compare(self) -> bool {
        matches!(
            self,
            Opcode::I32Eqz
                | Opcode::I32Eq
                | Opcode::I32Ne
                | Opcode::I32LtS
                | Opcode::I32LtU
                | Opcode::I32GtS
                | Opcode::I32GtU
                | Opcode::I32LeS
                | Opcode::I32LeU
                | Opcode::I32GeS
                | Opcode::I32GeU
                | Opcode::I64Eqz
                | Opcode::I64Eq
                | Opcode::I64Ne
                | Opcode::I64LtS
                | Opcode::I64LtU
                | Opcode::I64GtS
                | Opcode::I64GtU
                | Opcode::I64LeS
                | Opcode::I64LeU
                | Opcode::I64GeS
                | Opcode::I64GeU
        )
    }

    #[must_use]
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Opcode::I32Clz
                | Opcode::I32Ctz
                | Opcode::I32Popcnt
                | Opcode::I64Clz
                | Opcode::I64Ctz
                | Opcode::I64Popcnt
                | Opcode::I32Extend8S
                | Opcode::I32Extend16S
                | Opcode::I64Extend8S
                | Opcode::I64Extend16S
                | Opcode::I64Extend32S
        )
    }

    #[must_use]
    pub fn is_load(self) -> bool {
        matches!(
            self,
            Opcode::I32Load
                | Opcode::I32Load8S
                | Opcode::I32Load8U
                | Opcode::I32Load16S
                | Opcode::I32Load16U
                | Opcode::I64Load
                | Opcode::I64Load8S
                | Opcode::I64Load8U
                | Opcode::I64Load16S
                | Opcode::I64Load16U
                | Opcode::I64Load32S
                | Opcode::I64Load32U
                | Opcode::F32Load
                | Opcode::F64Load
        )
    }

    #[must_use]
    pub fn is_store(self) -> bool {
        matches!(
            self,
            Opcode::I32Store
                | Opcode::I32Store8
                | Opcode::I32Store16
                | Opcode::I64Store
                | Opcode::I64Store8
                | Opcode::I64Store16
                | Opcode::I64Store32
                | Opcode::F32Store
                | Opcode::F64Store
        )
    }

    #[must_use]
    pub fn is_atomic(self) -> bool {
        self.atomic_kind().is_some()
    }

    /// Access kind of an atomic opcode, or `None` for non-atomics.
    #[must_use]
    pub fn atomic_kind(self) -> Option<AtomicKind> {
        use Opcode::*;
        Some(match self {
            I32AtomicLoad | I32AtomicLoad8U | I32AtomicLoad16U | I64AtomicLoad
            | I64AtomicLoad8U | I64AtomicLoad16U | I64AtomicLoad32U => AtomicKind::Load,
            I32AtomicStore | I32AtomicStore8 | I32AtomicStore16 | I64AtomicStore
            | I64AtomicStore8 | I64AtomicStore16 | I64AtomicStore32 => AtomicKind::Store,
            I32AtomicRmwAdd | I32AtomicRmw8AddU | I32AtomicRmw16AddU | I64AtomicRmwAdd
            | I64AtomicRmw8AddU | I64AtomicRmw16AddU | I64AtomicRmw32AddU => AtomicKind::Add,
            I32AtomicRmwSub | I32AtomicRmw8SubU | I32AtomicRmw16SubU | I64AtomicRmwSub
            | I64AtomicRmw8SubU | I64AtomicRmw16SubU | I64AtomicRmw32SubU => AtomicKind::Sub,
            I32AtomicRmwAnd | I32AtomicRmw8AndU | I32AtomicRmw16AndU | I64AtomicRmwAnd
            | I64AtomicRmw8AndU | I64AtomicRmw16AndU | I64AtomicRmw32AndU => AtomicKind::And,
            I32AtomicRmwOr | I32AtomicRmw8OrU | I32AtomicRmw16OrU | I64AtomicRmwOr
            | I64AtomicRmw8OrU | I64AtomicRmw16OrU | I64AtomicRmw32OrU => AtomicKind::Or,
            I32AtomicRmwXor | I32AtomicRmw8XorU | I32AtomicRmw16XorU | I64AtomicRmwXor
            | I64AtomicRmw8XorU | I64AtomicRmw16XorU | I64AtomicRmw32XorU => AtomicKind::Xor,
            I32AtomicRmwXchg | I32AtomicRmw8XchgU | I32AtomicRmw16XchgU | I64AtomicRmwXchg
            | I64AtomicRmw8XchgU | I64AtomicRmw16XchgU | I64AtomicRmw32XchgU => AtomicKind::Xchg,
            I32AtomicRmwCmpxchg | I32AtomicRmw8CmpxchgU | I32AtomicRmw16CmpxchgU
            | I64AtomicRmwCmpxchg | I64AtomicRmw8CmpxchgU | I64AtomicRmw16CmpxchgU
            | I64AtomicRmw32CmpxchgU => AtomicKind::Cmpxchg,
            _ => return None,
        })
    }

    /// Byte size of the memory access performed by a load, store or
    /// atomic opcode.
    #[must_use]
    pub fn access_size(self) -> u32 {
        use Opcode::*;
        match self {
            I32Load8S | I32Load8U | I64Load8S | I64Load8U | I32Store8 | I64Store8
            | I32AtomicLoad8U | I64AtomicLoad8U | I32AtomicStore8 | I64AtomicStore8
            | I32AtomicRmw8AddU | I64AtomicRmw8AddU | I32AtomicRmw8SubU | I64AtomicRmw8SubU
            | I32AtomicRmw8AndU | I64AtomicRmw8AndU | I32AtomicRmw8OrU | I64AtomicRmw8OrU
            | I32AtomicRmw8XorU | I64AtomicRmw8XorU | I32AtomicRmw8XchgU | I64AtomicRmw8XchgU
            | I32AtomicRmw8CmpxchgU | I64AtomicRmw8CmpxchgU => 1,
            I32Load16S | I32Load16U | I64Load16S | I64Load16U | I32Store16 | I64Store16
            | I32AtomicLoad16U | I64AtomicLoad16U | I32AtomicStore16 | I64AtomicStore16
            | I32AtomicRmw16AddU | I64AtomicRmw16AddU | I32AtomicRmw16SubU
            | I64AtomicRmw16SubU | I32AtomicRmw16AndU | I64AtomicRmw16AndU
            | I32AtomicRmw16OrU | I64AtomicRmw16OrU | I32AtomicRmw16XorU | I64AtomicRmw16XorU
            | I32AtomicRmw16XchgU | I64AtomicRmw16XchgU | I32AtomicRmw16CmpxchgU
            | I64AtomicRmw16CmpxchgU => 2,
            I64Load | I64Store | F64Load | F64Store | I64AtomicLoad | I64AtomicStore
            | I64AtomicRmwAdd | I64AtomicRmwSub | I64AtomicRmwAnd | I64AtomicRmwOr
            | I64AtomicRmwXor | I64AtomicRmwXchg | I64AtomicRmwCmpxchg => 8,
            _ => 4,
        }
    }

    /// Number of input operands.
    #[must_use]
    pub fn param_count(self) -> usize {
        use Opcode::*;
        match self {
            Const32 | Const64 | Jump | MemorySize | DataDrop => 0,
            I32Eqz | I64Eqz | JumpIfTrue | JumpIfFalse | MemoryGrow => 1,
            Select => 3,
            MemoryInit | MemoryCopy | MemoryFill => 3,
            _ if self.is_unary() || self.group() == OpGroup::Convert || self.is_load() => 1,
            _ if self.is_store() => 2,
            _ => match self.atomic_kind() {
                Some(AtomicKind::Load) => 1,
                Some(AtomicKind::Store) => 2,
                Some(AtomicKind::Cmpxchg) => 3,
                Some(_) => 2,
                None => 2,
            },
        }
    }

    /// Number of output operands.
    #[must_use]
    pub fn result_count(self) -> usize {
        use Opcode::*;
        match self {
            Jump | JumpIfTrue | JumpIfFalse | MemoryInit | MemoryCopy | MemoryFill | DataDrop => 0,
            _ if self.is_store() => 0,
            _ if matches!(self.atomic_kind(), Some(AtomicKind::Store)) => 0,
            _ => 1,
        }
    }
}

/// Access kind of an atomic opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicKind {
    Load,
    Store,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
    Cmpxchg,
}
