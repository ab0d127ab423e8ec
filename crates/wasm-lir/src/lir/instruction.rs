//! LIR operation records, operand descriptors and condition codes.

/// Integer registers visible to the lowering passes.
///
/// `R0..R3` are freely clobbered scratch registers. `Frame` holds the base
/// of the current call frame and `Context` the base of the execution
/// context; both are pinned for the lifetime of a compiled function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    Frame,
    Context,
}

impl Reg {
    /// Scratch register by index, `R0..R3`.
    #[must_use]
    pub fn scratch(index: usize) -> Self {
        match index {
            0 => Reg::R0,
            1 => Reg::R1,
            2 => Reg::R2,
            _ => Reg::R3,
        }
    }
}

/// Float registers, used only to shuttle float values between memory
/// locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FReg {
    FR0,
    FR1,
}

/// A single LIR operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    Imm(i64),
    Reg(Reg),
    /// `[base + disp]`
    Mem(Reg, i32),
    Freg(FReg),
}

impl Arg {
    #[must_use]
    pub fn is_imm(&self) -> bool {
        matches!(self, Arg::Imm(_))
    }

    #[must_use]
    pub fn is_reg(&self) -> bool {
        matches!(self, Arg::Reg(_))
    }

    #[must_use]
    pub fn is_mem(&self) -> bool {
        matches!(self, Arg::Mem(..))
    }

    /// Immediate value, if this is an immediate.
    #[must_use]
    pub fn imm_value(&self) -> Option<i64> {
        match self {
            Arg::Imm(v) => Some(*v),
            _ => None,
        }
    }
}

/// A 64-bit value split into two 32-bit word arguments on 32-bit targets.
/// `lo` is always the semantically low half; the byte offsets inside a
/// frame slot are endian-dependent and already resolved by the operand
/// shuttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgPair {
    pub lo: Arg,
    pub hi: Arg,
}

/// Operations taking no explicit operands; they work on `R0`/`R1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroOp {
    /// Unsigned widening multiply: `(R1:R0) = R0 * R1`, low word in `R0`.
    LMulUw,
    /// `R0 = R0 / R1` (unsigned).
    DivU,
    /// `R0 = R0 / R1` (signed).
    DivS,
    /// `R0 = R0 / R1`, `R1 = R0 % R1` (unsigned).
    DivmodU,
    /// `R0 = R0 / R1`, `R1 = R0 % R1` (signed).
    DivmodS,
}

/// Single-operand operations: the move family plus bit counting.
///
/// Sub-word moves extend on a register destination and truncate on a
/// memory destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Mov,
    MovU8,
    MovS8,
    MovU16,
    MovS16,
    MovU32,
    MovS32,
    MovPtr,
    MovF32,
    MovF64,
    Clz,
    Ctz,
}

impl UnaryOp {
    /// Number of bytes moved through a memory operand, given the target
    /// word size in bytes.
    #[must_use]
    pub fn mem_size(&self, word_bytes: u32) -> u32 {
        match self {
            UnaryOp::MovU8 | UnaryOp::MovS8 => 1,
            UnaryOp::MovU16 | UnaryOp::MovS16 => 2,
            UnaryOp::MovU32 | UnaryOp::MovS32 | UnaryOp::MovF32 => 4,
            UnaryOp::MovF64 => 8,
            UnaryOp::Mov | UnaryOp::MovPtr | UnaryOp::Clz | UnaryOp::Ctz => word_bytes,
        }
    }
}

/// Two-operand ALU operations. The `M`-prefixed shifts mask the count to
/// the operation width; the plain forms expect an in-range count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    /// Add with carry-in.
    Addc,
    Sub,
    /// Subtract with borrow-in.
    Subc,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    MShl,
    Lshr,
    MLshr,
    Ashr,
    MAshr,
    Rotl,
    Rotr,
}

impl BinaryOp {
    /// The count-masking variant of a shift, used on the `>= 32` path of
    /// the 64-on-32 shift lowering.
    #[must_use]
    pub fn masked_variant(self) -> Self {
        match self {
            BinaryOp::Shl => BinaryOp::MShl,
            BinaryOp::Lshr => BinaryOp::MLshr,
            BinaryOp::Ashr => BinaryOp::MAshr,
            other => other,
        }
    }
}

/// Condition codes evaluated against the most recent flag-setting
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Always,
    Equal,
    NotEqual,
    Less,
    GreaterEqual,
    Greater,
    LessEqual,
    SigLess,
    SigGreaterEqual,
    SigGreater,
    SigLessEqual,
    Carry,
    NotCarry,
    AtomicStored,
    AtomicNotStored,
}

impl Cond {
    /// The inverse condition; used when fusing a compare with a
    /// jump-if-false.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Cond::Always => Cond::Always,
            Cond::Equal => Cond::NotEqual,
            Cond::NotEqual => Cond::Equal,
            Cond::Less => Cond::GreaterEqual,
            Cond::GreaterEqual => Cond::Less,
            Cond::Greater => Cond::LessEqual,
            Cond::LessEqual => Cond::Greater,
            Cond::SigLess => Cond::SigGreaterEqual,
            Cond::SigGreaterEqual => Cond::SigLess,
            Cond::SigGreater => Cond::SigLessEqual,
            Cond::SigLessEqual => Cond::SigGreater,
            Cond::Carry => Cond::NotCarry,
            Cond::NotCarry => Cond::Carry,
            Cond::AtomicStored => Cond::AtomicNotStored,
            Cond::AtomicNotStored => Cond::AtomicStored,
        }
    }

    /// Maps a signed ordering to its unsigned counterpart. Identity for
    /// everything else.
    #[must_use]
    pub fn unsigned_variant(self) -> Self {
        match self {
            Cond::SigLess => Cond::Less,
            Cond::SigGreaterEqual => Cond::GreaterEqual,
            Cond::SigGreater => Cond::Greater,
            Cond::SigLessEqual => Cond::LessEqual,
            other => other,
        }
    }
}

/// Runtime helpers callable from generated code. The enum value stands in
/// for the function address; the signatures are part of the runtime ABI
/// contract (see [`crate::runtime`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Helper {
    SignedDiv64,
    SignedDiv64Imm,
    UnsignedDiv64,
    UnsignedDiv64Imm,
    SignedRem64,
    SignedRem64Imm,
    UnsignedRem64,
    UnsignedRem64Imm,
    Popcnt32,
    /// i64 popcount, low/high word arguments (32-bit targets).
    Popcnt64,
    /// i64 popcount, single word argument (64-bit targets).
    Popcnt64Word,
    AtomicRmwGenericLoad64,
    AtomicRmwGenericStore64,
    AtomicRmwGeneric64,
    AtomicRmwGenericCmpxchg64,
    InitMemory,
    CopyMemory,
    FillMemory,
    GrowMemory,
    DropData,
}

/// Call signature: argument registers consumed (`R0..`) and whether a
/// value is returned in `R0` (and `R1` for 64-bit results on 32-bit
/// targets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSig {
    pub args: u8,
    pub returns_value: bool,
}

impl CallSig {
    #[must_use]
    pub fn returning(args: u8) -> Self {
        Self {
            args,
            returns_value: true,
        }
    }

    #[must_use]
    pub fn void(args: u8) -> Self {
        Self {
            args,
            returns_value: false,
        }
    }
}

/// Operation selector for the generic atomic read-modify-write helper,
/// packed into the high word of its parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
}

impl AtomicOp {
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            AtomicOp::Add => 0,
            AtomicOp::Sub => 1,
            AtomicOp::And => 2,
            AtomicOp::Or => 3,
            AtomicOp::Xor => 4,
            AtomicOp::Xchg => 5,
        }
    }

    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => AtomicOp::Add,
            1 => AtomicOp::Sub,
            2 => AtomicOp::And,
            3 => AtomicOp::Or,
            4 => AtomicOp::Xor,
            5 => AtomicOp::Xchg,
            _ => return None,
        })
    }
}

/// A single emitted LIR operation.
///
/// `w32` requests 32-bit semantics on 64-bit targets; it has no effect
/// when the target word is already 32 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LirInst {
    Op0 {
        op: ZeroOp,
        w32: bool,
    },
    Op1 {
        op: UnaryOp,
        w32: bool,
        dst: Arg,
        src: Arg,
    },
    Op2 {
        op: BinaryOp,
        w32: bool,
        /// Condition flags are updated from this operation.
        set_flags: bool,
        /// The carry bit is updated from this operation.
        set_carry: bool,
        /// `None` for flag-set-only forms.
        dst: Option<Arg>,
        a: Arg,
        b: Arg,
    },
    /// Double-precision shift: shifts `src`, filling the vacated bits from
    /// `other`. A count of zero leaves `src` unchanged.
    ShiftInto {
        op: BinaryOp,
        dst: Reg,
        src: Reg,
        other: Reg,
        count: Arg,
    },
    /// Conditional jump; the target label is tracked by the emitter.
    Jump {
        cond: Cond,
        jump: super::JumpId,
    },
    /// Call a runtime helper with arguments in `R0..`.
    Call {
        helper: Helper,
        sig: CallSig,
    },
    /// `dst = cond ? src : other`.
    Select {
        cond: Cond,
        w32: bool,
        dst: Reg,
        src: Arg,
        other: Reg,
    },
    /// Materialize a condition as 0/1 into `dst`.
    OpFlags {
        cond: Cond,
        w32: bool,
        dst: Arg,
    },
    /// Load-linked read of `[mem]` into `data`.
    AtomicLoad {
        op: UnaryOp,
        w32: bool,
        data: Reg,
        mem: Reg,
    },
    /// Store-conditional of `data` to `[mem]`; updates the atomic-stored
    /// flag.
    AtomicStore {
        op: UnaryOp,
        w32: bool,
        data: Reg,
        mem: Reg,
        temp: Reg,
    },
    /// Register-pair load/store of two consecutive 32-bit words.
    MemPair {
        store: bool,
        r1: Reg,
        r2: Reg,
        addr: Arg,
    },
    Ret,
}
