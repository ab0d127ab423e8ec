//! Execution harness for emitted LIR programs.
//!
//! The interpreter runs a [`Program`] over a flat byte arena laid out as
//! execution context, call frame, memory descriptor and linear memory, so
//! pointer-valued registers and the published field offsets behave the
//! same way they would in native code. Helper calls are dispatched to
//! [`crate::runtime`] with pointer arguments resolved through the arena.
//!
//! Only little-endian targets execute here; the big-endian lowering paths
//! are asserted structurally on the emitted instructions instead.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

use crate::ir::Function;
use crate::lir::{
    Arg, AtomicOp, BinaryOp, Cond, Helper, LirInst, Program, Reg, Target, UnaryOp, WordSize,
    ZeroOp,
};
use crate::runtime::{
    self, CONTEXT_MEMORY0_OFFSET, CONTEXT_TMP1_OFFSET, DataSegment, ErrorCode,
    MEMORY_BUFFER_OFFSET, MEMORY_MAX_IN_BYTE_OFFSET, MEMORY_SIZE_IN_BYTE_OFFSET, PAGE_SIZE,
};

const CONTEXT_BASE: u64 = 0x100;
const FRAME_BASE: u64 = 0x1000;
const MEMORY_DESC_BASE: u64 = 0x2000;
const MEMORY_BUFFER_BASE: u64 = 0x1_0000;

/// Instruction budget; exceeding it means a loop in the generated code
/// failed to terminate.
const STEP_LIMIT: usize = 50_000_000;

#[derive(Debug, Clone, Copy)]
enum FlagState {
    None,
    /// Flags from a flag-setting subtraction of `a` and `b`.
    Cmp { a: u64, b: u64, bits: u32 },
    /// Flags from a logical operation producing `value`.
    Result { value: u64 },
}

/// Interpreter state: registers, flags and the backing arena.
pub struct Machine {
    target: Target,
    regs: [u64; 6],
    fregs: [u64; 2],
    flags: FlagState,
    carry: bool,
    atomic_stored: bool,
    arena: Vec<u8>,
    segments: Vec<DataSegment>,
}

fn reg_index(reg: Reg) -> usize {
    match reg {
        Reg::R0 => 0,
        Reg::R1 => 1,
        Reg::R2 => 2,
        Reg::R3 => 3,
        Reg::Frame => 4,
        Reg::Context => 5,
    }
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

impl Machine {
    pub fn new(target: &Target, pages: u32, max_pages: u32) -> Self {
        assert!(
            !target.big_endian,
            "the harness executes little-endian targets only"
        );
        let arena_len = MEMORY_BUFFER_BASE as usize + max_pages as usize * PAGE_SIZE as usize;
        let mut machine = Self {
            target: target.clone(),
            regs: [0; 6],
            fregs: [0; 2],
            flags: FlagState::None,
            carry: false,
            atomic_stored: false,
            arena: vec![0; arena_len],
            segments: Vec::new(),
        };
        machine.regs[reg_index(Reg::Frame)] = FRAME_BASE;
        machine.regs[reg_index(Reg::Context)] = CONTEXT_BASE;

        let word = machine.word_bytes();
        machine.store_bytes(CONTEXT_BASE + CONTEXT_MEMORY0_OFFSET as u64, word, MEMORY_DESC_BASE);
        machine.store_bytes(
            MEMORY_DESC_BASE + MEMORY_BUFFER_OFFSET as u64,
            word,
            MEMORY_BUFFER_BASE,
        );
        machine.store_bytes(
            MEMORY_DESC_BASE + MEMORY_SIZE_IN_BYTE_OFFSET as u64,
            4,
            u64::from(pages * PAGE_SIZE),
        );
        machine.store_bytes(
            MEMORY_DESC_BASE + MEMORY_MAX_IN_BYTE_OFFSET as u64,
            4,
            u64::from(max_pages * PAGE_SIZE),
        );
        machine
    }

    fn word_bytes(&self) -> u32 {
        match self.target.word {
            WordSize::W32 => 4,
            WordSize::W64 => 8,
        }
    }

    fn word_bits(&self) -> u32 {
        self.word_bytes() * 8
    }

    fn word_mask(&self) -> u64 {
        if self.word_bytes() == 8 {
            u64::MAX
        } else {
            0xffff_ffff
        }
    }

    // ── Arena access ──

    fn load_bytes(&self, addr: u64, bytes: u32) -> u64 {
        let addr = addr as usize;
        let mut buffer = [0u8; 8];
        buffer[..bytes as usize].copy_from_slice(&self.arena[addr..addr + bytes as usize]);
        u64::from_le_bytes(buffer)
    }

    fn store_bytes(&mut self, addr: u64, bytes: u32, value: u64) {
        let addr = addr as usize;
        self.arena[addr..addr + bytes as usize]
            .copy_from_slice(&value.to_le_bytes()[..bytes as usize]);
    }

    fn arg_address(&self, base: Reg, disp: i32) -> u64 {
        self.regs[reg_index(base)].wrapping_add(i64::from(disp) as u64) & self.word_mask()
    }

    // ── Frame slot and memory accessors for tests ──

    pub fn set_slot_u32(&mut self, slot: u32, value: u32) {
        self.store_bytes(FRAME_BASE + u64::from(slot) * 4, 4, u64::from(value));
    }

    pub fn set_slot_i32(&mut self, slot: u32, value: i32) {
        self.set_slot_u32(slot, value.cast_unsigned());
    }

    pub fn set_slot_u64(&mut self, slot: u32, value: u64) {
        self.store_bytes(FRAME_BASE + u64::from(slot) * 4, 8, value);
    }

    pub fn set_slot_i64(&mut self, slot: u32, value: i64) {
        self.set_slot_u64(slot, value.cast_unsigned());
    }

    pub fn slot_u32(&self, slot: u32) -> u32 {
        self.load_bytes(FRAME_BASE + u64::from(slot) * 4, 4) as u32
    }

    pub fn slot_i32(&self, slot: u32) -> i32 {
        self.slot_u32(slot).cast_signed()
    }

    pub fn slot_u64(&self, slot: u32) -> u64 {
        self.load_bytes(FRAME_BASE + u64::from(slot) * 4, 8)
    }

    pub fn slot_i64(&self, slot: u32) -> i64 {
        self.slot_u64(slot).cast_signed()
    }

    pub fn write_memory(&mut self, addr: u32, bytes: &[u8]) {
        let start = MEMORY_BUFFER_BASE as usize + addr as usize;
        self.arena[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn memory_bytes(&self, addr: u32, len: u32) -> &[u8] {
        let start = MEMORY_BUFFER_BASE as usize + addr as usize;
        &self.arena[start..start + len as usize]
    }

    pub fn memory_u32(&self, addr: u32) -> u32 {
        self.load_bytes(MEMORY_BUFFER_BASE + u64::from(addr), 4) as u32
    }

    pub fn memory_u64(&self, addr: u32) -> u64 {
        self.load_bytes(MEMORY_BUFFER_BASE + u64::from(addr), 8)
    }

    pub fn add_data_segment(&mut self, bytes: Vec<u8>) {
        self.segments.push(DataSegment::new(bytes));
    }

    pub fn memory_size_in_byte(&self) -> u32 {
        self.load_bytes(MEMORY_DESC_BASE + MEMORY_SIZE_IN_BYTE_OFFSET as u64, 4) as u32
    }

    // ── Operand evaluation ──

    /// Source size in bytes and extension of a move operation.
    fn mov_spec(&self, op: UnaryOp, w32: bool) -> (u32, bool) {
        match op {
            UnaryOp::MovU8 => (1, false),
            UnaryOp::MovS8 => (1, true),
            UnaryOp::MovU16 => (2, false),
            UnaryOp::MovS16 => (2, true),
            UnaryOp::MovU32 => (4, false),
            UnaryOp::MovS32 => (4, true),
            UnaryOp::MovF32 => (4, false),
            UnaryOp::MovF64 => (8, false),
            UnaryOp::Mov | UnaryOp::MovPtr | UnaryOp::Clz | UnaryOp::Ctz => {
                (if w32 { 4 } else { self.word_bytes() }, false)
            }
        }
    }

    fn read_mov_src(&self, op: UnaryOp, w32: bool, src: Arg) -> u64 {
        let (bytes, signed) = self.mov_spec(op, w32);
        let raw = match src {
            Arg::Imm(value) => value as u64,
            Arg::Reg(reg) => self.regs[reg_index(reg)],
            Arg::Mem(base, disp) => self.load_bytes(self.arg_address(base, disp), bytes),
            Arg::Freg(freg) => self.fregs[freg as usize],
        };
        let narrowed = if bytes == 8 { raw } else { raw & ((1u64 << (bytes * 8)) - 1) };
        let width = if w32 { 32 } else { self.word_bits() };
        let extended = if signed {
            sign_extend(narrowed, bytes * 8) as u64
        } else {
            narrowed
        };
        if width == 32 { extended & 0xffff_ffff } else { extended }
    }

    fn write_mov_dst(&mut self, op: UnaryOp, w32: bool, dst: Arg, value: u64) {
        match dst {
            Arg::Reg(reg) => self.regs[reg_index(reg)] = value & self.word_mask(),
            Arg::Freg(freg) => self.fregs[freg as usize] = value,
            Arg::Mem(base, disp) => {
                let (bytes, _) = self.mov_spec(op, w32);
                self.store_bytes(self.arg_address(base, disp), bytes, value);
            }
            Arg::Imm(_) => panic!("immediate destination"),
        }
    }

    /// Word-sized operand read for ALU operations.
    fn read_value(&self, bits: u32, arg: Arg) -> u64 {
        let bytes = bits / 8;
        let raw = match arg {
            Arg::Imm(value) => value as u64,
            Arg::Reg(reg) => self.regs[reg_index(reg)],
            Arg::Mem(base, disp) => self.load_bytes(self.arg_address(base, disp), bytes),
            Arg::Freg(freg) => self.fregs[freg as usize],
        };
        if bits == 32 { raw & 0xffff_ffff } else { raw }
    }

    fn write_value(&mut self, bits: u32, arg: Arg, value: u64) {
        match arg {
            Arg::Reg(reg) => self.regs[reg_index(reg)] = value & self.word_mask(),
            Arg::Mem(base, disp) => self.store_bytes(self.arg_address(base, disp), bits / 8, value),
            _ => panic!("invalid ALU destination"),
        }
    }

    fn eval_cond(&self, cond: Cond) -> bool {
        match cond {
            Cond::Always => true,
            Cond::Carry => self.carry,
            Cond::NotCarry => !self.carry,
            Cond::AtomicStored => self.atomic_stored,
            Cond::AtomicNotStored => !self.atomic_stored,
            _ => match self.flags {
                FlagState::None => panic!("condition evaluated without flags"),
                FlagState::Result { value } => match cond {
                    Cond::Equal => value == 0,
                    Cond::NotEqual => value != 0,
                    _ => panic!("ordered condition after logical flags"),
                },
                FlagState::Cmp { a, b, bits } => {
                    let (sa, sb) = (sign_extend(a, bits), sign_extend(b, bits));
                    match cond {
                        Cond::Equal => a == b,
                        Cond::NotEqual => a != b,
                        Cond::Less => a < b,
                        Cond::GreaterEqual => a >= b,
                        Cond::Greater => a > b,
                        Cond::LessEqual => a <= b,
                        Cond::SigLess => sa < sb,
                        Cond::SigGreaterEqual => sa >= sb,
                        Cond::SigGreater => sa > sb,
                        Cond::SigLessEqual => sa <= sb,
                        Cond::Always
                        | Cond::Carry
                        | Cond::NotCarry
                        | Cond::AtomicStored
                        | Cond::AtomicNotStored => unreachable!(),
                    }
                }
            },
        }
    }

    // ── Execution ──

    /// Runs the program to its `ret` and reports the context error field.
    pub fn run(&mut self, program: &Program) -> ErrorCode {
        let mut pc = 0usize;
        let mut steps = 0usize;

        while pc < program.insts.len() {
            steps += 1;
            assert!(steps < STEP_LIMIT, "instruction budget exceeded at {pc}");

            match &program.insts[pc] {
                LirInst::Ret => break,
                LirInst::Jump { cond, jump } => {
                    if self.eval_cond(*cond) {
                        pc = program.jump_position(*jump);
                        continue;
                    }
                }
                LirInst::Op0 { op, w32 } => self.exec_op0(*op, *w32),
                LirInst::Op1 { op, w32, dst, src } => match op {
                    UnaryOp::Clz | UnaryOp::Ctz => {
                        let bits = if *w32 { 32 } else { self.word_bits() };
                        let value = self.read_value(bits, *src);
                        let count = self.count_zeroes(*op, bits, value);
                        self.write_value(bits, *dst, u64::from(count));
                    }
                    _ => {
                        let value = self.read_mov_src(*op, *w32, *src);
                        self.write_mov_dst(*op, *w32, *dst, value);
                    }
                },
                LirInst::Op2 {
                    op,
                    w32,
                    set_flags,
                    set_carry,
                    dst,
                    a,
                    b,
                } => {
                    let bits = if *w32 { 32 } else { self.word_bits() };
                    let mask = if bits == 32 { 0xffff_ffff } else { u64::MAX };
                    let av = self.read_value(bits, *a);
                    let bv = self.read_value(bits, *b);
                    let (result, carry_out) = self.exec_alu(*op, bits, av, bv);
                    if *set_flags {
                        self.flags = match op {
                            BinaryOp::Sub => FlagState::Cmp { a: av, b: bv, bits },
                            _ => FlagState::Result { value: result & mask },
                        };
                    }
                    let wants_carry = *set_carry || *set_flags;
                    if let Some(carry) = carry_out.filter(|_| wants_carry) {
                        self.carry = carry;
                    }
                    if let Some(dst) = dst {
                        self.write_value(bits, *dst, result & mask);
                    }
                }
                LirInst::ShiftInto {
                    op,
                    dst,
                    src,
                    other,
                    count,
                } => {
                    let bits = self.word_bits();
                    let mask = self.word_mask();
                    let n = (self.read_value(bits, *count) & u64::from(bits - 1)) as u32;
                    let s = self.regs[reg_index(*src)];
                    let o = self.regs[reg_index(*other)];
                    let value = if n == 0 {
                        s
                    } else if *op == BinaryOp::Shl {
                        ((s << n) | (o >> (bits - n))) & mask
                    } else {
                        ((s >> n) | (o << (bits - n))) & mask
                    };
                    self.regs[reg_index(*dst)] = value;
                }
                LirInst::Select {
                    cond,
                    w32,
                    dst,
                    src,
                    other,
                } => {
                    let bits = if *w32 { 32 } else { self.word_bits() };
                    let value = if self.eval_cond(*cond) {
                        self.read_value(bits, *src)
                    } else {
                        self.read_value(bits, Arg::Reg(*other))
                    };
                    self.regs[reg_index(*dst)] = value & self.word_mask();
                }
                LirInst::OpFlags { cond, w32, dst } => {
                    let value = u64::from(self.eval_cond(*cond));
                    let bits = if *w32 { 32 } else { self.word_bits() };
                    self.write_value(bits, *dst, value);
                }
                LirInst::AtomicLoad { op, w32, data, mem } => {
                    let (bytes, _) = self.mov_spec(*op, *w32);
                    let addr = self.regs[reg_index(*mem)];
                    self.regs[reg_index(*data)] = self.load_bytes(addr, bytes);
                }
                LirInst::AtomicStore {
                    op,
                    w32,
                    data,
                    mem,
                    temp: _,
                } => {
                    let (bytes, _) = self.mov_spec(*op, *w32);
                    let addr = self.regs[reg_index(*mem)];
                    let value = self.regs[reg_index(*data)];
                    self.store_bytes(addr, bytes, value);
                    self.atomic_stored = true;
                }
                LirInst::MemPair {
                    store,
                    r1,
                    r2,
                    addr,
                } => {
                    let Arg::Mem(base, disp) = addr else {
                        panic!("pair access needs a memory operand");
                    };
                    let address = self.arg_address(*base, *disp);
                    if *store {
                        let (v1, v2) = (self.regs[reg_index(*r1)], self.regs[reg_index(*r2)]);
                        self.store_bytes(address, 4, v1);
                        self.store_bytes(address + 4, 4, v2);
                    } else {
                        let v1 = self.load_bytes(address, 4);
                        let v2 = self.load_bytes(address + 4, 4);
                        self.regs[reg_index(*r1)] = v1;
                        self.regs[reg_index(*r2)] = v2;
                    }
                }
                LirInst::Call { helper, sig } => self.dispatch_helper(*helper, sig.args),
            }
            pc += 1;
        }

        ErrorCode::from_u32(self.load_bytes(
            CONTEXT_BASE + crate::runtime::CONTEXT_ERROR_OFFSET as u64,
            4,
        ) as u32)
    }

    fn count_zeroes(&self, op: UnaryOp, bits: u32, value: u64) -> u32 {
        if bits == 32 {
            let value = value as u32;
            if op == UnaryOp::Clz {
                value.leading_zeros()
            } else {
                value.trailing_zeros().min(32)
            }
        } else if op == UnaryOp::Clz {
            value.leading_zeros()
        } else {
            value.trailing_zeros().min(64)
        }
    }

    fn exec_alu(&self, op: BinaryOp, bits: u32, a: u64, b: u64) -> (u64, Option<bool>) {
        let mask = if bits == 32 { 0xffff_ffff } else { u64::MAX };
        let shift_mask = u64::from(bits - 1);
        match op {
            BinaryOp::Add => {
                let wide = u128::from(a) + u128::from(b);
                (wide as u64 & mask, Some(wide > u128::from(mask)))
            }
            BinaryOp::Addc => {
                let wide = u128::from(a) + u128::from(b) + u128::from(self.carry);
                (wide as u64 & mask, Some(wide > u128::from(mask)))
            }
            BinaryOp::Sub => (a.wrapping_sub(b) & mask, Some(a < b)),
            BinaryOp::Subc => {
                let borrow = u64::from(self.carry);
                (
                    a.wrapping_sub(b).wrapping_sub(borrow) & mask,
                    Some(u128::from(a) < u128::from(b) + u128::from(borrow)),
                )
            }
            BinaryOp::Mul => (a.wrapping_mul(b) & mask, None),
            BinaryOp::And => (a & b, None),
            BinaryOp::Or => (a | b, None),
            BinaryOp::Xor => (a ^ b, None),
            BinaryOp::Shl | BinaryOp::MShl => ((a << (b & shift_mask)) & mask, None),
            BinaryOp::Lshr | BinaryOp::MLshr => ((a & mask) >> (b & shift_mask), None),
            BinaryOp::Ashr | BinaryOp::MAshr => {
                let shifted = sign_extend(a, bits) >> (b & shift_mask);
                (shifted as u64 & mask, None)
            }
            BinaryOp::Rotl => {
                let n = (b & shift_mask) as u32;
                if bits == 32 {
                    (u64::from((a as u32).rotate_left(n)), None)
                } else {
                    (a.rotate_left(n), None)
                }
            }
            BinaryOp::Rotr => {
                let n = (b & shift_mask) as u32;
                if bits == 32 {
                    (u64::from((a as u32).rotate_right(n)), None)
                } else {
                    (a.rotate_right(n), None)
                }
            }
        }
    }

    fn exec_op0(&mut self, op: ZeroOp, w32: bool) {
        let bits = if w32 { 32 } else { self.word_bits() };
        let mask = if bits == 32 { 0xffff_ffff } else { u64::MAX };
        let a = self.regs[0] & mask;
        let b = self.regs[1] & mask;
        match op {
            ZeroOp::LMulUw => {
                if self.word_bits() == 32 {
                    let product = (self.regs[0] & 0xffff_ffff) * (self.regs[1] & 0xffff_ffff);
                    self.regs[0] = product & 0xffff_ffff;
                    self.regs[1] = product >> 32;
                } else {
                    let product = u128::from(self.regs[0]) * u128::from(self.regs[1]);
                    self.regs[0] = product as u64;
                    self.regs[1] = (product >> 64) as u64;
                }
            }
            ZeroOp::DivU => {
                assert!(b != 0, "unsigned divide by zero reached the hardware op");
                self.regs[0] = (a / b) & mask;
            }
            ZeroOp::DivmodU => {
                assert!(b != 0, "unsigned divide by zero reached the hardware op");
                self.regs[0] = (a / b) & mask;
                self.regs[1] = (a % b) & mask;
            }
            ZeroOp::DivS => {
                let (sa, sb) = (sign_extend(a, bits), sign_extend(b, bits));
                assert!(sb != 0, "signed divide by zero reached the hardware op");
                self.regs[0] = sa.wrapping_div(sb) as u64 & mask;
            }
            ZeroOp::DivmodS => {
                let (sa, sb) = (sign_extend(a, bits), sign_extend(b, bits));
                assert!(sb != 0, "signed divide by zero reached the hardware op");
                self.regs[0] = sa.wrapping_div(sb) as u64 & mask;
                self.regs[1] = sa.wrapping_rem(sb) as u64 & mask;
            }
        }
    }

    // ── Helper-call dispatch ──

    fn read_i64_at(&self, addr: u64) -> i64 {
        self.load_bytes(addr, 8).cast_signed()
    }

    fn write_u64_at(&mut self, addr: u64, value: u64) {
        self.store_bytes(addr, 8, value);
    }

    fn memory_limits(&self) -> (usize, usize) {
        let size = self.load_bytes(MEMORY_DESC_BASE + MEMORY_SIZE_IN_BYTE_OFFSET as u64, 4) as usize;
        (MEMORY_BUFFER_BASE as usize, size)
    }

    fn dispatch_helper(&mut self, helper: Helper, _args: u8) {
        match helper {
            Helper::SignedDiv64 | Helper::SignedRem64 => {
                let dividend = self.read_i64_at(self.regs[0]);
                let divisor = self.read_i64_at(self.regs[1]);
                let mut out = 0i64;
                let code = if helper == Helper::SignedDiv64 {
                    runtime::signed_div64(dividend, divisor, &mut out)
                } else {
                    runtime::signed_rem64(dividend, divisor, &mut out)
                };
                if code == ErrorCode::NoError {
                    self.write_u64_at(self.regs[2], out.cast_unsigned());
                }
                self.regs[0] = u64::from(code.as_u32());
            }
            Helper::UnsignedDiv64 | Helper::UnsignedRem64 => {
                let dividend = self.load_bytes(self.regs[0], 8);
                let divisor = self.load_bytes(self.regs[1], 8);
                let mut out = 0u64;
                let code = if helper == Helper::UnsignedDiv64 {
                    runtime::unsigned_div64(dividend, divisor, &mut out)
                } else {
                    runtime::unsigned_rem64(dividend, divisor, &mut out)
                };
                if code == ErrorCode::NoError {
                    self.write_u64_at(self.regs[2], out);
                }
                self.regs[0] = u64::from(code.as_u32());
            }
            Helper::SignedDiv64Imm | Helper::SignedRem64Imm => {
                let dividend = self.read_i64_at(self.regs[0]);
                let divisor = self.read_i64_at(self.regs[1]);
                let mut out = 0i64;
                if helper == Helper::SignedDiv64Imm {
                    runtime::signed_div64_imm(dividend, divisor, &mut out);
                } else {
                    runtime::signed_rem64_imm(dividend, divisor, &mut out);
                }
                self.write_u64_at(self.regs[2], out.cast_unsigned());
            }
            Helper::UnsignedDiv64Imm | Helper::UnsignedRem64Imm => {
                let dividend = self.load_bytes(self.regs[0], 8);
                let divisor = self.load_bytes(self.regs[1], 8);
                let mut out = 0u64;
                if helper == Helper::UnsignedDiv64Imm {
                    runtime::unsigned_div64_imm(dividend, divisor, &mut out);
                } else {
                    runtime::unsigned_rem64_imm(dividend, divisor, &mut out);
                }
                self.write_u64_at(self.regs[2], out);
            }
            Helper::Popcnt32 => {
                self.regs[0] = u64::from(runtime::popcnt32(self.regs[0] as u32));
            }
            Helper::Popcnt64 => {
                self.regs[0] = u64::from(runtime::popcnt64(
                    self.regs[0] as u32,
                    self.regs[1] as u32,
                ));
            }
            Helper::Popcnt64Word => {
                self.regs[0] = u64::from(runtime::popcnt64_word(self.regs[0]));
            }
            Helper::AtomicRmwGenericLoad64 => {
                let mask = runtime::mask_from_size_bits(self.regs[1] as u32);
                let value = self.load_bytes(self.regs[0], 8) & mask;
                self.regs[0] = value & 0xffff_ffff;
                self.regs[1] = value >> 32;
            }
            Helper::AtomicRmwGenericStore64 => {
                let addr = self.regs[0];
                let value = self.load_bytes(self.regs[1], 8);
                let mask = runtime::mask_from_size_bits(self.load_bytes(self.regs[2], 4) as u32);
                let old = self.load_bytes(addr, 8);
                self.store_bytes(addr, 8, (old & !mask) | (value & mask));
            }
            Helper::AtomicRmwGeneric64 => {
                let addr = self.regs[0];
                let value = self.load_bytes(self.regs[1], 8);
                let packed = self.load_bytes(self.regs[2], 8);
                let op = AtomicOp::from_u32((packed >> 32) as u32).unwrap_or(AtomicOp::Xchg);
                let mask = runtime::mask_from_size_bits(packed as u32);
                let old = self.load_bytes(addr, 8);
                self.store_bytes(addr, 8, runtime::apply_rmw_op(op, old, value, mask));
                let lane = old & mask;
                self.regs[0] = lane & 0xffff_ffff;
                self.regs[1] = lane >> 32;
            }
            Helper::AtomicRmwGenericCmpxchg64 => {
                let addr = self.regs[0];
                let expected = self.load_bytes(self.regs[1], 8);
                let replacement = self.load_bytes(self.regs[2], 8);
                let mask = runtime::mask_from_size_bits(self.regs[3] as u32);
                let current = self.load_bytes(addr, 8);
                let witnessed = current & mask;
                if witnessed == expected & mask {
                    self.store_bytes(addr, 8, (current & !mask) | (replacement & mask));
                }
                self.regs[0] = witnessed & 0xffff_ffff;
                self.regs[1] = witnessed >> 32;
            }
            Helper::InitMemory => {
                let (dst, src, len) = (
                    self.regs[0] as u32,
                    self.regs[1] as u32,
                    self.regs[2] as u32,
                );
                let segment_index =
                    self.load_bytes(CONTEXT_BASE + CONTEXT_TMP1_OFFSET as u64, 4) as usize;
                let (start, size) = self.memory_limits();
                let code = match self.segments.get(segment_index) {
                    Some(segment) => {
                        let bytes = segment.bytes().to_vec();
                        runtime::checked_init(
                            &mut self.arena[start..start + size],
                            &bytes,
                            dst,
                            src,
                            len,
                        )
                    }
                    None => ErrorCode::OutOfBoundsMemAccess,
                };
                self.regs[0] = u64::from(code.as_u32());
            }
            Helper::CopyMemory => {
                let (dst, src, len) = (
                    self.regs[0] as u32,
                    self.regs[1] as u32,
                    self.regs[2] as u32,
                );
                let (start, size) = self.memory_limits();
                let code = runtime::checked_copy(&mut self.arena[start..start + size], dst, src, len);
                self.regs[0] = u64::from(code.as_u32());
            }
            Helper::FillMemory => {
                let (dst, value, len) = (
                    self.regs[0] as u32,
                    self.regs[1] as u32,
                    self.regs[2] as u32,
                );
                let (start, size) = self.memory_limits();
                let code = runtime::checked_fill(
                    &mut self.arena[start..start + size],
                    dst,
                    (value & 0xff) as u8,
                    len,
                );
                self.regs[0] = u64::from(code.as_u32());
            }
            Helper::GrowMemory => {
                let delta = self.regs[0] as u32;
                let size = self.load_bytes(MEMORY_DESC_BASE + MEMORY_SIZE_IN_BYTE_OFFSET as u64, 4)
                    as u32;
                let max =
                    self.load_bytes(MEMORY_DESC_BASE + MEMORY_MAX_IN_BYTE_OFFSET as u64, 4) as u32;
                let old_pages = size >> 16;
                let new_bytes = (u64::from(old_pages) + u64::from(delta)) * u64::from(PAGE_SIZE);
                if new_bytes > u64::from(max) {
                    self.regs[0] = 0xffff_ffff;
                } else {
                    self.store_bytes(
                        MEMORY_DESC_BASE + MEMORY_SIZE_IN_BYTE_OFFSET as u64,
                        4,
                        new_bytes,
                    );
                    self.regs[0] = u64::from(old_pages);
                }
            }
            Helper::DropData => {
                let index = self.regs[0] as usize;
                if let Some(segment) = self.segments.get_mut(index) {
                    segment.drop_payload();
                }
            }
        }
    }
}

/// Compiles `func` for `target`, applies `setup`, runs, and returns the
/// machine together with the reported error code. One page of linear
/// memory, growable to two.
pub fn execute(
    func: &Function,
    target: &Target,
    setup: impl FnOnce(&mut Machine),
) -> (Machine, ErrorCode) {
    execute_with_memory(func, target, 1, 2, setup)
}

pub fn execute_with_memory(
    func: &Function,
    target: &Target,
    pages: u32,
    max_pages: u32,
    setup: impl FnOnce(&mut Machine),
) -> (Machine, ErrorCode) {
    let program = crate::translate::compile_function(func, target).expect("function compiles");
    let mut machine = Machine::new(target, pages, max_pages);
    setup(&mut machine);
    let error = machine.run(&program);
    (machine, error)
}
