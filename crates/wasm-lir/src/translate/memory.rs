//! Memory lowering: overflow-safe effective-address formation with a
//! single bounds comparison, typed loads and stores, atomic accesses,
//! and the bulk-memory intrinsics.

use crate::ir::{AtomicKind, InstrId, Opcode, Payload};
use crate::lir::{
    Arg, ArgPair, AtomicOp, BinaryOp, CallSig, Cond, FReg, Helper, Reg, UnaryOp,
};
use crate::runtime::{
    CONTEXT_MEMORY0_OFFSET, CONTEXT_TMP1_OFFSET, CONTEXT_TMP2_OFFSET, ErrorCode,
    MEMORY_BUFFER_OFFSET, MEMORY_SIZE_IN_BYTE_OFFSET,
};
use crate::{Error, Result};

use super::operand::{move_from_reg, move_to_reg, target_reg};
use super::CompileContext;

/// A validated memory operand. The buffer pointer is in `R0`; when
/// `offset_reg` is set the lowerer must add it into `R0` before the
/// access.
pub(crate) struct MemAddress {
    pub mem_arg: Arg,
    pub offset_reg: Option<Reg>,
}

/// Result of the effective-address check. `Trapped` means the access can
/// never succeed; the jump to the memory trap label has already been
/// emitted and the access must be suppressed.
pub(crate) enum Checked {
    Trapped,
    Address(MemAddress),
}

/// Computes and validates `base + dynamic_offset + static_offset + size`.
///
/// Keeping `total - size` as the displacement keeps the common immediate
/// case within an 8-bit encoding; the dynamic case defers the register
/// add until the buffer pointer is known to be free.
pub(crate) fn check(
    ctx: &mut CompileContext<'_>,
    address: crate::ir::Operand,
    offset: u32,
    size: u32,
) -> Result<Checked> {
    let offset_arg = ctx.arg(address)?;

    if let Some(dynamic) = offset_arg.imm_value() {
        let dynamic = dynamic as u32;

        let total: u64 = if ctx.target.is_64bit() {
            u64::from(offset) + u64::from(dynamic) + u64::from(size)
        } else {
            let Some(with_offset) = dynamic.checked_add(offset) else {
                let jump = ctx.emitter.jump(Cond::Always);
                ctx.emitter.set_target(jump, ctx.memory_trap_label);
                return Ok(Checked::Trapped);
            };
            if with_offset > u32::MAX - size {
                let jump = ctx.emitter.jump(Cond::Always);
                ctx.emitter.set_target(jump, ctx.memory_trap_label);
                return Ok(Checked::Trapped);
            }
            u64::from(with_offset + size)
        };

        ctx.emitter.op1(
            UnaryOp::MovPtr,
            false,
            Arg::Reg(Reg::R0),
            Arg::Mem(Reg::Context, CONTEXT_MEMORY0_OFFSET),
        );
        ctx.emitter.op1(
            UnaryOp::MovU32,
            false,
            Arg::Reg(Reg::R1),
            Arg::Mem(Reg::R0, MEMORY_SIZE_IN_BYTE_OFFSET),
        );

        if total > 255 {
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Reg(Reg::R2),
                Arg::Imm(total as i64),
            );
        }

        ctx.emitter.op1(
            UnaryOp::MovPtr,
            false,
            Arg::Reg(Reg::R0),
            Arg::Mem(Reg::R0, MEMORY_BUFFER_OFFSET),
        );

        let bound = if total <= 255 {
            ctx.emitter
                .cmp(Cond::Less, false, Arg::Reg(Reg::R1), Arg::Imm(total as i64))
        } else {
            ctx.emitter
                .cmp(Cond::Less, false, Arg::Reg(Reg::R1), Arg::Reg(Reg::R2))
        };
        ctx.emitter.set_target(bound, ctx.memory_trap_label);

        if total <= 255 {
            return Ok(Checked::Address(MemAddress {
                mem_arg: Arg::Mem(Reg::R0, (total as i64 - i64::from(size)) as i32),
                offset_reg: None,
            }));
        }
        return Ok(Checked::Address(MemAddress {
            mem_arg: Arg::Mem(Reg::R0, -(size as i32)),
            offset_reg: Some(Reg::R2),
        }));
    }

    if ctx.target.is_32bit() && offset >= u32::MAX - size {
        // This access is never successful.
        let jump = ctx.emitter.jump(Cond::Always);
        ctx.emitter.set_target(jump, ctx.memory_trap_label);
        return Ok(Checked::Trapped);
    }

    let offset_reg = target_reg(offset_arg, Reg::R2);

    ctx.emitter.op1(
        UnaryOp::MovPtr,
        false,
        Arg::Reg(Reg::R0),
        Arg::Mem(Reg::Context, CONTEXT_MEMORY0_OFFSET),
    );
    // The address is an unsigned 32-bit value even on 64-bit targets.
    ctx.emitter
        .op1(UnaryOp::MovU32, false, Arg::Reg(offset_reg), offset_arg);
    ctx.emitter.op1(
        UnaryOp::MovU32,
        false,
        Arg::Reg(Reg::R1),
        Arg::Mem(Reg::R0, MEMORY_SIZE_IN_BYTE_OFFSET),
    );
    ctx.emitter.op1(
        UnaryOp::MovPtr,
        false,
        Arg::Reg(Reg::R0),
        Arg::Mem(Reg::R0, MEMORY_BUFFER_OFFSET),
    );

    let add_on = i64::from(offset) + i64::from(size);
    if ctx.target.is_64bit() {
        ctx.emitter.op2(
            BinaryOp::Add,
            false,
            Arg::Reg(Reg::R2),
            Arg::Reg(offset_reg),
            Arg::Imm(add_on),
        );
    } else {
        ctx.emitter.op2_carry(
            BinaryOp::Add,
            false,
            Arg::Reg(Reg::R2),
            Arg::Reg(offset_reg),
            Arg::Imm(add_on),
        );
        let carry = ctx.emitter.jump(Cond::Carry);
        ctx.emitter.set_target(carry, ctx.memory_trap_label);
    }

    let bound = ctx
        .emitter
        .cmp(Cond::Less, false, Arg::Reg(Reg::R1), Arg::Reg(Reg::R2));
    ctx.emitter.set_target(bound, ctx.memory_trap_label);

    Ok(Checked::Address(MemAddress {
        mem_arg: Arg::Mem(Reg::R0, -(size as i32)),
        offset_reg: Some(Reg::R2),
    }))
}

/// Move opcode and 32-bit flag for a load/store opcode on this target.
fn access_mov_op(ctx: &CompileContext<'_>, opcode: Opcode) -> (UnaryOp, bool) {
    use Opcode::*;
    let w32 = opcode.is_32bit() && ctx.target.is_64bit();
    let op = match opcode {
        I32Load8S | I64Load8S => UnaryOp::MovS8,
        I32Load8U | I64Load8U | I32Store8 | I64Store8 => UnaryOp::MovU8,
        I32Load16S | I64Load16S => UnaryOp::MovS16,
        I32Load16U | I64Load16U | I32Store16 | I64Store16 => UnaryOp::MovU16,
        I64Load32S => UnaryOp::MovS32,
        I64Load32U | I64Store32 => UnaryOp::MovU32,
        F32Load | F32Store => UnaryOp::MovF32,
        F64Load | F64Store => UnaryOp::MovF64,
        _ => UnaryOp::Mov,
    };
    (op, w32)
}

fn add_offset_reg(ctx: &mut CompileContext<'_>, addr: &MemAddress) {
    if let Some(offset_reg) = addr.offset_reg {
        ctx.emitter.op2(
            BinaryOp::Add,
            false,
            Arg::Reg(Reg::R0),
            Arg::Reg(Reg::R0),
            Arg::Reg(offset_reg),
        );
    }
}

/// The memory-pair operand covering the half of a frame slot at the
/// lower byte address; pair accesses always run in ascending-address
/// order.
fn pair_spill_arg(ctx: &CompileContext<'_>, pair: ArgPair) -> Arg {
    if ctx.target.big_endian {
        pair.hi
    } else {
        pair.lo
    }
}

pub(crate) fn emit_load(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<()> {
    let instr = ctx.func.instr(id);
    let opcode = instr.opcode;
    let (mov_op, w32) = access_mov_op(ctx, opcode);
    let size = opcode.access_size();
    let offset = instr.payload.mem_offset();

    let addr = match check(ctx, instr.operands[0], offset, size)? {
        Checked::Trapped => return Ok(()),
        Checked::Address(addr) => addr,
    };

    add_offset_reg(ctx, &addr);

    if matches!(mov_op, UnaryOp::MovF32 | UnaryOp::MovF64) {
        let dst = ctx.arg(instr.operands[1])?;
        ctx.emitter
            .op1(mov_op, false, Arg::Freg(FReg::FR0), addr.mem_arg);
        ctx.emitter.op1(mov_op, false, dst, Arg::Freg(FReg::FR0));
        return Ok(());
    }

    if ctx.target.is_32bit() && !opcode.is_32bit() {
        let dst = ctx.arg_pair(instr.operands[1])?;
        let reg1 = target_reg(dst.lo, Reg::R0);

        if mov_op == UnaryOp::Mov {
            let reg2 = target_reg(dst.hi, Reg::R1);
            ctx.emitter.mem_pair(false, reg1, reg2, addr.mem_arg);
            if dst.lo.is_mem() {
                ctx.emitter
                    .mem_pair(true, reg1, reg2, pair_spill_arg(ctx, dst));
            }
            return Ok(());
        }

        ctx.emitter.op1(mov_op, false, Arg::Reg(reg1), addr.mem_arg);

        if matches!(mov_op, UnaryOp::MovS8 | UnaryOp::MovS16 | UnaryOp::MovS32) {
            ctx.emitter
                .op2(BinaryOp::Ashr, false, dst.hi, Arg::Reg(reg1), Arg::Imm(31));
        } else {
            ctx.emitter.op1(UnaryOp::Mov, false, dst.hi, Arg::Imm(0));
        }
        move_from_reg(&mut ctx.emitter, false, dst.lo, reg1);
        return Ok(());
    }

    let dst = ctx.arg(instr.operands[1])?;
    let reg = target_reg(dst, Reg::R0);
    ctx.emitter.op1(mov_op, w32, Arg::Reg(reg), addr.mem_arg);
    if dst.is_mem() {
        ctx.emitter.op1(UnaryOp::Mov, w32, dst, Arg::Reg(reg));
    }
    Ok(())
}

pub(crate) fn emit_store(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<()> {
    let instr = ctx.func.instr(id);
    let opcode = instr.opcode;
    let (mov_op, w32) = access_mov_op(ctx, opcode);
    let size = opcode.access_size();
    let offset = instr.payload.mem_offset();

    let addr = match check(ctx, instr.operands[0], offset, size)? {
        Checked::Trapped => return Ok(()),
        Checked::Address(addr) => addr,
    };

    if matches!(mov_op, UnaryOp::MovF32 | UnaryOp::MovF64) {
        let value = ctx.arg(instr.operands[1])?;
        ctx.emitter.op1(mov_op, false, Arg::Freg(FReg::FR0), value);
        add_offset_reg(ctx, &addr);
        ctx.emitter
            .op1(mov_op, false, addr.mem_arg, Arg::Freg(FReg::FR0));
        return Ok(());
    }

    let mut value;
    if ctx.target.is_32bit() && !opcode.is_32bit() {
        let pair = ctx.arg_pair(instr.operands[1])?;

        if mov_op == UnaryOp::Mov {
            add_offset_reg(ctx, &addr);

            let reg1 = target_reg(pair.lo, Reg::R1);
            let reg2 = target_reg(pair.hi, Reg::R2);

            if pair.lo.is_mem() {
                ctx.emitter
                    .mem_pair(false, reg1, reg2, pair_spill_arg(ctx, pair));
            } else if pair.lo.is_imm() {
                // Pair registers run in ascending-address order, so the
                // half at the lower address goes into the first register.
                let (first, second) = if ctx.target.big_endian {
                    (pair.hi, pair.lo)
                } else {
                    (pair.lo, pair.hi)
                };
                ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(reg1), first);
                ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(reg2), second);
            }

            ctx.emitter.mem_pair(true, reg1, reg2, addr.mem_arg);
            return Ok(());
        }

        // Sub-word store of a 64-bit value: the high word is ignored.
        value = pair.lo;
    } else {
        value = ctx.arg(instr.operands[1])?;
    }

    if value.is_mem() {
        ctx.emitter.op1(UnaryOp::Mov, w32, Arg::Reg(Reg::R1), value);
        value = Arg::Reg(Reg::R1);
    }

    add_offset_reg(ctx, &addr);
    ctx.emitter.op1(mov_op, w32, addr.mem_arg, value);
    Ok(())
}

const ATOMIC_DATA_REG: Reg = Reg::R0;
const ATOMIC_MEM_REG: Reg = Reg::R1;
const ATOMIC_TEMP_REG: Reg = Reg::R2;

fn atomic_rmw_op(kind: AtomicKind) -> Option<BinaryOp> {
    Some(match kind {
        AtomicKind::Add => BinaryOp::Add,
        AtomicKind::Sub => BinaryOp::Sub,
        AtomicKind::And => BinaryOp::And,
        AtomicKind::Or => BinaryOp::Or,
        AtomicKind::Xor => BinaryOp::Xor,
        _ => return None,
    })
}

fn atomic_helper_op(kind: AtomicKind) -> AtomicOp {
    match kind {
        AtomicKind::Add => AtomicOp::Add,
        AtomicKind::Sub => AtomicOp::Sub,
        AtomicKind::And => AtomicOp::And,
        AtomicKind::Or => AtomicOp::Or,
        AtomicKind::Xor => AtomicOp::Xor,
        _ => AtomicOp::Xchg,
    }
}

pub(crate) fn emit_atomic(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<()> {
    let instr = ctx.func.instr(id);
    let opcode = instr.opcode;
    let kind = opcode
        .atomic_kind()
        .ok_or_else(|| Error::Internal(format!("not an atomic opcode: {opcode:?}")))?;
    let size = opcode.access_size();
    let offset = instr.payload.mem_offset();

    let operation_size = match size {
        1 => UnaryOp::MovU8,
        2 => UnaryOp::MovU16,
        _ => UnaryOp::Mov,
    };
    let w32 = size == 4 && ctx.target.is_64bit();

    let addr = match check(ctx, instr.operands[0], offset, size)? {
        Checked::Trapped => return Ok(()),
        Checked::Address(addr) => addr,
    };

    // Narrow-lane i64 atomics still produce a 64-bit result, so on
    // 32-bit targets every i64-class atomic takes the helper path.
    if ctx.target.is_64bit() || opcode.is_32bit() {
        return emit_atomic_native(ctx, id, kind, operation_size, w32, &addr);
    }
    emit_atomic_helper64(ctx, id, kind, size, &addr)
}

/// Native LL/SC loop for operations at or below the word size.
fn emit_atomic_native(
    ctx: &mut CompileContext<'_>,
    id: InstrId,
    kind: AtomicKind,
    operation_size: UnaryOp,
    lane_w32: bool,
    addr: &MemAddress,
) -> Result<()> {
    let instr = ctx.func.instr(id);
    let value_w32 = ctx.w32(instr.opcode);

    add_offset_reg(ctx, addr);
    let Arg::Mem(base, disp) = addr.mem_arg else {
        return Err(Error::Internal("atomic address is not a memory operand".to_string()));
    };
    ctx.emitter.op2(
        BinaryOp::Add,
        false,
        Arg::Reg(ATOMIC_MEM_REG),
        Arg::Reg(base),
        Arg::Imm(i64::from(disp)),
    );

    match kind {
        AtomicKind::Load => {
            let dst = ctx.arg(instr.operands[1])?;
            ctx.emitter
                .atomic_load(operation_size, lane_w32, ATOMIC_DATA_REG, ATOMIC_MEM_REG);
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Reg(ATOMIC_TEMP_REG),
                Arg::Reg(ATOMIC_DATA_REG),
            );
            ctx.emitter
                .op1(UnaryOp::Mov, value_w32, dst, Arg::Reg(ATOMIC_DATA_REG));
        }
        AtomicKind::Store => {
            let value = ctx.arg(instr.operands[1])?;
            // Storing without a load to lock the line fails forever on
            // some architectures, so the loop reloads first.
            let retry = ctx.emitter.emit_label();
            ctx.emitter
                .atomic_load(operation_size, lane_w32, ATOMIC_DATA_REG, ATOMIC_MEM_REG);
            ctx.emitter
                .op1(UnaryOp::Mov, value_w32, Arg::Reg(ATOMIC_DATA_REG), value);
            ctx.emitter.atomic_store(
                operation_size,
                lane_w32,
                ATOMIC_DATA_REG,
                ATOMIC_MEM_REG,
                ATOMIC_TEMP_REG,
            );
            let not_stored = ctx.emitter.jump(Cond::AtomicNotStored);
            ctx.emitter.set_target(not_stored, retry);
        }
        AtomicKind::Xchg => {
            let value = ctx.arg(instr.operands[1])?;
            let old = ctx.arg(instr.operands[2])?;
            let retry = ctx.emitter.emit_label();
            ctx.emitter
                .atomic_load(operation_size, lane_w32, ATOMIC_DATA_REG, ATOMIC_MEM_REG);
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Reg(ATOMIC_TEMP_REG),
                Arg::Reg(ATOMIC_DATA_REG),
            );
            ctx.emitter
                .op1(UnaryOp::Mov, value_w32, old, Arg::Reg(ATOMIC_DATA_REG));
            ctx.emitter
                .op1(UnaryOp::Mov, value_w32, Arg::Reg(ATOMIC_DATA_REG), value);
            ctx.emitter.atomic_store(
                operation_size,
                lane_w32,
                ATOMIC_DATA_REG,
                ATOMIC_MEM_REG,
                ATOMIC_TEMP_REG,
            );
            let not_stored = ctx.emitter.jump(Cond::AtomicNotStored);
            ctx.emitter.set_target(not_stored, retry);
        }
        AtomicKind::Cmpxchg => {
            let expected = ctx.arg(instr.operands[1])?;
            let replacement = ctx.arg(instr.operands[2])?;
            let witnessed = ctx.arg(instr.operands[3])?;
            let retry = ctx.emitter.emit_label();
            ctx.emitter
                .atomic_load(operation_size, lane_w32, ATOMIC_DATA_REG, ATOMIC_MEM_REG);
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Reg(ATOMIC_TEMP_REG),
                Arg::Reg(ATOMIC_DATA_REG),
            );
            ctx.emitter
                .op1(UnaryOp::Mov, value_w32, witnessed, Arg::Reg(ATOMIC_DATA_REG));
            let mismatch = ctx
                .emitter
                .cmp(Cond::NotEqual, value_w32, Arg::Reg(ATOMIC_DATA_REG), expected);
            ctx.emitter
                .op1(UnaryOp::Mov, value_w32, Arg::Reg(ATOMIC_DATA_REG), replacement);
            ctx.emitter.atomic_store(
                operation_size,
                lane_w32,
                ATOMIC_DATA_REG,
                ATOMIC_MEM_REG,
                ATOMIC_TEMP_REG,
            );
            let not_stored = ctx.emitter.jump(Cond::AtomicNotStored);
            ctx.emitter.set_target(not_stored, retry);
            let done = ctx.emitter.emit_label();
            ctx.emitter.set_target(mismatch, done);
        }
        _ => {
            let operation = atomic_rmw_op(kind)
                .ok_or_else(|| Error::Internal("unexpected atomic kind".to_string()))?;
            let value = ctx.arg(instr.operands[1])?;
            let old = ctx.arg(instr.operands[2])?;
            let retry = ctx.emitter.emit_label();
            ctx.emitter
                .atomic_load(operation_size, lane_w32, ATOMIC_DATA_REG, ATOMIC_MEM_REG);
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Reg(ATOMIC_TEMP_REG),
                Arg::Reg(ATOMIC_DATA_REG),
            );
            ctx.emitter
                .op1(UnaryOp::Mov, value_w32, old, Arg::Reg(ATOMIC_DATA_REG));
            ctx.emitter.op2(
                operation,
                value_w32,
                Arg::Reg(ATOMIC_DATA_REG),
                Arg::Reg(ATOMIC_DATA_REG),
                value,
            );
            ctx.emitter.atomic_store(
                operation_size,
                lane_w32,
                ATOMIC_DATA_REG,
                ATOMIC_MEM_REG,
                ATOMIC_TEMP_REG,
            );
            let not_stored = ctx.emitter.jump(Cond::AtomicNotStored);
            ctx.emitter.set_target(not_stored, retry);
        }
    }
    Ok(())
}

/// 64-bit atomics on 32-bit targets: pack the operands into the context
/// spill slots and call the generic masked-CAS helpers.
fn emit_atomic_helper64(
    ctx: &mut CompileContext<'_>,
    id: InstrId,
    kind: AtomicKind,
    size: u32,
    addr: &MemAddress,
) -> Result<()> {
    fn store_pair_to_tmp(ctx: &mut CompileContext<'_>, pair: ArgPair, tmp_offset: i32) {
        let low_off = ctx.target.word_low_offset();
        let high_off = ctx.target.word_high_offset();
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            Arg::Mem(Reg::Context, tmp_offset + low_off),
            pair.lo,
        );
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            Arg::Mem(Reg::Context, tmp_offset + high_off),
            pair.hi,
        );
    }

    fn finish_address(ctx: &mut CompileContext<'_>, base: Reg, disp: i32) {
        ctx.emitter.op2(
            BinaryOp::Add,
            false,
            Arg::Reg(Reg::R0),
            Arg::Reg(base),
            Arg::Imm(i64::from(disp)),
        );
    }

    fn tmp_pointer(ctx: &mut CompileContext<'_>, dst: Reg, tmp_offset: i32) {
        ctx.emitter.op2(
            BinaryOp::Add,
            false,
            Arg::Reg(dst),
            Arg::Reg(Reg::Context),
            Arg::Imm(i64::from(tmp_offset)),
        );
    }

    let instr = ctx.func.instr(id);
    let size_bits = i64::from(size * 8);
    let low_off = ctx.target.word_low_offset();
    let high_off = ctx.target.word_high_offset();

    add_offset_reg(ctx, addr);
    let Arg::Mem(base, disp) = addr.mem_arg else {
        return Err(Error::Internal("atomic address is not a memory operand".to_string()));
    };

    match kind {
        AtomicKind::Load => {
            let dst = ctx.arg_pair(instr.operands[1])?;
            finish_address(ctx, base, disp);
            ctx.emitter
                .op1(UnaryOp::Mov, false, Arg::Reg(Reg::R1), Arg::Imm(size_bits));
            ctx.emitter
                .icall(Helper::AtomicRmwGenericLoad64, CallSig::returning(2));
            ctx.emitter.op1(UnaryOp::Mov, false, dst.lo, Arg::Reg(Reg::R0));
            ctx.emitter.op1(UnaryOp::Mov, false, dst.hi, Arg::Reg(Reg::R1));
        }
        AtomicKind::Store => {
            let value = ctx.arg_pair(instr.operands[1])?;
            store_pair_to_tmp(ctx, value, CONTEXT_TMP1_OFFSET);
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Mem(Reg::Context, CONTEXT_TMP2_OFFSET + low_off),
                Arg::Imm(size_bits),
            );
            finish_address(ctx, base, disp);
            tmp_pointer(ctx, Reg::R1, CONTEXT_TMP1_OFFSET);
            tmp_pointer(ctx, Reg::R2, CONTEXT_TMP2_OFFSET);
            ctx.emitter
                .icall(Helper::AtomicRmwGenericStore64, CallSig::void(3));
        }
        AtomicKind::Cmpxchg => {
            let expected = ctx.arg_pair(instr.operands[1])?;
            let replacement = ctx.arg_pair(instr.operands[2])?;
            let witnessed = ctx.arg_pair(instr.operands[3])?;
            store_pair_to_tmp(ctx, expected, CONTEXT_TMP1_OFFSET);
            store_pair_to_tmp(ctx, replacement, CONTEXT_TMP2_OFFSET);
            finish_address(ctx, base, disp);
            tmp_pointer(ctx, Reg::R1, CONTEXT_TMP1_OFFSET);
            tmp_pointer(ctx, Reg::R2, CONTEXT_TMP2_OFFSET);
            ctx.emitter
                .op1(UnaryOp::Mov, false, Arg::Reg(Reg::R3), Arg::Imm(size_bits));
            ctx.emitter
                .icall(Helper::AtomicRmwGenericCmpxchg64, CallSig::returning(4));
            ctx.emitter
                .op1(UnaryOp::Mov, false, witnessed.lo, Arg::Reg(Reg::R0));
            ctx.emitter
                .op1(UnaryOp::Mov, false, witnessed.hi, Arg::Reg(Reg::R1));
        }
        _ => {
            let value = ctx.arg_pair(instr.operands[1])?;
            let old = ctx.arg_pair(instr.operands[2])?;
            let operation = atomic_helper_op(kind);
            store_pair_to_tmp(ctx, value, CONTEXT_TMP1_OFFSET);
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Mem(Reg::Context, CONTEXT_TMP2_OFFSET + low_off),
                Arg::Imm(size_bits),
            );
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Mem(Reg::Context, CONTEXT_TMP2_OFFSET + high_off),
                Arg::Imm(i64::from(operation.as_u32())),
            );
            finish_address(ctx, base, disp);
            tmp_pointer(ctx, Reg::R1, CONTEXT_TMP1_OFFSET);
            tmp_pointer(ctx, Reg::R2, CONTEXT_TMP2_OFFSET);
            ctx.emitter
                .icall(Helper::AtomicRmwGeneric64, CallSig::returning(3));
            ctx.emitter.op1(UnaryOp::Mov, false, old.lo, Arg::Reg(Reg::R0));
            ctx.emitter.op1(UnaryOp::Mov, false, old.hi, Arg::Reg(Reg::R1));
        }
    }
    Ok(())
}

pub(crate) fn emit_memory(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<()> {
    let instr = ctx.func.instr(id);
    let w32 = ctx.target.is_64bit();

    match instr.opcode {
        Opcode::MemorySize => {
            let dst = ctx.arg(instr.operands[0])?;
            ctx.emitter.op1(
                UnaryOp::MovPtr,
                false,
                Arg::Reg(Reg::R0),
                Arg::Mem(Reg::Context, CONTEXT_MEMORY0_OFFSET),
            );
            let reg = target_reg(dst, Reg::R0);
            ctx.emitter.op1(
                UnaryOp::MovU32,
                false,
                Arg::Reg(reg),
                Arg::Mem(Reg::R0, MEMORY_SIZE_IN_BYTE_OFFSET),
            );
            ctx.emitter
                .op2(BinaryOp::Lshr, false, Arg::Reg(reg), Arg::Reg(reg), Arg::Imm(16));
            move_from_reg(&mut ctx.emitter, w32, dst, reg);
        }
        Opcode::MemoryInit | Opcode::MemoryCopy | Opcode::MemoryFill => {
            for index in 0..3 {
                let arg = ctx.arg(instr.operands[index])?;
                ctx.emitter
                    .op1(UnaryOp::Mov, w32, Arg::Reg(Reg::scratch(index)), arg);
            }
            ctx.emitter
                .op1(UnaryOp::Mov, false, Arg::Reg(Reg::R3), Arg::Reg(Reg::Context));

            let helper = match instr.opcode {
                Opcode::MemoryInit => {
                    let Payload::MemoryInit { segment } = instr.payload else {
                        return Err(Error::Internal("memory.init without segment".to_string()));
                    };
                    ctx.emitter.op1(
                        UnaryOp::MovU32,
                        false,
                        Arg::Mem(Reg::Context, CONTEXT_TMP1_OFFSET),
                        Arg::Imm(i64::from(segment)),
                    );
                    Helper::InitMemory
                }
                Opcode::MemoryCopy => Helper::CopyMemory,
                _ => Helper::FillMemory,
            };

            ctx.emitter.icall(helper, CallSig::returning(4));

            // All bulk-memory failures surface as out-of-bounds accesses.
            let failed = ctx.emitter.cmp(
                Cond::NotEqual,
                false,
                Arg::Reg(Reg::R0),
                Arg::Imm(i64::from(ErrorCode::NoError.as_u32())),
            );
            ctx.emitter.set_target(failed, ctx.memory_trap_label);
        }
        Opcode::MemoryGrow => {
            let pages = ctx.arg(instr.operands[0])?;
            move_to_reg(&mut ctx.emitter, w32, Reg::R0, pages);
            ctx.emitter
                .op1(UnaryOp::Mov, false, Arg::Reg(Reg::R1), Arg::Reg(Reg::Context));
            ctx.emitter.icall(Helper::GrowMemory, CallSig::returning(2));
            let dst = ctx.arg(instr.operands[1])?;
            move_from_reg(&mut ctx.emitter, w32, dst, Reg::R0);
        }
        Opcode::DataDrop => {
            let Payload::DataDrop { segment } = instr.payload else {
                return Err(Error::Internal("data.drop without segment".to_string()));
            };
            ctx.emitter.op1(
                UnaryOp::Mov,
                w32,
                Arg::Reg(Reg::R0),
                Arg::Imm(i64::from(segment)),
            );
            ctx.emitter
                .op1(UnaryOp::Mov, false, Arg::Reg(Reg::R1), Arg::Reg(Reg::Context));
            ctx.emitter.icall(Helper::DropData, CallSig::void(2));
        }
        _ => return Err(Error::Internal("unexpected memory opcode".to_string())),
    }
    Ok(())
}
