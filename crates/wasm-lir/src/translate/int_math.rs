//! Integer lowering: binary arithmetic, division trap handling, the
//! word-split 64-bit paths for 32-bit targets, unary operations,
//! comparisons with branch/select fusion, and value select.

use crate::ir::{InstrId, Opcode, Payload};
use crate::lir::{
    Arg, ArgPair, BinaryOp, CallSig, Cond, Helper, Reg, UnaryOp, ZeroOp,
};
use crate::runtime::{
    CONTEXT_TMP1_OFFSET, CONTEXT_TMP2_OFFSET, ErrorCode,
};
use crate::{Error, Result};

use super::operand::{move_from_reg, move_to_reg, target_reg};
use super::{CompileContext, SlowCase, SlowCaseKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DivKind {
    DivS,
    DivU,
    RemS,
    RemU,
}

impl DivKind {
    fn is_signed(self) -> bool {
        matches!(self, DivKind::DivS | DivKind::RemS)
    }

    fn is_rem(self) -> bool {
        matches!(self, DivKind::RemS | DivKind::RemU)
    }

    fn zero_op(self) -> ZeroOp {
        match self {
            DivKind::DivS => ZeroOp::DivS,
            DivKind::DivU => ZeroOp::DivU,
            DivKind::RemS => ZeroOp::DivmodS,
            DivKind::RemU => ZeroOp::DivmodU,
        }
    }
}

pub(crate) fn emit_binary(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<()> {
    let instr = ctx.func.instr(id);
    let opcode = instr.opcode;

    if opcode.is_32bit() || ctx.target.is_64bit() {
        let w32 = ctx.w32(opcode);
        let args = [
            ctx.arg(instr.operands[0])?,
            ctx.arg(instr.operands[1])?,
            ctx.arg(instr.operands[2])?,
        ];

        let op = match opcode {
            Opcode::I32Add | Opcode::I64Add => BinaryOp::Add,
            Opcode::I32Sub | Opcode::I64Sub => BinaryOp::Sub,
            Opcode::I32Mul | Opcode::I64Mul => BinaryOp::Mul,
            Opcode::I32And | Opcode::I64And => BinaryOp::And,
            Opcode::I32Or | Opcode::I64Or => BinaryOp::Or,
            Opcode::I32Xor | Opcode::I64Xor => BinaryOp::Xor,
            Opcode::I32Shl | Opcode::I64Shl => BinaryOp::Shl,
            Opcode::I32ShrS | Opcode::I64ShrS => BinaryOp::Ashr,
            Opcode::I32ShrU | Opcode::I64ShrU => BinaryOp::Lshr,
            Opcode::I32Rotl | Opcode::I64Rotl => BinaryOp::Rotl,
            Opcode::I32Rotr | Opcode::I64Rotr => BinaryOp::Rotr,
            Opcode::I32DivS | Opcode::I64DivS => return emit_div_rem(ctx, DivKind::DivS, w32, args),
            Opcode::I32DivU | Opcode::I64DivU => return emit_div_rem(ctx, DivKind::DivU, w32, args),
            Opcode::I32RemS | Opcode::I64RemS => return emit_div_rem(ctx, DivKind::RemS, w32, args),
            Opcode::I32RemU | Opcode::I64RemU => return emit_div_rem(ctx, DivKind::RemU, w32, args),
            _ => return Err(Error::Internal(format!("not a binary opcode: {opcode:?}"))),
        };
        ctx.emitter.op2(op, w32, args[2], args[0], args[1]);
        return Ok(());
    }

    let args = [
        ctx.arg_pair(instr.operands[0])?,
        ctx.arg_pair(instr.operands[1])?,
        ctx.arg_pair(instr.operands[2])?,
    ];

    match opcode {
        Opcode::I64Add => emit_simple_binary64(ctx, BinaryOp::Add, BinaryOp::Addc, true, &args),
        Opcode::I64Sub => emit_simple_binary64(ctx, BinaryOp::Sub, BinaryOp::Subc, true, &args),
        Opcode::I64And => emit_simple_binary64(ctx, BinaryOp::And, BinaryOp::And, false, &args),
        Opcode::I64Or => emit_simple_binary64(ctx, BinaryOp::Or, BinaryOp::Or, false, &args),
        Opcode::I64Xor => emit_simple_binary64(ctx, BinaryOp::Xor, BinaryOp::Xor, false, &args),
        Opcode::I64Mul => emit_mul64(ctx, &args),
        Opcode::I64Shl => emit_shift64(ctx, BinaryOp::Shl, &args),
        Opcode::I64ShrS => emit_shift64(ctx, BinaryOp::Ashr, &args),
        Opcode::I64ShrU => emit_shift64(ctx, BinaryOp::Lshr, &args),
        Opcode::I64Rotl => emit_rotate64(ctx, BinaryOp::Shl, &args),
        Opcode::I64Rotr => emit_rotate64(ctx, BinaryOp::Lshr, &args),
        Opcode::I64DivS => emit_div_rem64(ctx, DivKind::DivS, &args),
        Opcode::I64DivU => emit_div_rem64(ctx, DivKind::DivU, &args),
        Opcode::I64RemS => emit_div_rem64(ctx, DivKind::RemS, &args),
        Opcode::I64RemU => emit_div_rem64(ctx, DivKind::RemU, &args),
        _ => Err(Error::Internal(format!("not a 64-bit binary opcode: {opcode:?}"))),
    }
}

/// Division and remainder through the hardware divide, with inline and
/// deferred trap checks. `args` is dividend, divisor, destination.
fn emit_div_rem(
    ctx: &mut CompileContext<'_>,
    kind: DivKind,
    w32: bool,
    args: [Arg; 3],
) -> Result<()> {
    let min_value = if w32 || ctx.target.is_32bit() {
        i64::from(i32::MIN)
    } else {
        i64::MIN
    };

    if let Some(divisor) = args[1].imm_value() {
        if divisor == 0 {
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Reg(Reg::R2),
                Arg::Imm(i64::from(ErrorCode::DivideByZero.as_u32())),
            );
            let jump = ctx.emitter.jump(Cond::Always);
            ctx.emitter.set_target(jump, ctx.trap_label);
            return Ok(());
        }
        if divisor == -1 && kind == DivKind::RemS {
            ctx.emitter.op1(UnaryOp::Mov, w32, args[2], Arg::Imm(0));
            return Ok(());
        }
    }

    move_to_reg(&mut ctx.emitter, w32, Reg::R1, args[1]);
    move_to_reg(&mut ctx.emitter, w32, Reg::R0, args[0]);

    let mut modulo_jump = None;

    if let Some(divisor) = args[1].imm_value() {
        if kind == DivKind::DivS && divisor == -1 {
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Reg(Reg::R2),
                Arg::Imm(i64::from(ErrorCode::IntegerOverflow.as_u32())),
            );
            let overflow = ctx
                .emitter
                .cmp(Cond::Equal, w32, Arg::Reg(Reg::R0), Arg::Imm(min_value));
            ctx.emitter.set_target(overflow, ctx.trap_label);
        }
    } else if kind.is_signed() {
        // divisor + 1 <=u 1 catches both 0 and -1; the deferred fragment
        // sees the incremented divisor.
        ctx.emitter
            .op2(BinaryOp::Add, w32, Arg::Reg(Reg::R1), Arg::Reg(Reg::R1), Arg::Imm(1));
        ctx.emitter.op2u(BinaryOp::Sub, w32, Arg::Reg(Reg::R1), Arg::Imm(1));
        let jump = ctx.emitter.jump(Cond::LessEqual);

        if kind == DivKind::DivS {
            let resume = ctx.emitter.emit_label();
            ctx.slow_cases.push(SlowCase {
                kind: SlowCaseKind::SignedDivide { w32 },
                jump,
                resume,
            });
        } else {
            modulo_jump = Some(jump);
        }

        ctx.emitter
            .op2(BinaryOp::Sub, w32, Arg::Reg(Reg::R1), Arg::Reg(Reg::R1), Arg::Imm(1));
    } else {
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            Arg::Reg(Reg::R2),
            Arg::Imm(i64::from(ErrorCode::DivideByZero.as_u32())),
        );
        let zero = ctx
            .emitter
            .cmp(Cond::Equal, w32, Arg::Reg(Reg::R1), Arg::Imm(0));
        ctx.emitter.set_target(zero, ctx.trap_label);
    }

    ctx.emitter.op0(kind.zero_op(), w32);

    let result_reg = if kind.is_rem() { Reg::R1 } else { Reg::R0 };

    if let Some(jump) = modulo_jump {
        let resume = ctx.emitter.emit_label();
        ctx.slow_cases.push(SlowCase {
            kind: SlowCaseKind::SignedModulo { w32 },
            jump,
            resume,
        });
    }

    move_from_reg(&mut ctx.emitter, w32, args[2], result_reg);
    Ok(())
}

/// Add/sub/and/or/xor on pairs: the low-half operation first (setting the
/// carry for add/sub), then the high-half operation. Operand placement
/// respects the target's memory-operand budget.
fn emit_simple_binary64(
    ctx: &mut CompileContext<'_>,
    op_lo: BinaryOp,
    op_hi: BinaryOp,
    carry_chain: bool,
    args: &[ArgPair; 3],
) -> Result<()> {
    fn emit_halves(
        e: &mut crate::lir::Emitter,
        op_lo: BinaryOp,
        op_hi: BinaryOp,
        carry_chain: bool,
        dst: ArgPair,
        a_lo: Arg,
        b_lo: Arg,
        a_hi: Arg,
        b_hi: Arg,
    ) {
        if carry_chain {
            e.op2_carry(op_lo, false, dst.lo, a_lo, b_lo);
        } else {
            e.op2(op_lo, false, dst.lo, a_lo, b_lo);
        }
        e.op2(op_hi, false, dst.hi, a_hi, b_hi);
    }

    let [a, b, dst] = *args;
    let e = &mut ctx.emitter;

    if !ctx.target.two_mem_operands && a.lo.is_mem() && b.lo.is_mem() {
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R0), a.lo);
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R1), b.lo);
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R2), a.hi);
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R3), b.hi);
        emit_halves(
            e,
            op_lo,
            op_hi,
            carry_chain,
            dst,
            Arg::Reg(Reg::R0),
            Arg::Reg(Reg::R1),
            Arg::Reg(Reg::R2),
            Arg::Reg(Reg::R3),
        );
        return Ok(());
    }

    if b.lo.is_mem() {
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R0), b.lo);
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R1), b.hi);
        emit_halves(
            e,
            op_lo,
            op_hi,
            carry_chain,
            dst,
            a.lo,
            Arg::Reg(Reg::R0),
            a.hi,
            Arg::Reg(Reg::R1),
        );
        return Ok(());
    }

    if a.lo.is_mem() {
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R0), a.lo);
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R1), a.hi);
        emit_halves(
            e,
            op_lo,
            op_hi,
            carry_chain,
            dst,
            Arg::Reg(Reg::R0),
            b.lo,
            Arg::Reg(Reg::R1),
            b.hi,
        );
        return Ok(());
    }

    emit_halves(e, op_lo, op_hi, carry_chain, dst, a.lo, b.lo, a.hi, b.hi);
    Ok(())
}

/// 64x64 multiply from three 32x32 products:
/// `hi = hi_a*lo_b + lo_a*hi_b + high(lo_a*lo_b)`, `lo = low(lo_a*lo_b)`.
fn emit_mul64(ctx: &mut CompileContext<'_>, args: &[ArgPair; 3]) -> Result<()> {
    let [a, b, dst] = *args;
    let e = &mut ctx.emitter;

    move_to_reg(e, false, Reg::R0, a.lo);
    move_to_reg(e, false, Reg::R1, b.lo);
    move_to_reg(e, false, Reg::R2, a.hi);
    move_to_reg(e, false, Reg::R3, b.hi);
    e.op2(BinaryOp::Mul, false, Arg::Reg(Reg::R2), Arg::Reg(Reg::R2), Arg::Reg(Reg::R1));
    e.op2(BinaryOp::Mul, false, Arg::Reg(Reg::R3), Arg::Reg(Reg::R3), Arg::Reg(Reg::R0));
    e.op0(ZeroOp::LMulUw, false);
    e.op2(BinaryOp::Add, false, Arg::Reg(Reg::R2), Arg::Reg(Reg::R2), Arg::Reg(Reg::R3));
    e.op2(BinaryOp::Add, false, Arg::Reg(Reg::R1), Arg::Reg(Reg::R1), Arg::Reg(Reg::R2));
    move_from_reg(e, false, dst.lo, Reg::R0);
    move_from_reg(e, false, dst.hi, Reg::R1);
    Ok(())
}

/// Word-split shift. The "shift into" half receives bits vacated by the
/// other half; direction decides which half that is.
fn emit_shift64(ctx: &mut CompileContext<'_>, op: BinaryOp, args: &[ArgPair; 3]) -> Result<()> {
    let [src, amount, dst] = *args;

    let (si_result_reg, ot_result_reg, mut si_arg, mut ot_arg, si_result, ot_result) =
        if op == BinaryOp::Shl {
            (
                target_reg(dst.hi, Reg::R0),
                target_reg(dst.lo, Reg::R1),
                src.hi,
                src.lo,
                dst.hi,
                dst.lo,
            )
        } else {
            (
                target_reg(dst.lo, Reg::R0),
                target_reg(dst.hi, Reg::R1),
                src.lo,
                src.hi,
                dst.lo,
                dst.hi,
            )
        };

    if let Some(raw) = amount.lo.imm_value() {
        let mut shift = raw & 0x3f;

        if (shift & 0x20) != 0 {
            shift -= 0x20;

            if op == BinaryOp::Ashr && !ot_arg.is_reg() {
                ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(ot_result_reg), ot_arg);
                ot_arg = Arg::Reg(ot_result_reg);
            }

            if shift == 0 {
                ctx.emitter.op1(UnaryOp::Mov, false, si_result, ot_arg);
            } else {
                ctx.emitter.op2(op, false, si_result, ot_arg, Arg::Imm(shift));
            }

            if op == BinaryOp::Ashr {
                ctx.emitter.op2(BinaryOp::Ashr, false, ot_result, ot_arg, Arg::Imm(31));
            } else {
                ctx.emitter.op1(UnaryOp::Mov, false, ot_result, Arg::Imm(0));
            }
            return Ok(());
        }

        if !si_arg.is_reg() {
            ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(si_result_reg), si_arg);
            si_arg = Arg::Reg(si_result_reg);
        }
        if !ot_arg.is_reg() {
            ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(ot_result_reg), ot_arg);
            ot_arg = Arg::Reg(ot_result_reg);
        }

        let into_op = if op == BinaryOp::Shl {
            BinaryOp::Shl
        } else {
            BinaryOp::Lshr
        };
        ctx.emitter.shift_into(
            into_op,
            si_result_reg,
            target_reg(si_arg, si_result_reg),
            target_reg(ot_arg, ot_result_reg),
            Arg::Imm(shift),
        );
        ctx.emitter
            .op2(op, false, Arg::Reg(ot_result_reg), ot_arg, Arg::Imm(shift));
        move_from_reg(&mut ctx.emitter, false, si_result, si_result_reg);
        move_from_reg(&mut ctx.emitter, false, ot_result, ot_result_reg);
        return Ok(());
    }

    // Variable shift amount: route the count through the preferred shift
    // register when the target declares one.
    let shift_reg = if let Some(preferred) = ctx.target.pref_shift_reg {
        move_to_reg(&mut ctx.emitter, false, preferred, amount.lo);
        preferred
    } else {
        move_to_reg(&mut ctx.emitter, false, Reg::R2, amount.lo);
        Reg::R2
    };

    if !ot_arg.is_reg() {
        ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(ot_result_reg), ot_arg);
        ot_arg = Arg::Reg(ot_result_reg);
    }

    ctx.emitter
        .op2u(BinaryOp::And, false, Arg::Reg(shift_reg), Arg::Imm(0x20));
    let high_half = ctx.emitter.jump(Cond::NotEqual);

    if !si_arg.is_reg() {
        ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(si_result_reg), si_arg);
        si_arg = Arg::Reg(si_result_reg);
    }
    let mut count_reg = shift_reg;
    if !ctx.target.masked_shift {
        ctx.emitter.op2(
            BinaryOp::And,
            false,
            Arg::Reg(Reg::R2),
            Arg::Reg(shift_reg),
            Arg::Imm(0x1f),
        );
        count_reg = Reg::R2;
    }
    let into_op = if op == BinaryOp::Shl {
        BinaryOp::Shl
    } else {
        BinaryOp::Lshr
    };
    ctx.emitter.shift_into(
        into_op,
        si_result_reg,
        target_reg(si_arg, si_result_reg),
        target_reg(ot_arg, ot_result_reg),
        Arg::Reg(count_reg),
    );
    ctx.emitter
        .op2(op, false, ot_result, ot_arg, Arg::Reg(count_reg));

    let done = ctx.emitter.jump(Cond::Always);

    let high_entry = ctx.emitter.emit_label();
    ctx.emitter.set_target(high_half, high_entry);

    // Count >= 32: a single masked shift of the other half lands in the
    // shift-into result; the emptied half is zero- or sign-filled.
    ctx.emitter.op2(
        op.masked_variant(),
        false,
        Arg::Reg(si_result_reg),
        ot_arg,
        Arg::Reg(shift_reg),
    );
    if op == BinaryOp::Ashr {
        ctx.emitter.op2(BinaryOp::Ashr, false, ot_result, ot_arg, Arg::Imm(31));
    } else {
        ctx.emitter.op1(UnaryOp::Mov, false, ot_result, Arg::Imm(0));
    }

    let done_entry = ctx.emitter.emit_label();
    ctx.emitter.set_target(done, done_entry);
    move_from_reg(&mut ctx.emitter, false, si_result, si_result_reg);
    Ok(())
}

/// Word-split rotate: both result halves are double-precision shifts of
/// (lo, hi) and (hi, lo); a rotate amount with bit 5 set swaps the
/// halves first.
fn emit_rotate64(ctx: &mut CompileContext<'_>, op: BinaryOp, args: &[ArgPair; 3]) -> Result<()> {
    let [src, amount, dst] = *args;
    let reg1 = target_reg(dst.lo, Reg::R0);
    let reg2 = target_reg(dst.hi, Reg::R1);

    if let Some(raw) = amount.lo.imm_value() {
        let mut rotate = raw & 0x3f;

        if (rotate & 0x20) != 0 {
            rotate -= 0x20;
            ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R2), src.hi);
            move_to_reg(&mut ctx.emitter, false, reg2, src.lo);
            ctx.emitter
                .op1(UnaryOp::Mov, false, Arg::Reg(reg1), Arg::Reg(Reg::R2));
        } else {
            ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R2), src.lo);
            move_to_reg(&mut ctx.emitter, false, reg2, src.hi);
            ctx.emitter
                .op1(UnaryOp::Mov, false, Arg::Reg(reg1), Arg::Reg(Reg::R2));
        }

        ctx.emitter.shift_into(op, reg1, reg1, reg2, Arg::Imm(rotate));
        ctx.emitter.shift_into(op, reg2, reg2, Reg::R2, Arg::Imm(rotate));

        move_from_reg(&mut ctx.emitter, false, dst.lo, reg1);
        move_from_reg(&mut ctx.emitter, false, dst.hi, reg2);
        return Ok(());
    }

    let rotate_reg = ctx.target.pref_shift_reg.unwrap_or(Reg::R2);
    let tmp_reg = if rotate_reg == Reg::R2 { Reg::R3 } else { Reg::R2 };

    move_to_reg(&mut ctx.emitter, false, rotate_reg, amount.lo);
    move_to_reg(&mut ctx.emitter, false, reg1, src.lo);
    move_to_reg(&mut ctx.emitter, false, reg2, src.hi);

    ctx.emitter
        .op2u(BinaryOp::And, false, Arg::Reg(rotate_reg), Arg::Imm(0x20));
    let no_swap = ctx.emitter.jump(Cond::Equal);
    ctx.emitter
        .op2(BinaryOp::Xor, false, Arg::Reg(reg1), Arg::Reg(reg1), Arg::Reg(reg2));
    ctx.emitter
        .op2(BinaryOp::Xor, false, Arg::Reg(reg2), Arg::Reg(reg2), Arg::Reg(reg1));
    ctx.emitter
        .op2(BinaryOp::Xor, false, Arg::Reg(reg1), Arg::Reg(reg1), Arg::Reg(reg2));
    let after_swap = ctx.emitter.emit_label();
    ctx.emitter.set_target(no_swap, after_swap);

    if !ctx.target.masked_shift {
        ctx.emitter.op2(
            BinaryOp::And,
            false,
            Arg::Reg(rotate_reg),
            Arg::Reg(rotate_reg),
            Arg::Imm(0x1f),
        );
    }
    ctx.emitter
        .op1(UnaryOp::Mov, false, Arg::Reg(tmp_reg), Arg::Reg(reg1));
    ctx.emitter
        .shift_into(op, reg1, reg1, reg2, Arg::Reg(rotate_reg));
    ctx.emitter
        .shift_into(op, reg2, reg2, tmp_reg, Arg::Reg(rotate_reg));

    move_from_reg(&mut ctx.emitter, false, dst.lo, reg1);
    move_from_reg(&mut ctx.emitter, false, dst.hi, reg2);
    Ok(())
}

/// 64-bit division on 32-bit targets: lay the operands out in memory and
/// call the matching runtime helper. The checked helpers report an error
/// code; non-zero codes jump to the trap tail.
fn emit_div_rem64(ctx: &mut CompileContext<'_>, kind: DivKind, args: &[ArgPair; 3]) -> Result<()> {
    let [dividend, divisor, dst] = *args;
    let mut is_imm = divisor.lo.is_imm();

    if is_imm {
        let lo = divisor.lo.imm_value().unwrap_or(0);
        let hi = divisor.hi.imm_value().unwrap_or(0);
        if (lo | hi) == 0 {
            ctx.emitter.op1(
                UnaryOp::Mov,
                false,
                Arg::Reg(Reg::R2),
                Arg::Imm(i64::from(ErrorCode::DivideByZero.as_u32())),
            );
            let jump = ctx.emitter.jump(Cond::Always);
            ctx.emitter.set_target(jump, ctx.trap_label);
            return Ok(());
        }
        if (lo & hi) == -1 && kind == DivKind::RemS {
            ctx.emitter.op1(UnaryOp::Mov, false, dst.lo, Arg::Imm(0));
            ctx.emitter.op1(UnaryOp::Mov, false, dst.hi, Arg::Imm(0));
            return Ok(());
        }
        if (lo & hi) == -1 && kind == DivKind::DivS {
            // -1 still needs the INT64_MIN overflow check.
            is_imm = false;
        }
    }

    let low_off = ctx.target.word_low_offset();
    let high_off = ctx.target.word_high_offset();

    // Operands not already in frame memory are parked in the context
    // spill slots so a pointer to them can be formed.
    if !dividend.lo.is_mem() {
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            Arg::Mem(Reg::Context, CONTEXT_TMP1_OFFSET + low_off),
            dividend.lo,
        );
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            Arg::Mem(Reg::Context, CONTEXT_TMP1_OFFSET + high_off),
            dividend.hi,
        );
    }
    if !divisor.lo.is_mem() {
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            Arg::Mem(Reg::Context, CONTEXT_TMP2_OFFSET + low_off),
            divisor.lo,
        );
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            Arg::Mem(Reg::Context, CONTEXT_TMP2_OFFSET + high_off),
            divisor.hi,
        );
    }

    emit_value_address(ctx, Reg::R0, dividend.lo, CONTEXT_TMP1_OFFSET);
    emit_value_address(ctx, Reg::R1, divisor.lo, CONTEXT_TMP2_OFFSET);
    emit_value_address(ctx, Reg::R2, dst.lo, CONTEXT_TMP1_OFFSET);

    let helper = match (kind, is_imm) {
        (DivKind::DivS, false) => Helper::SignedDiv64,
        (DivKind::DivS, true) => Helper::SignedDiv64Imm,
        (DivKind::DivU, false) => Helper::UnsignedDiv64,
        (DivKind::DivU, true) => Helper::UnsignedDiv64Imm,
        (DivKind::RemS, false) => Helper::SignedRem64,
        (DivKind::RemS, true) => Helper::SignedRem64Imm,
        (DivKind::RemU, false) => Helper::UnsignedRem64,
        (DivKind::RemU, true) => Helper::UnsignedRem64Imm,
    };
    let sig = if is_imm {
        CallSig::void(3)
    } else {
        CallSig::returning(3)
    };
    ctx.emitter.icall(helper, sig);

    if !is_imm {
        ctx.emitter
            .op1(UnaryOp::Mov, false, Arg::Reg(Reg::R2), Arg::Reg(Reg::R0));
        let failed = ctx.emitter.cmp(
            Cond::NotEqual,
            false,
            Arg::Reg(Reg::R0),
            Arg::Imm(i64::from(ErrorCode::NoError.as_u32())),
        );
        ctx.emitter.set_target(failed, ctx.trap_label);
    }

    // When the destination is not frame memory the helper wrote through
    // the tmp1 pointer; copy the value out.
    if !dst.lo.is_mem() {
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            dst.lo,
            Arg::Mem(Reg::Context, CONTEXT_TMP1_OFFSET + low_off),
        );
        ctx.emitter.op1(
            UnaryOp::Mov,
            false,
            dst.hi,
            Arg::Mem(Reg::Context, CONTEXT_TMP1_OFFSET + high_off),
        );
    }
    Ok(())
}

/// Forms the address of a 64-bit value for the helper ABI: the frame slot
/// itself when the value lives there, otherwise the given context spill
/// slot.
fn emit_value_address(ctx: &mut CompileContext<'_>, dst: Reg, low_arg: Arg, tmp_offset: i32) {
    if let Arg::Mem(Reg::Frame, disp) = low_arg {
        let base = disp - ctx.target.word_low_offset();
        ctx.emitter.op2(
            BinaryOp::Add,
            false,
            Arg::Reg(dst),
            Arg::Reg(Reg::Frame),
            Arg::Imm(i64::from(base)),
        );
    } else {
        ctx.emitter.op2(
            BinaryOp::Add,
            false,
            Arg::Reg(dst),
            Arg::Reg(Reg::Context),
            Arg::Imm(i64::from(tmp_offset)),
        );
    }
}

pub(crate) fn emit_unary(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<()> {
    let instr = ctx.func.instr(id);
    let opcode = instr.opcode;

    if opcode.is_32bit() || ctx.target.is_64bit() {
        let w32 = ctx.w32(opcode);
        let args = [ctx.arg(instr.operands[0])?, ctx.arg(instr.operands[1])?];

        let op = match opcode {
            Opcode::I32Clz | Opcode::I64Clz => UnaryOp::Clz,
            Opcode::I32Ctz | Opcode::I64Ctz => UnaryOp::Ctz,
            Opcode::I32Popcnt => return emit_popcnt(ctx, w32, args),
            Opcode::I64Popcnt => return emit_popcnt_word(ctx, args),
            Opcode::I32Extend8S | Opcode::I64Extend8S => {
                return emit_extend(ctx, UnaryOp::MovS8, w32, args);
            }
            Opcode::I32Extend16S | Opcode::I64Extend16S => {
                return emit_extend(ctx, UnaryOp::MovS16, w32, args);
            }
            Opcode::I64Extend32S => return emit_extend(ctx, UnaryOp::MovS32, false, args),
            _ => return Err(Error::Internal(format!("not a unary opcode: {opcode:?}"))),
        };

        // Immediate sources are unsupported by the bit-count operations.
        let src = if args[0].is_imm() {
            ctx.emitter.op1(UnaryOp::Mov, w32, Arg::Reg(Reg::R0), args[0]);
            Arg::Reg(Reg::R0)
        } else {
            args[0]
        };
        ctx.emitter.op1(op, w32, args[1], src);
        return Ok(());
    }

    let args = [
        ctx.arg_pair(instr.operands[0])?,
        ctx.arg_pair(instr.operands[1])?,
    ];

    match opcode {
        Opcode::I64Clz => emit_count_zeroes(ctx, UnaryOp::Clz, &args),
        Opcode::I64Ctz => emit_count_zeroes(ctx, UnaryOp::Ctz, &args),
        Opcode::I64Popcnt => emit_popcnt64(ctx, &args),
        Opcode::I64Extend8S => emit_extend64(ctx, UnaryOp::MovS8, &args),
        Opcode::I64Extend16S => emit_extend64(ctx, UnaryOp::MovS16, &args),
        Opcode::I64Extend32S => {
            if args[0].lo == args[1].lo {
                ctx.emitter
                    .op2(BinaryOp::Ashr, false, args[1].hi, args[0].lo, Arg::Imm(31));
                return Ok(());
            }
            emit_extend64(ctx, UnaryOp::Mov, &args)
        }
        _ => Err(Error::Internal(format!("not a 64-bit unary opcode: {opcode:?}"))),
    }
}

/// clz/ctz on a pair: count in the leading half; when it is zero, count
/// in the trailing half and add 32.
fn emit_count_zeroes(ctx: &mut CompileContext<'_>, op: UnaryOp, args: &[ArgPair; 2]) -> Result<()> {
    let result_reg = target_reg(args[1].lo, Reg::R1);

    let (first, second) = if op == UnaryOp::Clz {
        (args[0].hi, args[0].lo)
    } else {
        (args[0].lo, args[0].hi)
    };

    move_to_reg(&mut ctx.emitter, false, result_reg, first);
    ctx.emitter
        .op1(UnaryOp::Mov, false, Arg::Reg(Reg::R0), Arg::Imm(0));
    let nonzero = ctx
        .emitter
        .cmp(Cond::NotEqual, false, Arg::Reg(result_reg), Arg::Imm(0));
    move_to_reg(&mut ctx.emitter, false, result_reg, second);
    ctx.emitter
        .op1(UnaryOp::Mov, false, Arg::Reg(Reg::R0), Arg::Imm(32));
    let join = ctx.emitter.emit_label();
    ctx.emitter.set_target(nonzero, join);

    ctx.emitter
        .op1(op, false, Arg::Reg(result_reg), Arg::Reg(result_reg));
    ctx.emitter.op2(
        BinaryOp::Add,
        false,
        Arg::Reg(result_reg),
        Arg::Reg(result_reg),
        Arg::Reg(Reg::R0),
    );

    move_from_reg(&mut ctx.emitter, false, args[1].lo, result_reg);
    ctx.emitter.op1(UnaryOp::Mov, false, args[1].hi, Arg::Imm(0));
    Ok(())
}

fn emit_popcnt(ctx: &mut CompileContext<'_>, w32: bool, args: [Arg; 2]) -> Result<()> {
    move_to_reg(&mut ctx.emitter, w32, Reg::R0, args[0]);
    ctx.emitter.icall(Helper::Popcnt32, CallSig::returning(1));
    move_from_reg(&mut ctx.emitter, w32, args[1], Reg::R0);
    Ok(())
}

/// i64 popcount on 64-bit targets: single word argument.
fn emit_popcnt_word(ctx: &mut CompileContext<'_>, args: [Arg; 2]) -> Result<()> {
    move_to_reg(&mut ctx.emitter, false, Reg::R0, args[0]);
    ctx.emitter.icall(Helper::Popcnt64Word, CallSig::returning(1));
    move_from_reg(&mut ctx.emitter, false, args[1], Reg::R0);
    Ok(())
}

/// i64 popcount on 32-bit targets: low and high words as two arguments.
fn emit_popcnt64(ctx: &mut CompileContext<'_>, args: &[ArgPair; 2]) -> Result<()> {
    move_to_reg(&mut ctx.emitter, false, Reg::R0, args[0].lo);
    move_to_reg(&mut ctx.emitter, false, Reg::R1, args[0].hi);
    ctx.emitter.icall(Helper::Popcnt64, CallSig::returning(2));
    move_from_reg(&mut ctx.emitter, false, args[1].lo, Reg::R0);
    ctx.emitter.op1(UnaryOp::Mov, false, args[1].hi, Arg::Imm(0));
    Ok(())
}

fn emit_extend(ctx: &mut CompileContext<'_>, op: UnaryOp, w32: bool, args: [Arg; 2]) -> Result<()> {
    let reg = target_reg(args[1], Reg::R0);
    let src = adjust_subword_source(ctx, op, args[0]);

    ctx.emitter.op1(op, w32, Arg::Reg(reg), src);
    move_from_reg(&mut ctx.emitter, w32, args[1], reg);
    Ok(())
}

/// Sign-extension of a pair: extend into the low half, then fill the high
/// half with the sign via an arithmetic shift.
fn emit_extend64(ctx: &mut CompileContext<'_>, op: UnaryOp, args: &[ArgPair; 2]) -> Result<()> {
    let reg = target_reg(args[1].lo, Reg::R0);
    let src = adjust_subword_source(ctx, op, args[0].lo);

    ctx.emitter.op1(op, false, Arg::Reg(reg), src);
    move_from_reg(&mut ctx.emitter, false, args[1].lo, reg);

    if args[1].lo.is_mem() {
        ctx.emitter
            .op2(BinaryOp::Ashr, false, Arg::Reg(reg), Arg::Reg(reg), Arg::Imm(31));
        ctx.emitter.op1(UnaryOp::Mov, false, args[1].hi, Arg::Reg(reg));
        return Ok(());
    }

    ctx.emitter
        .op2(BinaryOp::Ashr, false, args[1].hi, Arg::Reg(reg), Arg::Imm(31));
    Ok(())
}

/// On big-endian targets a sub-word read of a 32-bit container sits at
/// the end of the word; bump the displacement to the low byte/half.
fn adjust_subword_source(ctx: &CompileContext<'_>, op: UnaryOp, src: Arg) -> Arg {
    if !ctx.target.big_endian {
        return src;
    }
    if let Arg::Mem(base, disp) = src {
        let adjust = match op {
            UnaryOp::MovS8 => 3,
            UnaryOp::MovS16 => 2,
            _ => 0,
        };
        return Arg::Mem(base, disp + adjust);
    }
    src
}

pub(crate) fn emit_convert(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<()> {
    let instr = ctx.func.instr(id);

    if ctx.target.is_64bit() {
        let src = ctx.arg(instr.operands[0])?;
        let dst = ctx.arg(instr.operands[1])?;
        match instr.opcode {
            Opcode::I32WrapI64 => ctx.emitter.op1(UnaryOp::Mov, true, dst, src),
            Opcode::I64ExtendI32S => {
                let reg = target_reg(dst, Reg::R0);
                ctx.emitter.op1(UnaryOp::MovS32, false, Arg::Reg(reg), src);
                move_from_reg(&mut ctx.emitter, false, dst, reg);
            }
            Opcode::I64ExtendI32U => {
                let reg = target_reg(dst, Reg::R0);
                ctx.emitter.op1(UnaryOp::MovU32, false, Arg::Reg(reg), src);
                move_from_reg(&mut ctx.emitter, false, dst, reg);
            }
            _ => return Err(Error::Internal("unexpected conversion".to_string())),
        }
        return Ok(());
    }

    match instr.opcode {
        Opcode::I32WrapI64 => {
            // Just copy the lower word.
            let src = ctx.arg_pair(instr.operands[0])?;
            let dst = ctx.arg(instr.operands[1])?;
            ctx.emitter.op1(UnaryOp::Mov, false, dst, src.lo);
        }
        Opcode::I64ExtendI32S => {
            let src = ctx.arg(instr.operands[0])?;
            let dst = ctx.arg_pair(instr.operands[1])?;
            let reg = target_reg(src, Reg::R0);
            move_to_reg(&mut ctx.emitter, false, reg, src);
            move_from_reg(&mut ctx.emitter, false, dst.lo, reg);
            ctx.emitter
                .op2(BinaryOp::Ashr, false, dst.hi, Arg::Reg(reg), Arg::Imm(31));
        }
        Opcode::I64ExtendI32U => {
            let src = ctx.arg(instr.operands[0])?;
            let dst = ctx.arg_pair(instr.operands[1])?;
            ctx.emitter.op1(UnaryOp::Mov, false, dst.lo, src);
            ctx.emitter.op1(UnaryOp::Mov, false, dst.hi, Arg::Imm(0));
        }
        _ => return Err(Error::Internal("unexpected conversion".to_string())),
    }
    Ok(())
}

fn compare_cond(opcode: Opcode) -> Cond {
    match opcode {
        Opcode::I32Eqz | Opcode::I64Eqz | Opcode::I32Eq | Opcode::I64Eq => Cond::Equal,
        Opcode::I32Ne | Opcode::I64Ne => Cond::NotEqual,
        Opcode::I32LtS | Opcode::I64LtS => Cond::SigLess,
        Opcode::I32LtU | Opcode::I64LtU => Cond::Less,
        Opcode::I32GtS | Opcode::I64GtS => Cond::SigGreater,
        Opcode::I32GtU | Opcode::I64GtU => Cond::Greater,
        Opcode::I32LeS | Opcode::I64LeS => Cond::SigLessEqual,
        Opcode::I32LeU | Opcode::I64LeU => Cond::LessEqual,
        Opcode::I32GeS | Opcode::I64GeS => Cond::SigGreaterEqual,
        Opcode::I32GeU | Opcode::I64GeU => Cond::GreaterEqual,
        _ => Cond::Equal,
    }
}

/// What the instruction following a compare does with its result.
enum FusedUse {
    None,
    Branch { invert: bool },
    Select,
}

fn fused_use(ctx: &CompileContext<'_>, id: InstrId) -> FusedUse {
    let next_position = id.0 as usize + 1;
    // A label between the two instructions must stay addressable.
    if ctx.func.has_label_at(next_position) {
        return FusedUse::None;
    }
    let Some(next) = ctx.func.next(id) else {
        return FusedUse::None;
    };
    match next.opcode {
        Opcode::JumpIfTrue | Opcode::JumpIfFalse
            if next.operands.first() == Some(&crate::ir::Operand::Ref(id)) =>
        {
            FusedUse::Branch {
                invert: next.opcode == Opcode::JumpIfFalse,
            }
        }
        Opcode::Select if next.operands.get(2) == Some(&crate::ir::Operand::Ref(id)) => {
            FusedUse::Select
        }
        _ => FusedUse::None,
    }
}

/// Lowers a comparison, possibly consuming the following branch or
/// select. Returns the number of instructions consumed.
pub(crate) fn emit_compare(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<usize> {
    let instr = ctx.func.instr(id);
    let opcode = instr.opcode;
    let mut cond = compare_cond(opcode);
    let fused = fused_use(ctx, id);
    let is_eqz = matches!(opcode, Opcode::I32Eqz | Opcode::I64Eqz);

    if opcode.is_32bit() || ctx.target.is_64bit() {
        let w32 = ctx.w32(opcode);
        let a = ctx.arg(instr.operands[0])?;
        let b = if is_eqz {
            Arg::Imm(0)
        } else {
            ctx.arg(instr.operands[1])?
        };

        if let FusedUse::Branch { invert } = fused {
            if invert {
                cond = cond.negate();
            }
            let target = branch_target(ctx, id)?;
            let jump = ctx.emitter.cmp(cond, w32, a, b);
            ctx.emitter.set_target(jump, target);
            return Ok(2);
        }

        ctx.emitter.op2u(BinaryOp::Sub, w32, a, b);

        if matches!(fused, FusedUse::Select) {
            emit_select(ctx, InstrId(id.0 + 1), Some(cond))?;
            return Ok(2);
        }

        let dst = ctx.arg(instr.operands[opcode.param_count()])?;
        ctx.emitter.op_flags(cond, ctx.target.is_64bit(), dst);
        return Ok(1);
    }

    // 64-bit compare on a 32-bit target.
    let a = ctx.arg_pair(instr.operands[0])?;

    if is_eqz {
        ctx.emitter.op2u(BinaryOp::Or, false, a.lo, a.hi);
    } else {
        let b = ctx.arg_pair(instr.operands[1])?;

        // Signed orderings bias the high halves so a single unsigned
        // condition is valid on both the high-difference and the
        // low-compare path.
        let signed = matches!(
            cond,
            Cond::SigLess | Cond::SigGreater | Cond::SigLessEqual | Cond::SigGreaterEqual
        );
        let (hi_a, hi_b) = if signed {
            cond = cond.unsigned_variant();
            (
                bias_high_half(ctx, a.hi, Reg::R2),
                bias_high_half(ctx, b.hi, Reg::R3),
            )
        } else {
            (a.hi, b.hi)
        };

        ctx.emitter.op2u(BinaryOp::Sub, false, hi_a, hi_b);
        let high_differs = ctx.emitter.jump(Cond::NotEqual);
        ctx.emitter.op2u(BinaryOp::Sub, false, a.lo, b.lo);
        let join = ctx.emitter.emit_label();
        ctx.emitter.set_target(high_differs, join);
    }

    match fused {
        FusedUse::Branch { invert } => {
            if invert {
                cond = cond.negate();
            }
            let target = branch_target(ctx, id)?;
            let jump = ctx.emitter.jump(cond);
            ctx.emitter.set_target(jump, target);
            Ok(2)
        }
        FusedUse::Select => {
            emit_select(ctx, InstrId(id.0 + 1), Some(cond))?;
            Ok(2)
        }
        FusedUse::None => {
            let dst = ctx.arg(instr.operands[opcode.param_count()])?;
            ctx.emitter.op_flags(cond, false, dst);
            Ok(1)
        }
    }
}

/// XORs the sign bit into a high half so signed 64-bit ordering reduces
/// to an unsigned word comparison.
fn bias_high_half(ctx: &mut CompileContext<'_>, arg: Arg, scratch: Reg) -> Arg {
    if let Some(value) = arg.imm_value() {
        let biased = (value as u32) ^ 0x8000_0000;
        return Arg::Imm(i64::from(biased.cast_signed()));
    }
    ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(scratch), arg);
    ctx.emitter.op2(
        BinaryOp::Xor,
        false,
        Arg::Reg(scratch),
        Arg::Reg(scratch),
        Arg::Imm(i64::from(0x8000_0000u32.cast_signed())),
    );
    Arg::Reg(scratch)
}

fn branch_target(ctx: &CompileContext<'_>, compare_id: InstrId) -> Result<crate::lir::Label> {
    let next = ctx
        .func
        .next(compare_id)
        .ok_or_else(|| Error::Internal("fused branch disappeared".to_string()))?;
    let Payload::Branch { target } = next.payload else {
        return Err(Error::Internal("fused branch without target".to_string()));
    };
    Ok(ctx.branch_label(target))
}

/// Value select. `cond` carries the flag condition of a fused compare;
/// `None` reads the condition operand and tests it against zero.
pub(crate) fn emit_select(
    ctx: &mut CompileContext<'_>,
    id: InstrId,
    cond: Option<Cond>,
) -> Result<()> {
    let instr = ctx.func.instr(id);
    let value_size = match instr.payload {
        Payload::Select { value_size } => value_size,
        _ => 4,
    };

    if value_size == 4 || ctx.target.is_64bit() {
        let w32 = value_size == 4 && ctx.target.is_64bit();
        let a = ctx.arg(instr.operands[0])?;
        let b = ctx.arg(instr.operands[1])?;
        let dst = ctx.arg(instr.operands[3])?;

        let cond = match cond {
            Some(cond) => cond,
            None => {
                let cond_arg = ctx.arg(instr.operands[2])?;
                ctx.emitter
                    .op2u(BinaryOp::Sub, ctx.target.is_64bit(), cond_arg, Arg::Imm(0));
                Cond::NotEqual
            }
        };

        let reg = target_reg(dst, Reg::R0);
        let b = if b.is_reg() {
            b
        } else {
            ctx.emitter.op1(UnaryOp::Mov, w32, Arg::Reg(reg), b);
            Arg::Reg(reg)
        };
        ctx.emitter.select(cond, w32, reg, a, target_reg(b, reg));
        move_from_reg(&mut ctx.emitter, w32, dst, reg);
        return Ok(());
    }

    let a = ctx.arg_pair(instr.operands[0])?;
    let b = ctx.arg_pair(instr.operands[1])?;
    let dst = ctx.arg_pair(instr.operands[3])?;

    let cond = match cond {
        Some(cond) => cond,
        None => {
            let cond_arg = ctx.arg(instr.operands[2])?;
            ctx.emitter.op2u(BinaryOp::Sub, false, cond_arg, Arg::Imm(0));
            Cond::NotEqual
        }
    };

    let reg1 = target_reg(dst.lo, Reg::R0);
    let reg2 = target_reg(dst.hi, Reg::R1);

    if !ctx.target.has_cmov {
        move_to_reg(&mut ctx.emitter, false, reg1, a.lo);
        move_to_reg(&mut ctx.emitter, false, reg2, a.hi);
        let keep = ctx.emitter.jump(cond);
        move_to_reg(&mut ctx.emitter, false, reg1, b.lo);
        move_to_reg(&mut ctx.emitter, false, reg2, b.hi);
        let join = ctx.emitter.emit_label();
        ctx.emitter.set_target(keep, join);
        move_from_reg(&mut ctx.emitter, false, dst.lo, reg1);
        move_from_reg(&mut ctx.emitter, false, dst.hi, reg2);
        return Ok(());
    }

    let b_lo = if b.lo.is_reg() {
        b.lo
    } else {
        ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(reg1), b.lo);
        Arg::Reg(reg1)
    };
    let b_hi = if b.hi.is_reg() {
        b.hi
    } else {
        ctx.emitter.op1(UnaryOp::Mov, false, Arg::Reg(reg2), b.hi);
        Arg::Reg(reg2)
    };

    ctx.emitter.select(cond, false, reg1, a.lo, target_reg(b_lo, reg1));
    ctx.emitter.select(cond, false, reg2, a.hi, target_reg(b_hi, reg2));
    move_from_reg(&mut ctx.emitter, false, dst.lo, reg1);
    move_from_reg(&mut ctx.emitter, false, dst.hi, reg2);
    Ok(())
}
