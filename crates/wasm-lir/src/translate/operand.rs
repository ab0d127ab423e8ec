//! Operand shuttle: converts decoded operands into LIR argument
//! descriptors.
//!
//! No code is emitted for non-immediate operands; the returned argument is
//! addressing-mode material for later emits. Callers are responsible for
//! hoisting immediates into registers when the downstream operation
//! requires a register source.

use crate::ir::{Function, Opcode, Operand, Payload};
use crate::lir::{Arg, ArgPair, Emitter, Reg, Target, UnaryOp};
use crate::{Error, Result};

/// Resolves an operand to a single word-sized argument.
///
/// A reference to a constant becomes an immediate; a reference to any
/// other producer resolves to that producer's result slot.
pub fn operand_to_arg(func: &Function, operand: Operand) -> Result<Arg> {
    match operand {
        Operand::Slot(slot) => Ok(Arg::Mem(Reg::Frame, slot_offset(slot))),
        Operand::Ref(id) => {
            let instr = func.instr(id);
            match &instr.payload {
                Payload::Const32(value) => Ok(Arg::Imm(i64::from(value.cast_signed()))),
                Payload::Const64(value) => Ok(Arg::Imm(value.cast_signed())),
                _ => producer_slot(func, operand).map(|slot| Arg::Mem(Reg::Frame, slot_offset(slot))),
            }
        }
    }
}

/// Resolves a 64-bit operand to a low/high pair on 32-bit targets.
///
/// Immediate pairs always carry the low word in `lo` regardless of
/// endianness; frame-slot pairs get endian-dependent half offsets.
pub fn operand_to_arg_pair(func: &Function, target: &Target, operand: Operand) -> Result<ArgPair> {
    let slot = match operand {
        Operand::Slot(slot) => slot,
        Operand::Ref(id) => {
            let instr = func.instr(id);
            if let Payload::Const64(value) = instr.payload {
                let lo = u32::try_from(value & 0xffff_ffff).unwrap_or(0);
                let hi = u32::try_from(value >> 32).unwrap_or(0);
                return Ok(ArgPair {
                    lo: Arg::Imm(i64::from(lo.cast_signed())),
                    hi: Arg::Imm(i64::from(hi.cast_signed())),
                });
            }
            producer_slot(func, operand)?
        }
    };
    let base = slot_offset(slot);
    Ok(ArgPair {
        lo: Arg::Mem(Reg::Frame, base + target.word_low_offset()),
        hi: Arg::Mem(Reg::Frame, base + target.word_high_offset()),
    })
}

/// Result slot of a referenced producer (a compare feeding an unfused
/// branch, for example).
fn producer_slot(func: &Function, operand: Operand) -> Result<u32> {
    let Operand::Ref(id) = operand else {
        return Err(Error::Internal("expected an instruction reference".to_string()));
    };
    let instr = func.instr(id);
    let result = instr.operands.get(instr.opcode.param_count());
    match result {
        Some(Operand::Slot(slot)) => Ok(*slot),
        _ => Err(Error::Internal(format!(
            "operand references {:?} which has no result slot",
            instr.opcode
        ))),
    }
}

fn slot_offset(slot: u32) -> i32 {
    (slot << 2).cast_signed()
}

/// Materializes a constant instruction into its result slot. Constants
/// without a result operand feed immediates only and emit nothing.
pub fn emit_store_immediate(
    emitter: &mut Emitter,
    target: &Target,
    opcode: Opcode,
    payload: &Payload,
    operands: &[Operand],
) {
    let Some(Operand::Slot(slot)) = operands.first() else {
        return;
    };
    let offset = slot_offset(*slot);

    if opcode == Opcode::Const32 {
        let Payload::Const32(value) = payload else {
            return;
        };
        emitter.op1(
            UnaryOp::Mov,
            target.is_64bit(),
            Arg::Mem(Reg::Frame, offset),
            Arg::Imm(i64::from(value.cast_signed())),
        );
        return;
    }

    let Payload::Const64(value) = payload else {
        return;
    };
    if target.is_64bit() {
        emitter.op1(
            UnaryOp::Mov,
            false,
            Arg::Mem(Reg::Frame, offset),
            Arg::Imm(value.cast_signed()),
        );
        return;
    }

    let lo = u32::try_from(value & 0xffff_ffff).unwrap_or(0);
    let hi = u32::try_from(value >> 32).unwrap_or(0);
    emitter.op1(
        UnaryOp::Mov,
        false,
        Arg::Mem(Reg::Frame, offset + target.word_low_offset()),
        Arg::Imm(i64::from(lo.cast_signed())),
    );
    emitter.op1(
        UnaryOp::Mov,
        false,
        Arg::Mem(Reg::Frame, offset + target.word_high_offset()),
        Arg::Imm(i64::from(hi.cast_signed())),
    );
}

/// Register an argument already occupies, or `default`.
pub fn target_reg(arg: Arg, default: Reg) -> Reg {
    match arg {
        Arg::Reg(reg) => reg,
        _ => default,
    }
}

/// Moves `src` into `reg` unless it is already there.
pub fn move_to_reg(emitter: &mut Emitter, w32: bool, reg: Reg, src: Arg) {
    if src != Arg::Reg(reg) {
        emitter.op1(UnaryOp::Mov, w32, Arg::Reg(reg), src);
    }
}

/// Moves `reg` into `dst` unless `dst` already is that register.
pub fn move_from_reg(emitter: &mut Emitter, w32: bool, dst: Arg, reg: Reg) {
    if dst != Arg::Reg(reg) {
        emitter.op1(UnaryOp::Mov, w32, dst, Arg::Reg(reg));
    }
}
