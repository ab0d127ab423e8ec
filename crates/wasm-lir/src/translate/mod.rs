//! Lowering driver: walks a decoded instruction stream and dispatches
//! each instruction to the matching lowerer.
//!
//! Compare instructions peek at their successor to fuse with a following
//! branch or select. Trapping paths jump to one of two labels shared by
//! the whole function; the tails they target are emitted after the body,
//! together with the deferred slow cases of the signed-division lowering.

// Slot arithmetic and immediate splitting require wrapping casts.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

pub mod int_math;
pub mod memory;
pub mod operand;

use crate::ir::{Function, InstrId, OpGroup, Opcode, Operand, Payload};
use crate::lir::{Arg, ArgPair, Cond, Emitter, JumpId, Label, LirInst, Program, Reg, Target, UnaryOp};
use crate::runtime::{CONTEXT_ERROR_OFFSET, ErrorCode};
use crate::{Error, Result};

/// Deferred fragment kinds emitted after the function body.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SlowCaseKind {
    /// Signed division with divisor in {-1, 0}; checks overflow and zero.
    SignedDivide { w32: bool },
    /// Signed remainder with divisor in {-1, 0}; yields 0 for -1, traps
    /// for 0.
    SignedModulo { w32: bool },
}

#[derive(Debug)]
pub(crate) struct SlowCase {
    pub kind: SlowCaseKind,
    pub jump: JumpId,
    pub resume: Label,
}

/// Per-compilation state handed to the lowerers.
pub struct CompileContext<'a> {
    pub(crate) func: &'a Function,
    pub(crate) target: Target,
    pub(crate) emitter: Emitter,
    pub(crate) trap_label: Label,
    pub(crate) memory_trap_label: Label,
    pub(crate) slow_cases: Vec<SlowCase>,
    branch_labels: Vec<Label>,
}

impl CompileContext<'_> {
    pub(crate) fn arg(&self, operand: Operand) -> Result<Arg> {
        operand::operand_to_arg(self.func, operand)
    }

    pub(crate) fn arg_pair(&self, operand: Operand) -> Result<ArgPair> {
        operand::operand_to_arg_pair(self.func, &self.target, operand)
    }

    pub(crate) fn branch_label(&self, target: crate::ir::LabelRef) -> Label {
        self.branch_labels[target.0 as usize]
    }

    /// 32-bit override flag for an operation of the given value width.
    pub(crate) fn w32(&self, opcode: Opcode) -> bool {
        opcode.is_32bit() && self.target.is_64bit()
    }

    fn bind_labels_at(&mut self, position: usize) {
        for (index, &label_position) in self.func.label_positions().iter().enumerate() {
            if label_position == position {
                self.emitter.bind(self.branch_labels[index]);
            }
        }
    }
}

/// Compiles one function's instruction stream into an LIR program.
pub fn compile_function(func: &Function, target: &Target) -> Result<Program> {
    let mut emitter = Emitter::new();
    let trap_label = emitter.alloc_label();
    let memory_trap_label = emitter.alloc_label();
    let branch_labels = func
        .label_positions()
        .iter()
        .map(|_| emitter.alloc_label())
        .collect();

    let mut ctx = CompileContext {
        func,
        target: target.clone(),
        emitter,
        trap_label,
        memory_trap_label,
        slow_cases: Vec::new(),
        branch_labels,
    };

    let span = tracing::debug_span!("compile_function", instructions = func.len());
    let _entered = span.enter();

    let mut position = 0;
    while position < func.len() {
        ctx.bind_labels_at(position);
        let id = InstrId(position as u32);
        let instr = func.instr(id);
        tracing::trace!(position, opcode = ?instr.opcode, "lowering");

        let consumed = match instr.opcode.group() {
            OpGroup::Const => {
                operand::emit_store_immediate(
                    &mut ctx.emitter,
                    &ctx.target,
                    instr.opcode,
                    &instr.payload,
                    &instr.operands,
                );
                1
            }
            OpGroup::Binary => {
                int_math::emit_binary(&mut ctx, id)?;
                1
            }
            OpGroup::Unary => {
                int_math::emit_unary(&mut ctx, id)?;
                1
            }
            OpGroup::Convert => {
                int_math::emit_convert(&mut ctx, id)?;
                1
            }
            OpGroup::Compare => int_math::emit_compare(&mut ctx, id)?,
            OpGroup::Select => {
                int_math::emit_select(&mut ctx, id, None)?;
                1
            }
            OpGroup::Branch => {
                emit_branch(&mut ctx, id)?;
                1
            }
            OpGroup::Load => {
                memory::emit_load(&mut ctx, id)?;
                1
            }
            OpGroup::Store => {
                memory::emit_store(&mut ctx, id)?;
                1
            }
            OpGroup::Atomic => {
                memory::emit_atomic(&mut ctx, id)?;
                1
            }
            OpGroup::Memory => {
                memory::emit_memory(&mut ctx, id)?;
                1
            }
        };
        position += consumed;
    }
    ctx.bind_labels_at(func.len());
    ctx.emitter.ret();

    emit_slow_cases(&mut ctx);
    emit_trap_tails(&mut ctx);

    ctx.emitter.finish()
}

/// Branches whose condition was not fused into a preceding compare.
fn emit_branch(ctx: &mut CompileContext<'_>, id: InstrId) -> Result<()> {
    let instr = ctx.func.instr(id);
    let Payload::Branch { target } = instr.payload else {
        return Err(Error::Internal("branch without target".to_string()));
    };
    let label = ctx.branch_label(target);

    match instr.opcode {
        Opcode::Jump => {
            let jump = ctx.emitter.jump(Cond::Always);
            ctx.emitter.set_target(jump, label);
        }
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
            let cond = if instr.opcode == Opcode::JumpIfTrue {
                Cond::NotEqual
            } else {
                Cond::Equal
            };
            let value = ctx.arg(instr.operands[0])?;
            let w32 = ctx.target.is_64bit();
            let jump = ctx.emitter.cmp(cond, w32, value, Arg::Imm(0));
            ctx.emitter.set_target(jump, label);
        }
        _ => return Err(Error::Internal("unexpected branch opcode".to_string())),
    }
    Ok(())
}

/// Emits the deferred signed-division fragments. Each observes
/// `R1 = divisor + 1` from the inline `divisor + 1 <=u 1` test.
fn emit_slow_cases(ctx: &mut CompileContext<'_>) {
    let slow_cases = std::mem::take(&mut ctx.slow_cases);
    for case in slow_cases {
        let entry = ctx.emitter.emit_label();
        ctx.emitter.set_target(case.jump, entry);

        match case.kind {
            SlowCaseKind::SignedDivide { w32 } => {
                let min_value = if w32 || ctx.target.is_32bit() {
                    i64::from(i32::MIN)
                } else {
                    i64::MIN
                };
                ctx.emitter.op1(
                    UnaryOp::Mov,
                    false,
                    Arg::Reg(Reg::R2),
                    Arg::Imm(i64::from(ErrorCode::DivideByZero.as_u32())),
                );
                let zero = ctx
                    .emitter
                    .cmp(Cond::Equal, w32, Arg::Reg(Reg::R1), Arg::Imm(1));
                ctx.emitter.set_target(zero, ctx.trap_label);
                ctx.emitter.op1(
                    UnaryOp::Mov,
                    false,
                    Arg::Reg(Reg::R2),
                    Arg::Imm(i64::from(ErrorCode::IntegerOverflow.as_u32())),
                );
                let overflow =
                    ctx.emitter
                        .cmp(Cond::Equal, w32, Arg::Reg(Reg::R0), Arg::Imm(min_value));
                ctx.emitter.set_target(overflow, ctx.trap_label);
                let back = ctx.emitter.jump(Cond::Always);
                ctx.emitter.set_target(back, case.resume);
            }
            SlowCaseKind::SignedModulo { w32 } => {
                ctx.emitter.op1(
                    UnaryOp::Mov,
                    false,
                    Arg::Reg(Reg::R2),
                    Arg::Imm(i64::from(ErrorCode::DivideByZero.as_u32())),
                );
                let zero = ctx
                    .emitter
                    .cmp(Cond::Equal, w32, Arg::Reg(Reg::R1), Arg::Imm(1));
                ctx.emitter.set_target(zero, ctx.trap_label);
                ctx.emitter
                    .op1(UnaryOp::Mov, w32, Arg::Reg(Reg::R1), Arg::Imm(0));
                let back = ctx.emitter.jump(Cond::Always);
                ctx.emitter.set_target(back, case.resume);
            }
        }
    }
}

/// The shared trap tails. The memory tail loads the out-of-bounds code
/// and falls through into the generic tail, which publishes `R2` as the
/// context error and leaves the function.
fn emit_trap_tails(ctx: &mut CompileContext<'_>) {
    ctx.emitter.bind(ctx.memory_trap_label);
    ctx.emitter.op1(
        UnaryOp::Mov,
        false,
        Arg::Reg(Reg::R2),
        Arg::Imm(i64::from(ErrorCode::OutOfBoundsMemAccess.as_u32())),
    );
    ctx.emitter.bind(ctx.trap_label);
    ctx.emitter.op1(
        UnaryOp::MovU32,
        false,
        Arg::Mem(Reg::Context, CONTEXT_ERROR_OFFSET),
        Arg::Reg(Reg::R2),
    );
    ctx.emitter.ret();
}

/// Count of a given instruction kind, for structural assertions in tests.
#[must_use]
pub fn count_insts(program: &Program, predicate: impl Fn(&LirInst) -> bool) -> usize {
    program.insts.iter().filter(|inst| predicate(inst)).count()
}
