//! Label and jump bookkeeping around the LIR instruction buffer.

use crate::{Error, Result};

use super::instruction::{Arg, BinaryOp, CallSig, Cond, Helper, LirInst, Reg, UnaryOp, ZeroOp};

/// A jump target. Allocated first, bound to a position later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub u32);

/// Handle of an emitted jump whose target may still be unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpId(pub u32);

/// A finished, fully resolved LIR program.
#[derive(Debug, Clone)]
pub struct Program {
    pub insts: Vec<LirInst>,
    /// Instruction position of each label.
    pub labels: Vec<usize>,
    /// Bound label of each jump.
    pub jump_targets: Vec<Label>,
}

impl Program {
    /// Resolved instruction position of a jump.
    #[must_use]
    pub fn jump_position(&self, jump: JumpId) -> usize {
        self.labels[self.jump_targets[jump.0 as usize].0 as usize]
    }
}

#[derive(Debug, Default)]
pub struct Emitter {
    insts: Vec<LirInst>,
    labels: Vec<Option<usize>>,
    jump_targets: Vec<Option<Label>>,
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn insts(&self) -> &[LirInst] {
        &self.insts
    }

    fn push(&mut self, inst: LirInst) {
        self.insts.push(inst);
    }

    pub fn op0(&mut self, op: ZeroOp, w32: bool) {
        self.push(LirInst::Op0 { op, w32 });
    }

    pub fn op1(&mut self, op: UnaryOp, w32: bool, dst: Arg, src: Arg) {
        self.push(LirInst::Op1 { op, w32, dst, src });
    }

    pub fn op2(&mut self, op: BinaryOp, w32: bool, dst: Arg, a: Arg, b: Arg) {
        self.push(LirInst::Op2 {
            op,
            w32,
            set_flags: false,
            set_carry: false,
            dst: Some(dst),
            a,
            b,
        });
    }

    /// Two-operand form that also updates the carry bit (`ADD`/`SUB` with
    /// carry-out).
    pub fn op2_carry(&mut self, op: BinaryOp, w32: bool, dst: Arg, a: Arg, b: Arg) {
        self.push(LirInst::Op2 {
            op,
            w32,
            set_flags: false,
            set_carry: true,
            dst: Some(dst),
            a,
            b,
        });
    }

    /// Flag-set-only form; the result is discarded.
    pub fn op2u(&mut self, op: BinaryOp, w32: bool, a: Arg, b: Arg) {
        self.push(LirInst::Op2 {
            op,
            w32,
            set_flags: true,
            set_carry: true,
            dst: None,
            a,
            b,
        });
    }

    pub fn shift_into(&mut self, op: BinaryOp, dst: Reg, src: Reg, other: Reg, count: Arg) {
        self.push(LirInst::ShiftInto {
            op,
            dst,
            src,
            other,
            count,
        });
    }

    pub fn alloc_label(&mut self) -> Label {
        let id = self.labels.len();
        self.labels.push(None);
        Label(u32::try_from(id).unwrap_or(u32::MAX))
    }

    /// Binds a label to the current position.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.insts.len());
    }

    /// Allocates and immediately binds a label.
    pub fn emit_label(&mut self) -> Label {
        let label = self.alloc_label();
        self.bind(label);
        label
    }

    pub fn jump(&mut self, cond: Cond) -> JumpId {
        let id = self.jump_targets.len();
        self.jump_targets.push(None);
        let jump = JumpId(u32::try_from(id).unwrap_or(u32::MAX));
        self.push(LirInst::Jump { cond, jump });
        jump
    }

    /// Flag-setting compare of `a` and `b` followed by a conditional jump.
    pub fn cmp(&mut self, cond: Cond, w32: bool, a: Arg, b: Arg) -> JumpId {
        self.op2u(BinaryOp::Sub, w32, a, b);
        self.jump(cond)
    }

    pub fn set_target(&mut self, jump: JumpId, label: Label) {
        self.jump_targets[jump.0 as usize] = Some(label);
    }

    pub fn icall(&mut self, helper: Helper, sig: CallSig) {
        self.push(LirInst::Call { helper, sig });
    }

    pub fn select(&mut self, cond: Cond, w32: bool, dst: Reg, src: Arg, other: Reg) {
        self.push(LirInst::Select {
            cond,
            w32,
            dst,
            src,
            other,
        });
    }

    pub fn op_flags(&mut self, cond: Cond, w32: bool, dst: Arg) {
        self.push(LirInst::OpFlags { cond, w32, dst });
    }

    pub fn atomic_load(&mut self, op: UnaryOp, w32: bool, data: Reg, mem: Reg) {
        self.push(LirInst::AtomicLoad { op, w32, data, mem });
    }

    pub fn atomic_store(&mut self, op: UnaryOp, w32: bool, data: Reg, mem: Reg, temp: Reg) {
        self.push(LirInst::AtomicStore {
            op,
            w32,
            data,
            mem,
            temp,
        });
    }

    pub fn mem_pair(&mut self, store: bool, r1: Reg, r2: Reg, addr: Arg) {
        self.push(LirInst::MemPair {
            store,
            r1,
            r2,
            addr,
        });
    }

    pub fn ret(&mut self) {
        self.push(LirInst::Ret);
    }

    /// Validates that every label is bound and every jump has a target.
    pub fn finish(self) -> Result<Program> {
        let labels = self
            .labels
            .iter()
            .map(|slot| slot.ok_or_else(|| Error::Internal("unbound label".to_string())))
            .collect::<Result<Vec<_>>>()?;
        let jump_targets = self
            .jump_targets
            .iter()
            .map(|slot| slot.ok_or_else(|| Error::Internal("jump without target".to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Program {
            insts: self.insts,
            labels,
            jump_targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_label_resolves() {
        let mut e = Emitter::new();
        let label = e.alloc_label();
        let jump = e.jump(Cond::Always);
        e.set_target(jump, label);
        e.op1(UnaryOp::Mov, false, Arg::Reg(Reg::R0), Arg::Imm(1));
        e.bind(label);
        e.ret();

        let program = e.finish().expect("program resolves");
        assert_eq!(program.jump_position(jump), 2);
    }

    #[test]
    fn unbound_label_is_rejected() {
        let mut e = Emitter::new();
        let label = e.alloc_label();
        let jump = e.jump(Cond::Always);
        e.set_target(jump, label);

        assert!(e.finish().is_err());
    }

    #[test]
    fn jump_without_target_is_rejected() {
        let mut e = Emitter::new();
        e.jump(Cond::Equal);

        assert!(e.finish().is_err());
    }
}
