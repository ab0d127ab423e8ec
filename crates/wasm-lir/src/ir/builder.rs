//! Arena-backed function container and a builder for fabricating
//! instruction streams.
//!
//! The decoder that would normally produce these streams is an external
//! collaborator; the builder exists for the compiler's own tests and for
//! embedders that drive the code generator directly.

use super::instruction::{InstrId, Instruction, LabelRef, Opcode, Operand, Payload};

/// A linear sequence of decoded instructions plus its branch-target
/// labels. Labels record the instruction position they precede; a label
/// may sit past the last instruction.
#[derive(Debug, Default)]
pub struct Function {
    instrs: Vec<Instruction>,
    label_positions: Vec<usize>,
}

impl Function {
    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    #[must_use]
    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.0 as usize]
    }

    /// The instruction following `id` in the stream, if any.
    #[must_use]
    pub fn next(&self, id: InstrId) -> Option<&Instruction> {
        self.instrs.get(id.0 as usize + 1)
    }

    #[must_use]
    pub fn label_positions(&self) -> &[usize] {
        &self.label_positions
    }

    /// True when some label is bound to `position`; fusing across such a
    /// boundary would lose the jump target.
    #[must_use]
    pub fn has_label_at(&self, position: usize) -> bool {
        self.label_positions.contains(&position)
    }
}

#[derive(Debug, Default)]
pub struct FunctionBuilder {
    function: Function,
    pending_labels: Vec<LabelRef>,
}

impl FunctionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction and returns its id.
    pub fn push(&mut self, opcode: Opcode, operands: &[Operand], payload: Payload) -> InstrId {
        let id = InstrId(u32::try_from(self.function.instrs.len()).unwrap_or(u32::MAX));
        self.function.instrs.push(Instruction {
            opcode,
            operands: operands.to_vec(),
            payload,
        });
        id
    }

    /// A `Const32` consumed only through immediate operands.
    pub fn const32(&mut self, value: u32) -> InstrId {
        self.push(Opcode::Const32, &[], Payload::Const32(value))
    }

    /// A `Const32` materialized into a frame slot.
    pub fn const32_in(&mut self, value: u32, slot: u32) -> InstrId {
        self.push(Opcode::Const32, &[Operand::Slot(slot)], Payload::Const32(value))
    }

    pub fn const64(&mut self, value: u64) -> InstrId {
        self.push(Opcode::Const64, &[], Payload::Const64(value))
    }

    pub fn const64_in(&mut self, value: u64, slot: u32) -> InstrId {
        self.push(Opcode::Const64, &[Operand::Slot(slot)], Payload::Const64(value))
    }

    /// Allocates a branch-target label; bind it with [`Self::place_label`].
    pub fn label(&mut self) -> LabelRef {
        let id = LabelRef(u32::try_from(self.function.label_positions.len()).unwrap_or(u32::MAX));
        self.function.label_positions.push(usize::MAX);
        self.pending_labels.push(id);
        id
    }

    /// Binds `label` to the position of the next pushed instruction.
    pub fn place_label(&mut self, label: LabelRef) {
        self.function.label_positions[label.0 as usize] = self.function.instrs.len();
        self.pending_labels.retain(|pending| pending != &label);
    }

    pub fn jump(&mut self, target: LabelRef) -> InstrId {
        self.push(Opcode::Jump, &[], Payload::Branch { target })
    }

    pub fn jump_if_true(&mut self, condition: Operand, target: LabelRef) -> InstrId {
        self.push(Opcode::JumpIfTrue, &[condition], Payload::Branch { target })
    }

    pub fn jump_if_false(&mut self, condition: Operand, target: LabelRef) -> InstrId {
        self.push(Opcode::JumpIfFalse, &[condition], Payload::Branch { target })
    }

    /// Finishes the function.
    ///
    /// # Panics
    ///
    /// Panics when a label was allocated but never placed.
    #[must_use]
    pub fn finish(self) -> Function {
        assert!(
            self.pending_labels.is_empty(),
            "labels allocated but never placed: {:?}",
            self.pending_labels
        );
        self.function
    }
}
