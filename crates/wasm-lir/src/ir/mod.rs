//! Input data model: decoded WebAssembly instructions in arena form.

pub mod builder;
pub mod instruction;

pub use builder::{Function, FunctionBuilder};
pub use instruction::{AtomicKind, InstrId, Instruction, LabelRef, OpGroup, Opcode, Operand, Payload};
