//! Human-readable listing of LIR programs, used by tests and tracing.

use std::fmt;

use super::emitter::Program;
use super::instruction::{Arg, LirInst};

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Imm(v) => write!(f, "#{v}"),
            Arg::Reg(r) => write!(f, "{r:?}"),
            Arg::Mem(base, disp) => write!(f, "[{base:?}{disp:+}]"),
            Arg::Freg(r) => write!(f, "{r:?}"),
        }
    }
}

impl fmt::Display for LirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LirInst::Op0 { op, w32 } => write!(f, "{op:?}{}", w32_suffix(*w32)),
            LirInst::Op1 { op, w32, dst, src } => {
                write!(f, "{op:?}{} {dst}, {src}", w32_suffix(*w32))
            }
            LirInst::Op2 {
                op,
                w32,
                set_flags,
                set_carry,
                dst,
                a,
                b,
            } => {
                write!(f, "{op:?}{}", w32_suffix(*w32))?;
                if *set_flags {
                    write!(f, ".flags")?;
                }
                if *set_carry && !*set_flags {
                    write!(f, ".carry")?;
                }
                match dst {
                    Some(dst) => write!(f, " {dst}, {a}, {b}"),
                    None => write!(f, " {a}, {b}"),
                }
            }
            LirInst::ShiftInto {
                op,
                dst,
                src,
                other,
                count,
            } => write!(f, "ShiftInto.{op:?} {dst:?}, {src:?}, {other:?}, {count}"),
            LirInst::Jump { cond, jump } => write!(f, "Jump.{cond:?} ->j{}", jump.0),
            LirInst::Call { helper, sig } => {
                write!(f, "Call {helper:?} args={}", sig.args)?;
                if sig.returns_value {
                    write!(f, " ret")?;
                }
                Ok(())
            }
            LirInst::Select {
                cond,
                w32,
                dst,
                src,
                other,
            } => write!(
                f,
                "Select.{cond:?}{} {dst:?}, {src}, {other:?}",
                w32_suffix(*w32)
            ),
            LirInst::OpFlags { cond, w32, dst } => {
                write!(f, "Flags.{cond:?}{} {dst}", w32_suffix(*w32))
            }
            LirInst::AtomicLoad { op, w32, data, mem } => {
                write!(f, "AtomicLoad.{op:?}{} {data:?}, [{mem:?}]", w32_suffix(*w32))
            }
            LirInst::AtomicStore {
                op,
                w32,
                data,
                mem,
                temp,
            } => write!(
                f,
                "AtomicStore.{op:?}{} [{mem:?}], {data:?}, temp={temp:?}",
                w32_suffix(*w32)
            ),
            LirInst::MemPair {
                store,
                r1,
                r2,
                addr,
            } => {
                let dir = if *store { "Store" } else { "Load" };
                write!(f, "Pair{dir} {{{r1:?},{r2:?}}}, {addr}")
            }
            LirInst::Ret => write!(f, "Ret"),
        }
    }
}

fn w32_suffix(w32: bool) -> &'static str {
    if w32 { "32" } else { "" }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pos, inst) in self.insts.iter().enumerate() {
            for (id, target) in self.labels.iter().enumerate() {
                if *target == pos {
                    writeln!(f, "L{id}:")?;
                }
            }
            writeln!(f, "  {pos:4}: {inst}")?;
        }
        Ok(())
    }
}
