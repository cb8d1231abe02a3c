//! Short-circuit continuations.
//!
//! A boolean condition lowered for branching does not produce a 0/1 value.
//! It produces a [`Jumps`]: the jump sites that must go somewhere when the
//! condition is true, those that must go somewhere when it is false, and one
//! reserved instruction right after the last evaluated operand (the *tail*).
//! Which way the tail branches is decided only when the consumer asks for a
//! polarity, so `if`, `&&`, `||` and `!` compose without re-evaluating
//! anything and without redundant jumps.

use smallvec::SmallVec;

use crate::compiler::BuildError;
use crate::compiler::program::{JumpPatch, ProgramBuffer};
use crate::vm::{Instruction, Label, Slot};

pub type PatchList = SmallVec<[JumpPatch; 4]>;

pub fn patch_all(
    buffer: &mut ProgramBuffer,
    patches: PatchList,
    target: Label,
) -> Result<(), BuildError> {
    for patch in patches {
        buffer.patch(patch, target)?;
    }
    Ok(())
}

#[derive(Debug)]
struct Tail {
    index: usize,
    cond: Slot,
    negated: bool,
}

#[derive(Debug)]
pub struct Jumps {
    when_true: PatchList,
    when_false: PatchList,
    tail: Tail,
    /// Position right after the tail. Sites whose polarity was not requested
    /// fall through to here.
    end: Label,
}

impl Jumps {
    /// Branches on the value already computed into int slot `cond`.
    pub fn on_slot(buffer: &mut ProgramBuffer, cond: Slot) -> Self {
        let index = buffer.empty_slot();
        Self {
            when_true: PatchList::new(),
            when_false: PatchList::new(),
            tail: Tail {
                index,
                cond,
                negated: false,
            },
            end: buffer.label(),
        }
    }

    pub fn negate(self) -> Self {
        Self {
            when_true: self.when_false,
            when_false: self.when_true,
            tail: Tail {
                negated: !self.tail.negated,
                ..self.tail
            },
            end: self.end,
        }
    }

    /// Adds sites that must be taken when the condition equals `polarity`.
    pub fn add_sites(&mut self, polarity: bool, sites: PatchList) {
        if polarity {
            self.when_true.extend(sites);
        } else {
            self.when_false.extend(sites);
        }
    }

    /// Fills the tail so control leaves when the condition equals `polarity`
    /// and falls through otherwise. Returns every site that still needs the
    /// leave target.
    pub fn defer(self, polarity: bool, buffer: &mut ProgramBuffer) -> Result<PatchList, BuildError> {
        let cond = self.tail.cond;
        let target = Label::PENDING;
        let jump = if polarity != self.tail.negated {
            Instruction::JumpIfTrue { cond, target }
        } else {
            Instruction::JumpIfFalse { cond, target }
        };
        let tail = buffer.put_jump_in_slot(self.tail.index, jump)?;

        let (mut taken, fallthrough) = if polarity {
            (self.when_true, self.when_false)
        } else {
            (self.when_false, self.when_true)
        };
        patch_all(buffer, fallthrough, self.end)?;
        taken.push(tail);
        Ok(taken)
    }

    /// Like [`defer`](Self::defer) with a known target.
    pub fn resolve(
        self,
        polarity: bool,
        target: Label,
        buffer: &mut ProgramBuffer,
    ) -> Result<(), BuildError> {
        let taken = self.defer(polarity, buffer)?;
        patch_all(buffer, taken, target)
    }

    #[cfg(test)]
    pub fn end(&self) -> Label {
        self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_on_slot() {
        let mut buffer = ProgramBuffer::new();
        let jumps = Jumps::on_slot(&mut buffer, Slot(2));
        jumps.resolve(false, Label(7), &mut buffer).unwrap();
        assert_eq!(
            buffer.instructions(),
            &[Instruction::JumpIfFalse {
                cond: Slot(2),
                target: Label(7)
            }]
        );
    }

    #[test]
    fn test_negated_tail_flips_jump() {
        let mut buffer = ProgramBuffer::new();
        let jumps = Jumps::on_slot(&mut buffer, Slot(0)).negate();
        jumps.resolve(true, Label(5), &mut buffer).unwrap();
        assert_eq!(
            buffer.instructions(),
            &[Instruction::JumpIfFalse {
                cond: Slot(0),
                target: Label(5)
            }]
        );
    }

    #[test]
    fn test_other_polarity_falls_through() {
        // a && b, branch to @9 when true
        let mut buffer = ProgramBuffer::new();
        let a = Jumps::on_slot(&mut buffer, Slot(0));
        let a_false = a.defer(false, &mut buffer).unwrap();
        let mut b = Jumps::on_slot(&mut buffer, Slot(1));
        b.add_sites(false, a_false);
        let end = b.end();
        b.resolve(true, Label(9), &mut buffer).unwrap();

        assert_eq!(
            buffer.finish().unwrap(),
            alloc::vec![
                Instruction::JumpIfFalse {
                    cond: Slot(0),
                    target: end
                },
                Instruction::JumpIfTrue {
                    cond: Slot(1),
                    target: Label(9)
                },
            ]
        );
    }
}
