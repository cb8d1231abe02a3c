//! Append-only instruction buffer with forward-jump patching.

use hashbrown::HashSet;

use crate::Vec;
use crate::compiler::BuildError;
use crate::format;
use crate::vm::{Instruction, Label};

/// A jump whose target is still [`Label::PENDING`]. Resolve it exactly once
/// with [`ProgramBuffer::patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpPatch {
    index: usize,
}

#[derive(Debug, Default)]
pub struct ProgramBuffer {
    instructions: Vec<Instruction>,
    /// Positions handed out by `empty_slot` and not filled yet.
    reserved: HashSet<usize>,
}

impl ProgramBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the next instruction.
    pub fn label(&self) -> Label {
        Label(self.instructions.len() as u32)
    }

    #[cfg(test)]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn add(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Appends a jump whose target is pending.
    pub fn add_jump(&mut self, jump: Instruction) -> Result<JumpPatch, BuildError> {
        check_pending(&jump, self.instructions.len())?;
        self.instructions.push(jump);
        Ok(JumpPatch {
            index: self.instructions.len() - 1,
        })
    }

    /// Reserves a position for an instruction chosen later.
    pub fn empty_slot(&mut self) -> usize {
        self.instructions.push(Instruction::Nop);
        self.reserved.insert(self.instructions.len() - 1);
        self.instructions.len() - 1
    }

    pub fn put_in_slot(&mut self, index: usize, instruction: Instruction) -> Result<(), BuildError> {
        if !self.reserved.remove(&index) {
            return Err(BuildError::internal(format!(
                "instruction @{} was not reserved",
                index
            )));
        }
        self.instructions[index] = instruction;
        Ok(())
    }

    /// Fills a reserved position with a jump whose target is pending.
    pub fn put_jump_in_slot(
        &mut self,
        index: usize,
        jump: Instruction,
    ) -> Result<JumpPatch, BuildError> {
        check_pending(&jump, index)?;
        self.put_in_slot(index, jump)?;
        Ok(JumpPatch { index })
    }

    pub fn patch(&mut self, patch: JumpPatch, target: Label) -> Result<(), BuildError> {
        let index = patch.index;
        let slot = self
            .instructions
            .get_mut(index)
            .and_then(Instruction::jump_target_mut)
            .ok_or_else(|| {
                BuildError::internal(format!("jump patch points at non-jump @{}", index))
            })?;
        if !slot.is_pending() {
            return Err(BuildError::internal(format!(
                "jump @{} patched twice",
                index
            )));
        }
        *slot = target;
        Ok(())
    }

    /// Checks that every jump is resolved and every reservation filled.
    pub fn finish(self) -> Result<Vec<Instruction>, BuildError> {
        if let Some(index) = self.reserved.iter().min() {
            return Err(BuildError::UnfilledSlot { index: *index });
        }
        if let Some(index) = self
            .instructions
            .iter()
            .position(|instr| instr.jump_target().is_some_and(Label::is_pending))
        {
            return Err(BuildError::DanglingJump { index });
        }
        Ok(self.instructions)
    }
}

fn check_pending(jump: &Instruction, index: usize) -> Result<(), BuildError> {
    match jump.jump_target() {
        Some(target) if target.is_pending() => Ok(()),
        _ => Err(BuildError::internal(format!(
            "expected a pending jump for @{}, got {:?}",
            index, jump
        ))),
    }
}
