//! Instruction pointer of the action-script interpreter.
//!
//! Three transitions move it: [`advance`](InstructionPointer::advance),
//! [`jump_to`](InstructionPointer::jump_to) and
//! [`abort`](InstructionPointer::abort). Running off the end of the script
//! and aborting both halt it.

use super::ScriptError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPointer {
    index: usize,
    len: usize,
    halted: bool,
}

impl InstructionPointer {
    pub fn new(len: usize) -> Self {
        Self {
            index: 0,
            len,
            halted: false,
        }
    }

    /// The index to execute next, or `None` once halted.
    pub fn current(&self) -> Option<usize> {
        (!self.halted && self.index < self.len).then_some(self.index)
    }

    pub fn advance(&mut self) {
        if self.current().is_some() {
            self.index += 1;
        }
    }

    /// Move to `target`. Targets outside the script are rejected and leave
    /// the pointer where it was.
    pub fn jump_to(&mut self, target: usize) -> Result<(), ScriptError> {
        if target >= self.len {
            return Err(ScriptError::InvalidJump {
                target,
                len: self.len,
            });
        }
        self.index = target;
        Ok(())
    }

    pub fn abort(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.current().is_none()
    }
}
