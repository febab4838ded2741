//! Decoded instructions.

use crate::opcode::{JumpKind, Opcode};
use std::fmt;

/// One decoded instruction.
///
/// Offsets are word offsets: consecutive instructions differ by one, and jump
/// arguments are expressed in the same unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Operation.
    pub opcode: Opcode,
    /// Word offset of this instruction.
    pub offset: u32,
    /// Immediate argument (0 when unused).
    pub arg: u32,
    /// Some jump or handler lands here.
    pub is_jump_target: bool,
    /// Source line, if known.
    pub line: Option<u32>,
}

impl Instruction {
    /// Create an instruction with no line information.
    #[inline]
    #[must_use]
    pub const fn new(opcode: Opcode, offset: u32, arg: u32) -> Self {
        Self {
            opcode,
            offset,
            arg,
            is_jump_target: false,
            line: None,
        }
    }

    /// Attach a source line.
    #[inline]
    #[must_use]
    pub const fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Mark as a jump target.
    #[inline]
    #[must_use]
    pub const fn marked_as_jump_target(mut self) -> Self {
        self.is_jump_target = true;
        self
    }

    /// Target offset of a jump, before validation. `None` for non-jumps.
    #[must_use]
    pub fn jump_target(&self) -> Option<i64> {
        let offset = i64::from(self.offset);
        let arg = i64::from(self.arg);
        match self.opcode.jump_kind() {
            JumpKind::None => None,
            JumpKind::Absolute => Some(arg),
            JumpKind::Forward => Some(offset + 1 + arg),
            JumpKind::Backward => Some(offset + 1 - arg),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>4} {:<28} {}", self.offset, self.opcode.name(), self.arg)
    }
}
