//! Translator error types.
//!
//! Two error classes exist in Kiln:
//!
//! - [`KilnError`]: translator-internal invariant violations. These indicate
//!   malformed or unsupported input and abort the current translation call.
//! - [`Exception`](crate::Exception): language-level errors raised while a
//!   translated unit runs. Those live in [`crate::exception`].
//!
//! Every `KilnError` carries the function name and, where one exists, the
//! instruction offset that triggered it.

use thiserror::Error;

/// Result type for translation.
pub type KilnResult<T> = Result<T, KilnError>;

/// Fatal translation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KilnError {
    /// An opcode has no lowering rule.
    #[error("no lowering rule for {opcode} at offset {offset} in '{function}'")]
    UnsupportedOpcode {
        /// Function being translated.
        function: String,
        /// Instruction offset.
        offset: u32,
        /// Opcode mnemonic.
        opcode: String,
    },

    /// An instruction was applied to a stack/type state it cannot satisfy.
    #[error("stack shape mismatch at offset {offset} in '{function}': {message}")]
    StackShape {
        /// Function being translated.
        function: String,
        /// Instruction offset.
        offset: u32,
        /// Description of the mismatch.
        message: String,
    },

    /// Two live states with different stack depths reach the same instruction.
    #[error(
        "inconsistent stack depth at offset {offset} in '{function}': {left} vs {right} ({types})"
    )]
    InconsistentStackDepth {
        /// Function being translated.
        function: String,
        /// Offset of the merge point.
        offset: u32,
        /// Depth of the existing state.
        left: usize,
        /// Depth of the incoming state.
        right: usize,
        /// Rendered stack types of both sides.
        types: String,
    },

    /// An exception region whose handler precedes its protected range.
    #[error(
        "exception region [{start}, {end}) in '{function}' has handler {target} before its start"
    )]
    InvalidExceptionRegion {
        /// Function being translated.
        function: String,
        /// First protected offset.
        start: u32,
        /// End of the protected range (exclusive).
        end: u32,
        /// Handler offset.
        target: u32,
    },

    /// A declared type hint refers to an unbound type parameter.
    #[error("unresolved type parameter '{name}' in signature of '{function}'")]
    UnresolvedTypeParameter {
        /// Function whose signature was being built.
        function: String,
        /// Name of the type parameter.
        name: String,
    },

    /// A jump lands outside the instruction stream.
    #[error("invalid jump target {target} at offset {offset} in '{function}'")]
    InvalidJumpTarget {
        /// Function being translated.
        function: String,
        /// Offset of the jump.
        offset: u32,
        /// Computed target offset.
        target: i64,
    },

    /// An immediate argument indexes past the end of one of the function tables.
    #[error("{table} index {index} out of range at offset {offset} in '{function}'")]
    InvalidOperand {
        /// Function being translated.
        function: String,
        /// Instruction offset.
        offset: u32,
        /// Table name (`constants`, `names`, `varnames`, ...).
        table: &'static str,
        /// Offending index.
        index: u32,
    },

    /// The flow solver did not converge within the configured pass budget.
    #[error("flow analysis of '{function}' did not converge after {passes} passes")]
    FixedPointLimit {
        /// Function being translated.
        function: String,
        /// Passes performed.
        passes: usize,
    },

    /// An overload set cannot be turned into a dispatcher.
    #[error("invalid overload set '{name}': {message}")]
    InvalidOverloadSet {
        /// External name of the overload set.
        name: String,
        /// Description of the problem.
        message: String,
    },
}

impl KilnError {
    /// Create an unsupported opcode error.
    #[must_use]
    pub fn unsupported(function: impl Into<String>, offset: u32, opcode: impl Into<String>) -> Self {
        Self::UnsupportedOpcode {
            function: function.into(),
            offset,
            opcode: opcode.into(),
        }
    }

    /// Create a stack shape error.
    #[must_use]
    pub fn stack_shape(function: impl Into<String>, offset: u32, message: impl Into<String>) -> Self {
        Self::StackShape {
            function: function.into(),
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid operand error.
    #[must_use]
    pub fn operand(function: impl Into<String>, offset: u32, table: &'static str, index: u32) -> Self {
        Self::InvalidOperand {
            function: function.into(),
            offset,
            table,
            index,
        }
    }

    /// Create an invalid jump target error.
    #[must_use]
    pub fn jump_target(function: impl Into<String>, offset: u32, target: i64) -> Self {
        Self::InvalidJumpTarget {
            function: function.into(),
            offset,
            target,
        }
    }

    /// Create an invalid overload set error.
    #[must_use]
    pub fn overload(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOverloadSet {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Name of the function the error was reported against.
    #[must_use]
    pub fn function(&self) -> &str {
        match self {
            Self::UnsupportedOpcode { function, .. }
            | Self::StackShape { function, .. }
            | Self::InconsistentStackDepth { function, .. }
            | Self::InvalidExceptionRegion { function, .. }
            | Self::UnresolvedTypeParameter { function, .. }
            | Self::InvalidJumpTarget { function, .. }
            | Self::InvalidOperand { function, .. }
            | Self::FixedPointLimit { function, .. } => function,
            Self::InvalidOverloadSet { name, .. } => name,
        }
    }

    /// Instruction offset, for errors tied to a single instruction.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        match self {
            Self::UnsupportedOpcode { offset, .. }
            | Self::StackShape { offset, .. }
            | Self::InconsistentStackDepth { offset, .. }
            | Self::InvalidJumpTarget { offset, .. }
            | Self::InvalidOperand { offset, .. } => Some(*offset),
            Self::InvalidExceptionRegion { start, .. } => Some(*start),
            _ => None,
        }
    }
}
