//! Opcode definitions for the 3.10/3.11 stack-machine dialect.
//!
//! Opcodes are grouped by the lowering category that handles them:
//!
//! | Category   | Examples                                   |
//! |------------|--------------------------------------------|
//! | Meta       | `RESUME`, `NOP`, `PRECALL`, `CACHE`        |
//! | Stack      | `POP_TOP`, `ROT_TWO`, `COPY`, `SWAP`       |
//! | Variable   | `LOAD_FAST`, `STORE_DEREF`, `LOAD_CONST`   |
//! | Object     | `LOAD_ATTR`, `LOAD_METHOD`                 |
//! | Operator   | `BINARY_OP`, `COMPARE_OP`, `GET_ITER`      |
//! | Control    | `JUMP_FORWARD`, `FOR_ITER`, `RETURN_VALUE` |
//! | Call       | `CALL`, `KW_NAMES`, `MAKE_FUNCTION`        |
//! | Collection | `BUILD_LIST`, `UNPACK_SEQUENCE`            |
//! | Exception  | `RAISE_VARARGS`, `PUSH_EXC_INFO`           |
//! | Generator  | `YIELD_VALUE`, `SEND`, `YIELD_FROM`        |
//!
//! Two deviations from the reference interpreter keep the stack simpler:
//! `LOAD_GLOBAL` never pushes a NULL, and `LOAD_METHOD` replaces the receiver
//! with an already bound callable.

use kiln_core::protocol::{BinaryOp, CompareOp};
use std::fmt;

/// Lowering category of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpcodeCategory {
    /// No runtime effect.
    Meta,
    /// Pure operand-stack shuffles.
    Stack,
    /// Local, cell, global and constant access.
    Variable,
    /// Attribute access and method lookup.
    Object,
    /// Protocol operators.
    Operator,
    /// Jumps, iteration and returns.
    Control,
    /// Calls and function creation.
    Call,
    /// Collection building and unpacking.
    Collection,
    /// Raising and handler bookkeeping.
    Exception,
    /// Suspension points.
    Generator,
}

/// How a jump argument encodes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Not a jump.
    None,
    /// Target is the argument itself.
    Absolute,
    /// Target is `offset + 1 + arg`.
    Forward,
    /// Target is `offset + 1 - arg`.
    Backward,
}

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $variant:ident => $name:literal, $category:ident; )*) => {
        /// A stack-machine opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $(#[$doc])* $variant, )*
        }

        impl Opcode {
            /// Every opcode, in declaration order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant),*];

            /// Mnemonic, as printed in listings.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $name, )*
                }
            }

            /// Lowering category.
            #[must_use]
            pub const fn category(self) -> OpcodeCategory {
                match self {
                    $( Opcode::$variant => OpcodeCategory::$category, )*
                }
            }

            /// Parse a mnemonic.
            #[must_use]
            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $( $name => Some(Opcode::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    // =========================================================================
    // Meta
    // =========================================================================
    /// Function entry marker.
    Resume => "RESUME", Meta;
    /// No operation.
    Nop => "NOP", Meta;
    /// Call preparation marker.
    Precall => "PRECALL", Meta;
    /// Inline cache slot.
    Cache => "CACHE", Meta;

    // =========================================================================
    // Stack
    // =========================================================================
    /// Discard TOS.
    PopTop => "POP_TOP", Stack;
    /// Swap the two top items.
    RotTwo => "ROT_TWO", Stack;
    /// Lift the second and third items one position up, TOS down to third.
    RotThree => "ROT_THREE", Stack;
    /// Same as `ROT_THREE` over four items.
    RotFour => "ROT_FOUR", Stack;
    /// Same as `ROT_THREE` over `arg` items.
    RotN => "ROT_N", Stack;
    /// Duplicate TOS.
    DupTop => "DUP_TOP", Stack;
    /// Duplicate the two top items, keeping their order.
    DupTopTwo => "DUP_TOP_TWO", Stack;
    /// Push a copy of the `arg`-th item (1 is TOS).
    Copy => "COPY", Stack;
    /// Swap TOS with the `arg`-th item.
    Swap => "SWAP", Stack;

    // =========================================================================
    // Variables
    // =========================================================================
    /// Push `varnames[arg]`.
    LoadFast => "LOAD_FAST", Variable;
    /// Pop into `varnames[arg]`.
    StoreFast => "STORE_FAST", Variable;
    /// Unbind `varnames[arg]`.
    DeleteFast => "DELETE_FAST", Variable;
    /// Push global `names[arg]`, falling back to builtins.
    LoadGlobal => "LOAD_GLOBAL", Variable;
    /// Pop into global `names[arg]`.
    StoreGlobal => "STORE_GLOBAL", Variable;
    /// Delete global `names[arg]`.
    DeleteGlobal => "DELETE_GLOBAL", Variable;
    /// Push the content of cell `arg` (cells then free variables).
    LoadDeref => "LOAD_DEREF", Variable;
    /// Pop into cell `arg`.
    StoreDeref => "STORE_DEREF", Variable;
    /// Clear cell `arg`.
    DeleteDeref => "DELETE_DEREF", Variable;
    /// Push the cell object `arg` itself.
    LoadClosure => "LOAD_CLOSURE", Variable;
    /// Create cell `arg`, seeded from the parameter of the same name.
    MakeCell => "MAKE_CELL", Variable;
    /// Copy `arg` closure cells into the free slots.
    CopyFreeVars => "COPY_FREE_VARS", Variable;
    /// Push `constants[arg]`.
    LoadConst => "LOAD_CONST", Variable;

    // =========================================================================
    // Objects
    // =========================================================================
    /// Replace TOS with `TOS.names[arg]`.
    LoadAttr => "LOAD_ATTR", Object;
    /// `TOS.names[arg] = TOS1`, popping both.
    StoreAttr => "STORE_ATTR", Object;
    /// `del TOS.names[arg]`.
    DeleteAttr => "DELETE_ATTR", Object;
    /// Replace TOS with the bound method `TOS.names[arg]`.
    LoadMethod => "LOAD_METHOD", Object;

    // =========================================================================
    // Operators
    // =========================================================================
    /// `+TOS`.
    UnaryPositive => "UNARY_POSITIVE", Operator;
    /// `-TOS`.
    UnaryNegative => "UNARY_NEGATIVE", Operator;
    /// `not TOS`.
    UnaryNot => "UNARY_NOT", Operator;
    /// `~TOS`.
    UnaryInvert => "UNARY_INVERT", Operator;
    /// `TOS1 <op> TOS`, `arg` is an NB code (in-place forms add 13).
    BinaryOp => "BINARY_OP", Operator;
    /// Rich comparison, `arg` indexes `< <= == != > >=`.
    CompareOp => "COMPARE_OP", Operator;
    /// `TOS1 is TOS`, negated when `arg` is 1.
    IsOp => "IS_OP", Operator;
    /// `TOS1 in TOS`, negated when `arg` is 1.
    ContainsOp => "CONTAINS_OP", Operator;
    /// `TOS1[TOS]`.
    BinarySubscr => "BINARY_SUBSCR", Operator;
    /// `TOS1[TOS] = TOS2`.
    StoreSubscr => "STORE_SUBSCR", Operator;
    /// `del TOS1[TOS]`.
    DeleteSubscr => "DELETE_SUBSCR", Operator;
    /// Replace TOS with `iter(TOS)`.
    GetIter => "GET_ITER", Operator;

    // =========================================================================
    // Control
    // =========================================================================
    /// Relative forward jump.
    JumpForward => "JUMP_FORWARD", Control;
    /// Relative backward jump.
    JumpBackward => "JUMP_BACKWARD", Control;
    /// Absolute jump.
    JumpAbsolute => "JUMP_ABSOLUTE", Control;
    /// Pop TOS, jump (absolute) if truthy.
    PopJumpIfTrue => "POP_JUMP_IF_TRUE", Control;
    /// Pop TOS, jump (absolute) if falsy.
    PopJumpIfFalse => "POP_JUMP_IF_FALSE", Control;
    /// Pop TOS, jump forward if truthy.
    PopJumpForwardIfTrue => "POP_JUMP_FORWARD_IF_TRUE", Control;
    /// Pop TOS, jump forward if falsy.
    PopJumpForwardIfFalse => "POP_JUMP_FORWARD_IF_FALSE", Control;
    /// Pop TOS, jump backward if truthy.
    PopJumpBackwardIfTrue => "POP_JUMP_BACKWARD_IF_TRUE", Control;
    /// Pop TOS, jump backward if falsy.
    PopJumpBackwardIfFalse => "POP_JUMP_BACKWARD_IF_FALSE", Control;
    /// Pop TOS, jump forward if it is None.
    PopJumpForwardIfNone => "POP_JUMP_FORWARD_IF_NONE", Control;
    /// Pop TOS, jump forward if it is not None.
    PopJumpForwardIfNotNone => "POP_JUMP_FORWARD_IF_NOT_NONE", Control;
    /// Jump (absolute) keeping TOS if truthy, otherwise pop.
    JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP", Control;
    /// Jump (absolute) keeping TOS if falsy, otherwise pop.
    JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP", Control;
    /// Push the next item of the iterator at TOS, or pop it and jump forward.
    ForIter => "FOR_ITER", Control;
    /// Return TOS.
    ReturnValue => "RETURN_VALUE", Control;
    /// Return `constants[arg]`.
    ReturnConst => "RETURN_CONST", Control;

    // =========================================================================
    // Calls
    // =========================================================================
    /// Set the keyword names (`constants[arg]`) for the next `CALL`.
    KwNames => "KW_NAMES", Call;
    /// Call with `arg` arguments, the last ones named by a pending `KW_NAMES`.
    Call => "CALL", Call;
    /// Call with `arg` positional arguments.
    CallFunction => "CALL_FUNCTION", Call;
    /// Call with `arg` arguments and a names tuple at TOS.
    CallFunctionKw => "CALL_FUNCTION_KW", Call;
    /// Call with an argument iterable and, when `arg & 1`, a mapping.
    CallFunctionEx => "CALL_FUNCTION_EX", Call;
    /// Call a method loaded by `LOAD_METHOD` with `arg` arguments.
    CallMethod => "CALL_METHOD", Call;
    /// Instantiate the code object at TOS with the parts flagged in `arg`.
    MakeFunction => "MAKE_FUNCTION", Call;

    // =========================================================================
    // Collections
    // =========================================================================
    /// Tuple of the `arg` top items.
    BuildTuple => "BUILD_TUPLE", Collection;
    /// List of the `arg` top items.
    BuildList => "BUILD_LIST", Collection;
    /// Set of the `arg` top items.
    BuildSet => "BUILD_SET", Collection;
    /// Dict of `arg` key/value pairs.
    BuildMap => "BUILD_MAP", Collection;
    /// Dict of `arg` values keyed by the tuple at TOS.
    BuildConstKeyMap => "BUILD_CONST_KEY_MAP", Collection;
    /// Concatenate `arg` strings.
    BuildString => "BUILD_STRING", Collection;
    /// Slice of 2 or 3 items.
    BuildSlice => "BUILD_SLICE", Collection;
    /// Append TOS to the list `arg` items down.
    ListAppend => "LIST_APPEND", Collection;
    /// Add TOS to the set `arg` items down.
    SetAdd => "SET_ADD", Collection;
    /// Insert `TOS1: TOS` into the dict `arg` items down.
    MapAdd => "MAP_ADD", Collection;
    /// Extend the list `arg` items down with TOS.
    ListExtend => "LIST_EXTEND", Collection;
    /// Update the set `arg` items down with TOS.
    SetUpdate => "SET_UPDATE", Collection;
    /// Update the dict `arg` items down with TOS.
    DictUpdate => "DICT_UPDATE", Collection;
    /// Like `DICT_UPDATE` but rejects duplicate keys.
    DictMerge => "DICT_MERGE", Collection;
    /// Replace the list at TOS with a tuple.
    ListToTuple => "LIST_TO_TUPLE", Collection;
    /// Unpack TOS into `arg` items, first item on top.
    UnpackSequence => "UNPACK_SEQUENCE", Collection;
    /// Starred unpack: low byte before the star, high byte after.
    UnpackEx => "UNPACK_EX", Collection;
    /// Format TOS (`arg & 3` selects a conversion, `arg & 4` a spec at TOS).
    FormatValue => "FORMAT_VALUE", Collection;

    // =========================================================================
    // Exceptions
    // =========================================================================
    /// Raise with `arg` operands (0 reraises, 2 adds a cause).
    RaiseVarargs => "RAISE_VARARGS", Exception;
    /// Re-raise TOS.
    Reraise => "RERAISE", Exception;
    /// Save the current exception under TOS and make TOS current.
    PushExcInfo => "PUSH_EXC_INFO", Exception;
    /// Restore the exception saved by `PUSH_EXC_INFO`.
    PopExcept => "POP_EXCEPT", Exception;
    /// Replace TOS (a type) with `isinstance(TOS1, TOS)`.
    CheckExcMatch => "CHECK_EXC_MATCH", Exception;
    /// Push `AssertionError`.
    LoadAssertionError => "LOAD_ASSERTION_ERROR", Exception;

    // =========================================================================
    // Generators
    // =========================================================================
    /// Marks a generator body; pushes None.
    ReturnGenerator => "RETURN_GENERATOR", Generator;
    /// Generator start marker.
    GenStart => "GEN_START", Generator;
    /// Suspend yielding TOS; resume with the sent value on TOS.
    YieldValue => "YIELD_VALUE", Generator;
    /// Delegate to the iterator at TOS1, sending TOS.
    YieldFrom => "YIELD_FROM", Generator;
    /// Send TOS into the receiver at TOS1, jumping forward when it returns.
    Send => "SEND", Generator;
    /// Replace TOS with an iterator suitable for delegation.
    GetYieldFromIter => "GET_YIELD_FROM_ITER", Generator;
}

impl Opcode {
    /// How the argument encodes a jump target.
    #[must_use]
    pub const fn jump_kind(self) -> JumpKind {
        match self {
            Opcode::JumpAbsolute
            | Opcode::PopJumpIfTrue
            | Opcode::PopJumpIfFalse
            | Opcode::JumpIfTrueOrPop
            | Opcode::JumpIfFalseOrPop => JumpKind::Absolute,
            Opcode::JumpForward
            | Opcode::PopJumpForwardIfTrue
            | Opcode::PopJumpForwardIfFalse
            | Opcode::PopJumpForwardIfNone
            | Opcode::PopJumpForwardIfNotNone
            | Opcode::ForIter
            | Opcode::Send => JumpKind::Forward,
            Opcode::JumpBackward
            | Opcode::PopJumpBackwardIfTrue
            | Opcode::PopJumpBackwardIfFalse => JumpKind::Backward,
            _ => JumpKind::None,
        }
    }

    /// Whether the opcode carries a jump target.
    #[must_use]
    pub const fn is_jump(self) -> bool {
        !matches!(self.jump_kind(), JumpKind::None)
    }

    /// Always transfers control to its target.
    #[must_use]
    pub const fn is_unconditional_jump(self) -> bool {
        matches!(
            self,
            Opcode::JumpForward | Opcode::JumpBackward | Opcode::JumpAbsolute
        )
    }

    /// Leaves the function (or raises) without a successor in the body.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Opcode::ReturnValue | Opcode::ReturnConst | Opcode::RaiseVarargs | Opcode::Reraise
        )
    }

    /// Whether control can continue with the next instruction.
    #[must_use]
    pub const fn falls_through(self) -> bool {
        !self.is_unconditional_jump() && !self.is_terminal()
    }

    /// Suspends a generator.
    #[must_use]
    pub const fn is_suspension(self) -> bool {
        matches!(self, Opcode::YieldValue | Opcode::YieldFrom | Opcode::Send)
    }

    /// Net operand-stack effect.
    ///
    /// `jumping` selects the effect on the branch edge for opcodes whose
    /// effect differs between fall-through and jump.
    #[must_use]
    pub fn stack_effect(self, arg: u32, jumping: bool) -> i32 {
        let n = i32::try_from(arg).unwrap_or(i32::MAX);
        match self {
            Opcode::Resume
            | Opcode::Nop
            | Opcode::Precall
            | Opcode::Cache
            | Opcode::RotTwo
            | Opcode::RotThree
            | Opcode::RotFour
            | Opcode::RotN
            | Opcode::Swap
            | Opcode::DeleteFast
            | Opcode::DeleteGlobal
            | Opcode::DeleteDeref
            | Opcode::MakeCell
            | Opcode::CopyFreeVars
            | Opcode::LoadAttr
            | Opcode::LoadMethod
            | Opcode::UnaryPositive
            | Opcode::UnaryNegative
            | Opcode::UnaryNot
            | Opcode::UnaryInvert
            | Opcode::GetIter
            | Opcode::JumpForward
            | Opcode::JumpBackward
            | Opcode::JumpAbsolute
            | Opcode::ReturnConst
            | Opcode::KwNames
            | Opcode::ListToTuple
            | Opcode::CheckExcMatch
            | Opcode::GenStart
            | Opcode::YieldValue
            | Opcode::GetYieldFromIter => 0,

            Opcode::DupTop
            | Opcode::Copy
            | Opcode::LoadFast
            | Opcode::LoadGlobal
            | Opcode::LoadDeref
            | Opcode::LoadClosure
            | Opcode::LoadConst
            | Opcode::PushExcInfo
            | Opcode::LoadAssertionError
            | Opcode::ReturnGenerator => 1,
            Opcode::DupTopTwo => 2,

            Opcode::PopTop
            | Opcode::StoreFast
            | Opcode::StoreGlobal
            | Opcode::StoreDeref
            | Opcode::DeleteAttr
            | Opcode::BinaryOp
            | Opcode::CompareOp
            | Opcode::IsOp
            | Opcode::ContainsOp
            | Opcode::BinarySubscr
            | Opcode::PopJumpIfTrue
            | Opcode::PopJumpIfFalse
            | Opcode::PopJumpForwardIfTrue
            | Opcode::PopJumpForwardIfFalse
            | Opcode::PopJumpBackwardIfTrue
            | Opcode::PopJumpBackwardIfFalse
            | Opcode::PopJumpForwardIfNone
            | Opcode::PopJumpForwardIfNotNone
            | Opcode::ReturnValue
            | Opcode::ListAppend
            | Opcode::SetAdd
            | Opcode::ListExtend
            | Opcode::SetUpdate
            | Opcode::DictUpdate
            | Opcode::DictMerge
            | Opcode::Reraise
            | Opcode::PopExcept
            | Opcode::YieldFrom => -1,
            Opcode::StoreAttr | Opcode::DeleteSubscr | Opcode::MapAdd => -2,
            Opcode::StoreSubscr => -3,

            Opcode::JumpIfTrueOrPop | Opcode::JumpIfFalseOrPop => {
                if jumping {
                    0
                } else {
                    -1
                }
            }
            Opcode::ForIter => {
                if jumping {
                    -1
                } else {
                    1
                }
            }
            Opcode::Send => {
                if jumping {
                    -1
                } else {
                    0
                }
            }

            Opcode::Call | Opcode::CallFunction | Opcode::CallMethod => -n,
            Opcode::CallFunctionKw => -n - 1,
            Opcode::CallFunctionEx => -1 - (n & 1),
            Opcode::MakeFunction => -i32::try_from((arg & 0x0F).count_ones()).unwrap_or(0),
            Opcode::BuildTuple
            | Opcode::BuildList
            | Opcode::BuildSet
            | Opcode::BuildString
            | Opcode::BuildSlice => 1 - n,
            Opcode::BuildMap => 1 - 2 * n,
            Opcode::BuildConstKeyMap => -n,
            Opcode::UnpackSequence => n - 1,
            Opcode::UnpackEx => i32::try_from((arg & 0xFF) + (arg >> 8)).unwrap_or(0),
            Opcode::FormatValue => {
                if arg & 0x04 != 0 {
                    -1
                } else {
                    0
                }
            }
            Opcode::RaiseVarargs => -n,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Immediate decoding
// =============================================================================

/// In-place `BINARY_OP` codes are offset by this much.
pub const NB_INPLACE_OFFSET: u32 = 13;

/// NB codes in argument order.
const NB_OPS: [BinaryOp; 13] = [
    BinaryOp::Add,
    BinaryOp::And,
    BinaryOp::FloorDivide,
    BinaryOp::LShift,
    BinaryOp::MatrixMultiply,
    BinaryOp::Multiply,
    BinaryOp::Modulo,
    BinaryOp::Or,
    BinaryOp::Power,
    BinaryOp::RShift,
    BinaryOp::Subtract,
    BinaryOp::TrueDivide,
    BinaryOp::Xor,
];

/// Decode a `BINARY_OP` argument into the operator and its in-place flag.
#[must_use]
pub fn decode_binary_op(arg: u32) -> Option<(BinaryOp, bool)> {
    let inplace = arg >= NB_INPLACE_OFFSET;
    let index = if inplace { arg - NB_INPLACE_OFFSET } else { arg };
    NB_OPS
        .get(usize::try_from(index).ok()?)
        .map(|op| (*op, inplace))
}

/// Encode an operator as a `BINARY_OP` argument.
#[must_use]
pub fn encode_binary_op(op: BinaryOp, inplace: bool) -> u32 {
    let index = NB_OPS.iter().position(|o| *o == op).unwrap_or(0);
    let base = u32::try_from(index).unwrap_or(0);
    if inplace {
        base + NB_INPLACE_OFFSET
    } else {
        base
    }
}

/// Decode a `COMPARE_OP` argument.
#[must_use]
pub fn decode_compare_op(arg: u32) -> Option<CompareOp> {
    CompareOp::from_arg(arg)
}

/// Encode a comparison as a `COMPARE_OP` argument.
#[must_use]
pub const fn encode_compare_op(op: CompareOp) -> u32 {
    match op {
        CompareOp::Lt => 0,
        CompareOp::Le => 1,
        CompareOp::Eq => 2,
        CompareOp::Ne => 3,
        CompareOp::Gt => 4,
        CompareOp::Ge => 5,
    }
}

/// Flags carried by the `MAKE_FUNCTION` argument.
pub mod make_function {
    /// A tuple of positional defaults is on the stack.
    pub const DEFAULTS: u32 = 0x01;
    /// A dict of keyword-only defaults is on the stack.
    pub const KW_DEFAULTS: u32 = 0x02;
    /// An annotations mapping is on the stack.
    pub const ANNOTATIONS: u32 = 0x04;
    /// A tuple of closure cells is on the stack.
    pub const CLOSURE: u32 = 0x08;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_name(op.name()), Some(*op));
        }
        assert_eq!(Opcode::from_name("SETUP_ANNOTATIONS"), None);
    }

    #[test]
    fn test_jump_kinds() {
        assert_eq!(Opcode::JumpAbsolute.jump_kind(), JumpKind::Absolute);
        assert_eq!(Opcode::ForIter.jump_kind(), JumpKind::Forward);
        assert_eq!(Opcode::PopJumpBackwardIfFalse.jump_kind(), JumpKind::Backward);
        assert!(!Opcode::ReturnValue.is_jump());
    }

    #[test]
    fn test_fall_through() {
        assert!(!Opcode::JumpForward.falls_through());
        assert!(!Opcode::Reraise.falls_through());
        assert!(Opcode::PopJumpIfFalse.falls_through());
        assert!(Opcode::ForIter.falls_through());
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(Opcode::BuildMap.stack_effect(2, false), -3);
        assert_eq!(Opcode::UnpackEx.stack_effect(0x0102, false), 3);
        assert_eq!(Opcode::ForIter.stack_effect(0, false), 1);
        assert_eq!(Opcode::ForIter.stack_effect(0, true), -1);
        assert_eq!(Opcode::MakeFunction.stack_effect(0x09, false), -2);
        assert_eq!(Opcode::CallFunctionKw.stack_effect(3, false), -4);
        assert_eq!(Opcode::JumpIfFalseOrPop.stack_effect(0, true), 0);
    }

    #[test]
    fn test_binary_op_codes() {
        assert_eq!(decode_binary_op(0), Some((BinaryOp::Add, false)));
        assert_eq!(decode_binary_op(23), Some((BinaryOp::Subtract, true)));
        assert_eq!(decode_binary_op(26), None);
        for op in NB_OPS {
            assert_eq!(decode_binary_op(encode_binary_op(op, true)), Some((op, true)));
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(Opcode::Send.category(), OpcodeCategory::Generator);
        assert_eq!(Opcode::LoadMethod.category(), OpcodeCategory::Object);
        assert_eq!(Opcode::KwNames.category(), OpcodeCategory::Call);
    }
}
