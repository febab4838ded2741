//! Abstract effect of one instruction on a [`LiveState`].
//!
//! The effect yields one successor state per normal control edge:
//! fall-through and branch. Handler edges are added by the graph builder.

use super::state::LiveState;
use super::value_source::ValueSource;
use kiln_bytecode::opcode::{decode_binary_op, make_function};
use kiln_bytecode::{CompiledFunction, Instruction, Opcode};
use kiln_core::protocol::BinaryOp;
use kiln_core::types::builtin_types;
use kiln_core::{KilnError, KilnResult, TypeRef, Value};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;

/// Successor states of one instruction, keyed by target instruction index.
pub type Successors = SmallVec<[(usize, LiveState); 2]>;

/// Operand access for one instruction, reporting errors against it.
pub(crate) struct Operands<'a> {
    pub code: &'a CompiledFunction,
    pub instruction: Instruction,
}

impl<'a> Operands<'a> {
    pub fn new(code: &'a CompiledFunction, instruction: Instruction) -> Self {
        Self { code, instruction }
    }

    fn arg(&self) -> usize {
        usize::try_from(self.instruction.arg).unwrap_or(usize::MAX)
    }

    fn operand_error(&self, table: &'static str) -> KilnError {
        KilnError::operand(
            self.code.qualname.to_string(),
            self.instruction.offset,
            table,
            self.instruction.arg,
        )
    }

    /// Error for a state the instruction cannot be applied to.
    pub fn shape_error(&self, message: impl Into<String>) -> KilnError {
        KilnError::stack_shape(self.code.qualname.to_string(), self.instruction.offset, message)
    }

    pub fn constant(&self) -> KilnResult<&'a Value> {
        self.code
            .constants
            .get(self.arg())
            .ok_or_else(|| self.operand_error("constants"))
    }

    pub fn name(&self) -> KilnResult<&'a Arc<str>> {
        self.code
            .names
            .get(self.arg())
            .ok_or_else(|| self.operand_error("names"))
    }

    pub fn local(&self) -> KilnResult<usize> {
        let slot = self.arg();
        if slot < self.code.varnames.len() {
            Ok(slot)
        } else {
            Err(self.operand_error("varnames"))
        }
    }

    pub fn cell(&self) -> KilnResult<usize> {
        let slot = self.arg();
        if slot < self.code.cell_count() {
            Ok(slot)
        } else {
            Err(self.operand_error("cells"))
        }
    }

    /// Keyword names stored by `KW_NAMES`.
    pub fn keyword_names(&self) -> KilnResult<Arc<[Arc<str>]>> {
        match self.constant()? {
            Value::Tuple(items) => items
                .iter()
                .map(|item| match item {
                    Value::Str(s) => Ok(Arc::clone(s)),
                    other => Err(self.shape_error(format!(
                        "keyword name must be str, not {}",
                        other.type_name()
                    ))),
                })
                .collect(),
            other => Err(self.shape_error(format!(
                "KW_NAMES expects a tuple constant, not {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop(&self, state: &mut LiveState) -> KilnResult<ValueSource> {
        state
            .pop()
            .ok_or_else(|| self.shape_error(format!("{} pops an empty stack", self.instruction.opcode)))
    }

    pub fn pop_n(&self, state: &mut LiveState, n: usize) -> KilnResult<Vec<ValueSource>> {
        let depth = state.depth();
        state.pop_n(n).ok_or_else(|| {
            self.shape_error(format!(
                "{} needs {n} operands, stack has {depth}",
                self.instruction.opcode
            ))
        })
    }

    pub fn peek<'s>(&self, state: &'s LiveState, n: usize) -> KilnResult<&'s ValueSource> {
        let depth = state.depth();
        state.peek(n).ok_or_else(|| {
            self.shape_error(format!(
                "{} reads item {} of a stack of {depth}",
                self.instruction.opcode,
                n + 1
            ))
        })
    }
}

fn ty_of(value: &Value) -> TypeRef {
    value.type_of()
}

/// Result type of `left <op> right` over builtin operands.
#[must_use]
pub fn infer_binary(op: BinaryOp, left: &TypeRef, right: &TypeRef) -> TypeRef {
    let t = builtin_types();
    let int_like = |ty: &TypeRef| ty.is_subtype_of(&t.int);
    let is = |ty: &TypeRef, other: &TypeRef| ty.id() == other.id();
    let numeric = |ty: &TypeRef| int_like(ty) || is(ty, &t.float);

    if int_like(left) && int_like(right) {
        return match op {
            BinaryOp::TrueDivide => t.float.clone(),
            BinaryOp::Power | BinaryOp::MatrixMultiply => t.object.clone(),
            _ => t.int.clone(),
        };
    }
    if numeric(left) && numeric(right) {
        return match op {
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::TrueDivide
            | BinaryOp::FloorDivide
            | BinaryOp::Modulo
            | BinaryOp::Power => t.float.clone(),
            _ => t.object.clone(),
        };
    }
    let same = is(left, right);
    match op {
        BinaryOp::Add if same && (is(left, &t.str) || is(left, &t.list) || is(left, &t.tuple)) => {
            left.clone()
        }
        BinaryOp::Multiply if is(left, &t.str) && int_like(right) => t.str.clone(),
        BinaryOp::Multiply if int_like(left) && is(right, &t.str) => t.str.clone(),
        BinaryOp::Modulo if is(left, &t.str) => t.str.clone(),
        _ => t.object.clone(),
    }
}

fn infer_unary(opcode: Opcode, operand: &TypeRef) -> TypeRef {
    let t = builtin_types();
    match opcode {
        Opcode::UnaryNot => t.bool.clone(),
        _ if operand.is_subtype_of(&t.int) => t.int.clone(),
        Opcode::UnaryNegative | Opcode::UnaryPositive if operand.id() == t.float.id() => {
            t.float.clone()
        }
        _ => t.object.clone(),
    }
}

fn infer_compare(left: &TypeRef, right: &TypeRef) -> TypeRef {
    let t = builtin_types();
    let scalar = |ty: &TypeRef| {
        ty.is_subtype_of(&t.int) || ty.id() == t.float.id() || ty.id() == t.str.id()
    };
    if scalar(left) && scalar(right) {
        t.bool.clone()
    } else {
        t.object.clone()
    }
}

fn infer_iter(iterable: &TypeRef) -> TypeRef {
    let t = builtin_types();
    let builtin_iterables = [&t.list, &t.tuple, &t.str, &t.dict, &t.set, &t.range];
    if builtin_iterables.iter().any(|ty| ty.id() == iterable.id()) {
        t.iterator.clone()
    } else {
        t.object.clone()
    }
}

/// Apply instruction `index` to `state`.
///
/// `jump` is the resolved branch target of a jump instruction.
#[allow(clippy::too_many_lines)]
pub fn apply(
    code: &CompiledFunction,
    index: usize,
    jump: Option<usize>,
    state: &LiveState,
) -> KilnResult<Successors> {
    let instruction = code.instructions[index];
    let ops = Operands::new(code, instruction);
    let t = builtin_types();
    let arg = usize::try_from(instruction.arg).unwrap_or(usize::MAX);
    let next = index + 1;
    let mut s = state.clone();
    let produced = |ty: &TypeRef| ValueSource::produced(ty.clone(), index);
    let branch_target = || {
        jump.ok_or_else(|| ops.shape_error(format!("{} has no resolved target", instruction.opcode)))
    };

    let successors: Successors = match instruction.opcode {
        // =====================================================================
        // Meta
        // =====================================================================
        Opcode::Resume | Opcode::Nop | Opcode::Precall | Opcode::Cache | Opcode::GenStart => {
            smallvec![(next, s)]
        }

        // =====================================================================
        // Stack
        // =====================================================================
        Opcode::PopTop => {
            ops.pop(&mut s)?;
            smallvec![(next, s)]
        }
        Opcode::RotTwo | Opcode::RotThree | Opcode::RotFour | Opcode::RotN => {
            let n = match instruction.opcode {
                Opcode::RotTwo => 2,
                Opcode::RotThree => 3,
                Opcode::RotFour => 4,
                _ => arg,
            };
            let mut items = ops.pop_n(&mut s, n)?;
            if let Some(top) = items.pop() {
                items.insert(0, top);
            }
            s.stack.extend(items);
            smallvec![(next, s)]
        }
        Opcode::DupTop => {
            let top = ops.peek(&s, 0)?.clone();
            s.push(top);
            smallvec![(next, s)]
        }
        Opcode::DupTopTwo => {
            let second = ops.peek(&s, 1)?.clone();
            let top = ops.peek(&s, 0)?.clone();
            s.push(second);
            s.push(top);
            smallvec![(next, s)]
        }
        Opcode::Copy => {
            if arg == 0 {
                return Err(ops.shape_error("COPY 0"));
            }
            let item = ops.peek(&s, arg - 1)?.clone();
            s.push(item);
            smallvec![(next, s)]
        }
        Opcode::Swap => {
            if arg < 2 {
                return Err(ops.shape_error(format!("SWAP {arg}")));
            }
            ops.peek(&s, arg - 1)?;
            let len = s.depth();
            s.stack.swap(len - 1, len - arg);
            smallvec![(next, s)]
        }

        // =====================================================================
        // Variables
        // =====================================================================
        Opcode::LoadFast => {
            let slot = ops.local()?;
            let value = s.locals[slot].clone().unwrap_or_else(|| produced(&t.object));
            s.push(value);
            smallvec![(next, s)]
        }
        Opcode::StoreFast => {
            let slot = ops.local()?;
            let value = ops.pop(&mut s)?;
            s.locals[slot] = Some(value);
            smallvec![(next, s)]
        }
        Opcode::DeleteFast => {
            let slot = ops.local()?;
            s.locals[slot] = None;
            smallvec![(next, s)]
        }
        Opcode::LoadGlobal => {
            ops.name()?;
            s.push(produced(&t.object));
            smallvec![(next, s)]
        }
        Opcode::StoreGlobal => {
            ops.name()?;
            ops.pop(&mut s)?;
            smallvec![(next, s)]
        }
        Opcode::DeleteGlobal => {
            ops.name()?;
            smallvec![(next, s)]
        }
        Opcode::LoadDeref => {
            let slot = ops.cell()?;
            let value = s.cells[slot].clone().unwrap_or_else(|| produced(&t.object));
            s.push(value);
            smallvec![(next, s)]
        }
        Opcode::StoreDeref => {
            let slot = ops.cell()?;
            let value = ops.pop(&mut s)?;
            s.cells[slot] = Some(value);
            smallvec![(next, s)]
        }
        Opcode::DeleteDeref => {
            let slot = ops.cell()?;
            s.cells[slot] = None;
            smallvec![(next, s)]
        }
        Opcode::LoadClosure => {
            ops.cell()?;
            s.push(produced(&t.cell));
            smallvec![(next, s)]
        }
        Opcode::MakeCell => {
            let slot = ops.cell()?;
            let seeded = code
                .cell_name(slot)
                .and_then(|name| code.varnames.iter().position(|v| v == name))
                .and_then(|local| s.locals.get(local).cloned().flatten());
            s.cells[slot] = seeded;
            smallvec![(next, s)]
        }
        Opcode::CopyFreeVars => {
            let base = code.cellvars.len();
            for slot in base..(base + arg).min(s.cells.len()) {
                s.cells[slot] = Some(ValueSource::generic());
            }
            smallvec![(next, s)]
        }
        Opcode::LoadConst => {
            let value = ops.constant()?;
            s.push(produced(&ty_of(value)));
            smallvec![(next, s)]
        }

        // =====================================================================
        // Objects
        // =====================================================================
        Opcode::LoadAttr => {
            ops.name()?;
            ops.pop(&mut s)?;
            s.push(produced(&t.object));
            smallvec![(next, s)]
        }
        Opcode::LoadMethod => {
            ops.name()?;
            ops.pop(&mut s)?;
            s.push(produced(&t.method));
            smallvec![(next, s)]
        }
        Opcode::StoreAttr => {
            ops.name()?;
            ops.pop_n(&mut s, 2)?;
            smallvec![(next, s)]
        }
        Opcode::DeleteAttr => {
            ops.name()?;
            ops.pop(&mut s)?;
            smallvec![(next, s)]
        }

        // =====================================================================
        // Operators
        // =====================================================================
        Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryNot | Opcode::UnaryInvert => {
            let operand = ops.pop(&mut s)?;
            s.push(produced(&infer_unary(instruction.opcode, operand.ty())));
            smallvec![(next, s)]
        }
        Opcode::BinaryOp => {
            let (op, _) = decode_binary_op(instruction.arg)
                .ok_or_else(|| ops.shape_error(format!("unknown BINARY_OP code {arg}")))?;
            let right = ops.pop(&mut s)?;
            let left = ops.pop(&mut s)?;
            s.push(produced(&infer_binary(op, left.ty(), right.ty())));
            smallvec![(next, s)]
        }
        Opcode::CompareOp => {
            if kiln_bytecode::opcode::decode_compare_op(instruction.arg).is_none() {
                return Err(ops.shape_error(format!("unknown COMPARE_OP code {arg}")));
            }
            let right = ops.pop(&mut s)?;
            let left = ops.pop(&mut s)?;
            s.push(produced(&infer_compare(left.ty(), right.ty())));
            smallvec![(next, s)]
        }
        Opcode::IsOp | Opcode::ContainsOp => {
            ops.pop_n(&mut s, 2)?;
            s.push(produced(&t.bool));
            smallvec![(next, s)]
        }
        Opcode::BinarySubscr => {
            let key = ops.pop(&mut s)?;
            let container = ops.pop(&mut s)?;
            let ty = if container.ty().id() == t.str.id() && key.is_known(&t.int) {
                t.str.clone()
            } else {
                t.object.clone()
            };
            s.push(produced(&ty));
            smallvec![(next, s)]
        }
        Opcode::StoreSubscr => {
            ops.pop_n(&mut s, 3)?;
            smallvec![(next, s)]
        }
        Opcode::DeleteSubscr => {
            ops.pop_n(&mut s, 2)?;
            smallvec![(next, s)]
        }
        Opcode::GetIter => {
            let iterable = ops.pop(&mut s)?;
            s.push(produced(&infer_iter(iterable.ty())));
            smallvec![(next, s)]
        }

        // =====================================================================
        // Control
        // =====================================================================
        Opcode::JumpForward | Opcode::JumpBackward | Opcode::JumpAbsolute => {
            smallvec![(branch_target()?, s)]
        }
        Opcode::PopJumpIfTrue
        | Opcode::PopJumpIfFalse
        | Opcode::PopJumpForwardIfTrue
        | Opcode::PopJumpForwardIfFalse
        | Opcode::PopJumpBackwardIfTrue
        | Opcode::PopJumpBackwardIfFalse
        | Opcode::PopJumpForwardIfNone
        | Opcode::PopJumpForwardIfNotNone => {
            ops.pop(&mut s)?;
            smallvec![(next, s.clone()), (branch_target()?, s)]
        }
        Opcode::JumpIfTrueOrPop | Opcode::JumpIfFalseOrPop => {
            ops.peek(&s, 0)?;
            let taken = s.clone();
            s.pop();
            smallvec![(next, s), (branch_target()?, taken)]
        }
        Opcode::ForIter => {
            ops.peek(&s, 0)?;
            let mut exhausted = s.clone();
            exhausted.pop();
            s.push(produced(&t.object));
            smallvec![(next, s), (branch_target()?, exhausted)]
        }
        Opcode::ReturnValue => {
            ops.pop(&mut s)?;
            SmallVec::new()
        }
        Opcode::ReturnConst => {
            ops.constant()?;
            SmallVec::new()
        }

        // =====================================================================
        // Calls
        // =====================================================================
        Opcode::KwNames => {
            s.kw_names = Some(ops.keyword_names()?);
            smallvec![(next, s)]
        }
        Opcode::Call | Opcode::CallFunction | Opcode::CallMethod => {
            if let Some(names) = &s.kw_names {
                if names.len() > arg {
                    return Err(ops.shape_error(format!(
                        "{} keyword names for {arg} arguments",
                        names.len()
                    )));
                }
            }
            ops.pop_n(&mut s, arg + 1)?;
            s.kw_names = None;
            s.push(produced(&t.object));
            smallvec![(next, s)]
        }
        Opcode::CallFunctionKw => {
            ops.pop_n(&mut s, arg + 2)?;
            s.push(produced(&t.object));
            smallvec![(next, s)]
        }
        Opcode::CallFunctionEx => {
            ops.pop_n(&mut s, 2 + (arg & 1))?;
            s.push(produced(&t.object));
            smallvec![(next, s)]
        }
        Opcode::MakeFunction => {
            let flags = instruction.arg
                & (make_function::DEFAULTS
                    | make_function::KW_DEFAULTS
                    | make_function::ANNOTATIONS
                    | make_function::CLOSURE);
            let extra = usize::try_from(flags.count_ones()).unwrap_or(0);
            ops.pop_n(&mut s, extra + 1)?;
            s.push(produced(&t.function));
            smallvec![(next, s)]
        }

        // =====================================================================
        // Collections
        // =====================================================================
        Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet => {
            let items = ops.pop_n(&mut s, arg)?;
            let ty = match instruction.opcode {
                Opcode::BuildTuple => &t.tuple,
                Opcode::BuildList => &t.list,
                _ => &t.set,
            };
            s.push(ValueSource::composite(ty.clone(), index, &items));
            smallvec![(next, s)]
        }
        Opcode::BuildMap => {
            ops.pop_n(&mut s, arg.saturating_mul(2))?;
            s.push(produced(&t.dict));
            smallvec![(next, s)]
        }
        Opcode::BuildConstKeyMap => {
            ops.pop_n(&mut s, arg + 1)?;
            s.push(produced(&t.dict));
            smallvec![(next, s)]
        }
        Opcode::BuildString => {
            ops.pop_n(&mut s, arg)?;
            s.push(produced(&t.str));
            smallvec![(next, s)]
        }
        Opcode::BuildSlice => {
            if arg != 2 && arg != 3 {
                return Err(ops.shape_error(format!("BUILD_SLICE {arg}")));
            }
            ops.pop_n(&mut s, arg)?;
            s.push(produced(&t.slice));
            smallvec![(next, s)]
        }
        Opcode::ListAppend | Opcode::SetAdd | Opcode::ListExtend | Opcode::SetUpdate
        | Opcode::DictUpdate | Opcode::DictMerge => {
            ops.pop(&mut s)?;
            if arg == 0 {
                return Err(ops.shape_error(format!("{} 0", instruction.opcode)));
            }
            ops.peek(&s, arg - 1)?;
            smallvec![(next, s)]
        }
        Opcode::MapAdd => {
            ops.pop_n(&mut s, 2)?;
            if arg == 0 {
                return Err(ops.shape_error("MAP_ADD 0"));
            }
            ops.peek(&s, arg - 1)?;
            smallvec![(next, s)]
        }
        Opcode::ListToTuple => {
            let list = ops.pop(&mut s)?;
            s.push(list.with_type(t.tuple.clone()));
            smallvec![(next, s)]
        }
        Opcode::UnpackSequence => {
            let sequence = ops.pop(&mut s)?;
            if sequence.deps().len() == arg {
                s.stack
                    .extend(sequence.deps().iter().rev().map(|d| (**d).clone()));
            } else {
                s.stack.extend((0..arg).map(|_| produced(&t.object)));
            }
            smallvec![(next, s)]
        }
        Opcode::UnpackEx => {
            ops.pop(&mut s)?;
            let before = arg & 0xFF;
            let after = arg >> 8;
            s.stack.extend((0..after).map(|_| produced(&t.object)));
            s.push(produced(&t.list));
            s.stack.extend((0..before).map(|_| produced(&t.object)));
            smallvec![(next, s)]
        }
        Opcode::FormatValue => {
            if arg & 0x04 != 0 {
                ops.pop(&mut s)?;
            }
            ops.pop(&mut s)?;
            s.push(produced(&t.str));
            smallvec![(next, s)]
        }

        // =====================================================================
        // Exceptions
        // =====================================================================
        Opcode::RaiseVarargs => {
            if arg > 2 {
                return Err(ops.shape_error(format!("RAISE_VARARGS {arg}")));
            }
            ops.pop_n(&mut s, arg)?;
            SmallVec::new()
        }
        Opcode::Reraise => {
            ops.pop(&mut s)?;
            SmallVec::new()
        }
        Opcode::PushExcInfo => {
            let exc = ops.pop(&mut s)?;
            s.push(produced(&t.object));
            s.push(exc);
            smallvec![(next, s)]
        }
        Opcode::PopExcept => {
            ops.pop(&mut s)?;
            smallvec![(next, s)]
        }
        Opcode::CheckExcMatch => {
            ops.pop(&mut s)?;
            ops.peek(&s, 0)?;
            s.push(produced(&t.bool));
            smallvec![(next, s)]
        }
        Opcode::LoadAssertionError => {
            s.push(produced(&t.type_));
            smallvec![(next, s)]
        }

        // =====================================================================
        // Generators
        // =====================================================================
        Opcode::ReturnGenerator => {
            s.push(produced(&t.none));
            smallvec![(next, s)]
        }
        Opcode::YieldValue | Opcode::GetYieldFromIter => {
            ops.pop(&mut s)?;
            s.push(produced(&t.object));
            smallvec![(next, s)]
        }
        Opcode::YieldFrom => {
            ops.pop_n(&mut s, 2)?;
            s.push(produced(&t.object));
            smallvec![(next, s)]
        }
        Opcode::Send => {
            ops.peek(&s, 1)?;
            let mut done = s.clone();
            s.pop();
            s.push(produced(&t.object));
            done.pop_n(2);
            done.push(produced(&t.object));
            smallvec![(next, s), (branch_target()?, done)]
        }
    };
    Ok(successors)
}
