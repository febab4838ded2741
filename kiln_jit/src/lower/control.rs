//! Branches, loops and returns.

use super::frame::Frame;
use super::{Flow, LowerContext, Step};
use crate::flow::LiveState;
use kiln_bytecode::Opcode;
use kiln_core::protocol;
use kiln_core::{KilnResult, PyResult, Value};

pub(super) fn emit(ctx: &LowerContext<'_>, index: usize, _state: &LiveState) -> KilnResult<Step> {
    let opcode = ctx.instruction(index).opcode;
    Ok(match opcode {
        Opcode::JumpForward | Opcode::JumpBackward | Opcode::JumpAbsolute => {
            let target = ctx.target(index)?;
            Box::new(move |_: &mut Frame| Ok(Flow::Jump(target)))
        }
        Opcode::PopJumpForwardIfTrue
        | Opcode::PopJumpBackwardIfTrue
        | Opcode::PopJumpIfTrue => pop_jump(ctx.target(index)?, protocol::truthy),
        Opcode::PopJumpForwardIfFalse
        | Opcode::PopJumpBackwardIfFalse
        | Opcode::PopJumpIfFalse => pop_jump(ctx.target(index)?, |v| Ok(!protocol::truthy(v)?)),
        Opcode::PopJumpForwardIfNone => pop_jump(ctx.target(index)?, |v| Ok(v.is_none())),
        Opcode::PopJumpForwardIfNotNone => pop_jump(ctx.target(index)?, |v| Ok(!v.is_none())),
        Opcode::JumpIfTrueOrPop => or_pop(ctx.target(index)?, true),
        Opcode::JumpIfFalseOrPop => or_pop(ctx.target(index)?, false),
        Opcode::ForIter => {
            let exhausted = ctx.target(index)?;
            Box::new(move |f: &mut Frame| {
                let iterator = f.peek(0)?.clone();
                match protocol::next(&iterator)? {
                    Some(item) => {
                        f.push(item);
                        Ok(Flow::Next)
                    }
                    None => {
                        f.pop()?;
                        Ok(Flow::Jump(exhausted))
                    }
                }
            })
        }
        Opcode::ReturnValue => Box::new(|f: &mut Frame| Ok(Flow::Return(f.pop()?))),
        Opcode::ReturnConst => {
            let value = ctx.operands(index).constant()?.clone();
            Box::new(move |_: &mut Frame| Ok(Flow::Return(value.clone())))
        }
        _ => return Err(ctx.unsupported(index)),
    })
}

/// Pop TOS and jump when `taken` holds for it.
fn pop_jump(target: usize, taken: fn(&Value) -> PyResult<bool>) -> Step {
    Box::new(move |f: &mut Frame| {
        let condition = f.pop()?;
        Ok(if taken(&condition)? {
            Flow::Jump(target)
        } else {
            Flow::Next
        })
    })
}

/// Keep TOS and jump when its truth equals `when`, otherwise pop it.
fn or_pop(target: usize, when: bool) -> Step {
    Box::new(move |f: &mut Frame| {
        if protocol::truthy(f.peek(0)?)? == when {
            Ok(Flow::Jump(target))
        } else {
            f.pop()?;
            Ok(Flow::Next)
        }
    })
}
