//! Operand-stack shuffles.

use super::frame::Frame;
use super::{Flow, LowerContext, Step};
use crate::flow::LiveState;
use kiln_bytecode::Opcode;
use kiln_core::{KilnResult, PyResult};

pub(super) fn emit(ctx: &LowerContext<'_>, index: usize, _state: &LiveState) -> KilnResult<Step> {
    let instruction = ctx.instruction(index);
    let arg = usize::try_from(instruction.arg).unwrap_or(usize::MAX);
    Ok(match instruction.opcode {
        Opcode::PopTop => Box::new(|f: &mut Frame| {
            f.pop()?;
            Ok(Flow::Next)
        }),
        Opcode::RotTwo => rotate(2),
        Opcode::RotThree => rotate(3),
        Opcode::RotFour => rotate(4),
        Opcode::RotN => rotate(arg),
        Opcode::DupTop => Box::new(|f: &mut Frame| {
            let top = f.peek(0)?.clone();
            f.push(top);
            Ok(Flow::Next)
        }),
        Opcode::DupTopTwo => Box::new(|f: &mut Frame| {
            let second = f.peek(1)?.clone();
            let top = f.peek(0)?.clone();
            f.push(second);
            f.push(top);
            Ok(Flow::Next)
        }),
        Opcode::Copy if arg >= 1 => Box::new(move |f: &mut Frame| {
            let item = f.peek(arg - 1)?.clone();
            f.push(item);
            Ok(Flow::Next)
        }),
        Opcode::Swap if arg >= 2 => Box::new(move |f: &mut Frame| {
            f.peek(arg - 1)?;
            let len = f.stack.len();
            f.stack.swap(len - 1, len - arg);
            Ok(Flow::Next)
        }),
        Opcode::Copy | Opcode::Swap => {
            return Err(ctx
                .operands(index)
                .shape_error(format!("{} {arg}", instruction.opcode)))
        }
        _ => return Err(ctx.unsupported(index)),
    })
}

/// Move TOS down to position `n`, lifting the items above it.
fn rotate(n: usize) -> Step {
    Box::new(move |f: &mut Frame| -> PyResult<Flow> {
        if n > 1 {
            f.peek(n - 1)?;
            let len = f.stack.len();
            f.stack[len - n..].rotate_right(1);
        }
        Ok(Flow::Next)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Value;

    #[test]
    fn test_rotate_three() {
        let mut frame = Frame::detached(0, 0);
        for i in 1..=4 {
            frame.push(Value::Int(i));
        }
        rotate(3)(&mut frame).unwrap();
        assert_eq!(
            frame.stack,
            vec![Value::Int(1), Value::Int(4), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn test_rotate_underflow() {
        let mut frame = Frame::detached(0, 0);
        frame.push(Value::Int(1));
        assert!(rotate(2)(&mut frame).is_err());
    }
}
