//! Raising and handler bookkeeping.
//!
//! A handler runs with the exception it caught recorded in
//! [`Frame::exc_info`]. `PUSH_EXC_INFO` saves the previous one on the
//! operand stack and `POP_EXCEPT` restores it, so nested handlers unwind in
//! order.
//!
//! `RERAISE` takes the exception from TOS and ignores its operand. In this
//! dialect the raising offset is not restored from the stack; tracebacks
//! are built from the unwinding frames instead.

use super::frame::Frame;
use super::{Flow, LowerContext, Step};
use crate::flow::LiveState;
use kiln_bytecode::Opcode;
use kiln_core::types::builtin_types;
use kiln_core::{Exception, KeywordArgs, KilnResult, PyResult, Value};

pub(super) fn emit(ctx: &LowerContext<'_>, index: usize, _state: &LiveState) -> KilnResult<Step> {
    let instruction = ctx.instruction(index);
    Ok(match instruction.opcode {
        Opcode::RaiseVarargs => match instruction.arg {
            0 => Box::new(|f: &mut Frame| {
                Err(f
                    .exc_info
                    .clone()
                    .unwrap_or_else(|| Exception::runtime_error("No active exception to reraise")))
            }),
            1 => Box::new(|f: &mut Frame| Err(to_exception(f.pop()?)?)),
            2 => Box::new(|f: &mut Frame| {
                let cause = f.pop()?;
                let exc = to_exception(f.pop()?)?;
                let cause = if cause.is_none() {
                    None
                } else {
                    Some(to_exception(cause)?)
                };
                exc.set_cause(cause);
                Err(exc)
            }),
            other => {
                return Err(ctx
                    .operands(index)
                    .shape_error(format!("RAISE_VARARGS takes 0 to 2 operands, not {other}")))
            }
        },
        Opcode::Reraise => Box::new(|f: &mut Frame| Err(to_exception(f.pop()?)?)),
        Opcode::PushExcInfo => Box::new(|f: &mut Frame| {
            let exc = f.pop()?;
            let previous = f.exc_info.take().map_or(Value::None, Value::Exception);
            f.push(previous);
            if let Value::Exception(current) = &exc {
                f.exc_info = Some(current.clone());
            }
            f.push(exc);
            Ok(Flow::Next)
        }),
        Opcode::PopExcept => Box::new(|f: &mut Frame| {
            f.exc_info = match f.pop()? {
                Value::Exception(previous) => Some(previous),
                _ => None,
            };
            Ok(Flow::Next)
        }),
        Opcode::CheckExcMatch => Box::new(|f: &mut Frame| {
            let pattern = f.pop()?;
            check_catchable(&pattern)?;
            let matched = kiln_core::protocol::is_instance(f.peek(0)?, &pattern)?;
            f.push(Value::Bool(matched));
            Ok(Flow::Next)
        }),
        Opcode::LoadAssertionError => Box::new(|f: &mut Frame| {
            f.push(Value::Type(builtin_types().assertion_error.clone()));
            Ok(Flow::Next)
        }),
        _ => return Err(ctx.unsupported(index)),
    })
}

/// The exception a `raise` operand denotes.
///
/// Exception types are instantiated without arguments.
pub(crate) fn to_exception(value: Value) -> PyResult<Exception> {
    match value {
        Value::Exception(exc) => Ok(exc),
        Value::Type(ty) if ty.is_exception_type() => match ty.construct(&[], &KeywordArgs::default())? {
            Value::Exception(exc) => Ok(exc),
            other => Err(Exception::type_error(format!(
                "calling {} should have returned an instance of BaseException, not {}",
                ty.name(),
                other.type_name()
            ))),
        },
        _ => Err(Exception::type_error("exceptions must derive from BaseException")),
    }
}

fn check_catchable(pattern: &Value) -> PyResult<()> {
    let ok = match pattern {
        Value::Type(ty) => ty.is_exception_type(),
        Value::Tuple(items) => items
            .iter()
            .all(|item| matches!(item, Value::Type(ty) if ty.is_exception_type())),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Exception::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raising_a_type_instantiates_it() {
        let exc = to_exception(Value::Type(builtin_types().value_error.clone())).unwrap();
        assert_eq!(exc.type_name(), "ValueError");
        assert!(exc.args().is_empty());
    }

    #[test]
    fn test_raising_a_non_exception() {
        let err = to_exception(Value::Int(1)).unwrap_err();
        assert_eq!(err.message(), "exceptions must derive from BaseException");
        assert!(to_exception(Value::Type(builtin_types().int.clone())).is_err());
    }

    #[test]
    fn test_catch_pattern_must_be_exception_types() {
        assert!(check_catchable(&Value::Type(builtin_types().key_error.clone())).is_ok());
        let tuple = Value::tuple(vec![
            Value::Type(builtin_types().key_error.clone()),
            Value::Type(builtin_types().str.clone()),
        ]);
        let err = check_catchable(&tuple).unwrap_err();
        assert!(err.message().starts_with("catching classes"));
    }
}
