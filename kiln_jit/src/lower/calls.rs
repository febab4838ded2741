//! Calls and function creation.
//!
//! Every call goes through [`protocol::call`]. Keyword arguments reach it
//! in one of three shapes:
//!
//! - `KW_NAMES` + `CALL`: names stashed on the frame, values trailing the
//!   positionals;
//! - `CALL_FUNCTION_KW`: names as a tuple on TOS;
//! - `CALL_FUNCTION_EX`: an argument iterable and an optional mapping.
//!
//! Method calls use a flat layout: `LOAD_METHOD` leaves one bound callable
//! where CPython would leave a method and a `NULL` or self pair, so
//! `CALL_METHOD` pops the same shape as `CALL_FUNCTION`.

use super::frame::Frame;
use super::{Flow, LowerContext, Step};
use crate::flow::LiveState;
use crate::function::TranslatedFunction;
use kiln_bytecode::opcode::make_function;
use kiln_bytecode::{CodeConstant, Opcode};
use kiln_core::object::cell::Cell;
use kiln_core::{protocol, Exception, KeywordArgs, KilnResult, PyResult, Value};
use std::sync::Arc;

pub(super) fn emit(ctx: &LowerContext<'_>, index: usize, _state: &LiveState) -> KilnResult<Step> {
    let instruction = ctx.instruction(index);
    let argc = usize::try_from(instruction.arg).unwrap_or(usize::MAX);
    Ok(match instruction.opcode {
        Opcode::KwNames => {
            let names = ctx.operands(index).keyword_names()?;
            Box::new(move |f: &mut Frame| {
                f.kw_names = Some(Arc::clone(&names));
                Ok(Flow::Next)
            })
        }
        Opcode::Call => Box::new(move |f: &mut Frame| {
            let args = f.pop_n(argc)?;
            let callee = f.pop()?;
            let names = f.kw_names.take();
            let result = call_with_names(&callee, args, names.as_deref())?;
            f.push(result);
            Ok(Flow::Next)
        }),
        Opcode::CallFunction | Opcode::CallMethod => Box::new(move |f: &mut Frame| {
            let args = f.pop_n(argc)?;
            let callee = f.pop()?;
            f.push(protocol::call(&callee, &args, &KeywordArgs::default())?);
            Ok(Flow::Next)
        }),
        Opcode::CallFunctionKw => Box::new(move |f: &mut Frame| {
            let names = keyword_tuple(&f.pop()?)?;
            let args = f.pop_n(argc)?;
            let callee = f.pop()?;
            let result = call_with_names(&callee, args, Some(names.as_slice()))?;
            f.push(result);
            Ok(Flow::Next)
        }),
        Opcode::CallFunctionEx => {
            let has_mapping = instruction.arg & 1 == 1;
            Box::new(move |f: &mut Frame| {
                let keywords = if has_mapping {
                    mapping_keywords(&f.pop()?)?
                } else {
                    KeywordArgs::default()
                };
                let args = protocol::collect_iterable(&f.pop()?)?;
                let callee = f.pop()?;
                f.push(protocol::call(&callee, &args, &keywords)?);
                Ok(Flow::Next)
            })
        }
        Opcode::MakeFunction => {
            let flags = instruction.arg;
            let nested = ctx.nested.clone();
            let config = ctx.config.clone();
            Box::new(move |f: &mut Frame| {
                let code_value = f.pop()?;
                let code = CodeConstant::from_value(&code_value).ok_or_else(|| {
                    Exception::system_error(format!(
                        "MAKE_FUNCTION expects a code object, not {}",
                        code_value.type_name()
                    ))
                })?;
                let closure = if flags & make_function::CLOSURE != 0 {
                    closure_cells(&f.pop()?)?
                } else {
                    Vec::new()
                };
                if flags & make_function::ANNOTATIONS != 0 {
                    f.pop()?;
                }
                let kw_defaults = if flags & make_function::KW_DEFAULTS != 0 {
                    Some(mapping_keywords(&f.pop()?)?)
                } else {
                    None
                };
                let defaults = if flags & make_function::DEFAULTS != 0 {
                    Some(protocol::collect_iterable(&f.pop()?)?)
                } else {
                    None
                };
                let unit = nested.resolve(&code, &config)?;
                let function = TranslatedFunction::instantiate(
                    unit,
                    defaults,
                    kw_defaults,
                    closure,
                    Arc::clone(&f.globals),
                )?;
                f.push(Value::Function(Arc::new(function)));
                Ok(Flow::Next)
            })
        }
        _ => return Err(ctx.unsupported(index)),
    })
}

/// Call with the trailing `names.len()` arguments passed by keyword.
fn call_with_names(callee: &Value, mut args: Vec<Value>, names: Option<&[Arc<str>]>) -> PyResult<Value> {
    let names = names.unwrap_or_default();
    let split = args.len().checked_sub(names.len()).ok_or_else(|| {
        Exception::system_error(format!(
            "{} keyword names for {} arguments",
            names.len(),
            args.len()
        ))
    })?;
    let values = args.split_off(split);
    let keywords: KeywordArgs = names.iter().cloned().zip(values).collect();
    protocol::call(callee, &args, &keywords)
}

fn keyword_tuple(value: &Value) -> PyResult<Vec<Arc<str>>> {
    let Value::Tuple(items) = value else {
        return Err(Exception::system_error(format!(
            "keyword names must be a tuple, not {}",
            value.type_name()
        )));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Str(name) => Ok(Arc::clone(name)),
            _ => Err(Exception::type_error("keywords must be strings")),
        })
        .collect()
}

/// Keywords from a `**mapping` argument.
fn mapping_keywords(value: &Value) -> PyResult<KeywordArgs> {
    let Value::Dict(dict) = value else {
        return Err(Exception::type_error(format!(
            "argument after ** must be a mapping, not {}",
            value.type_name()
        )));
    };
    dict.read()
        .iter()
        .map(|(key, value)| match key {
            Value::Str(name) => Ok((Arc::clone(name), value.clone())),
            _ => Err(Exception::type_error("keywords must be strings")),
        })
        .collect()
}

fn closure_cells(value: &Value) -> PyResult<Vec<Arc<Cell>>> {
    let Value::Tuple(items) = value else {
        return Err(Exception::system_error("closure must be a tuple of cells"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Cell(cell) => Ok(Arc::clone(cell)),
            other => Err(Exception::system_error(format!(
                "closure item must be a cell, not {}",
                other.type_name()
            ))),
        })
        .collect()
}
