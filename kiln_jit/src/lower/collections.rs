//! Container building, comprehension appends and unpacking.

use super::frame::Frame;
use super::{Flow, LowerContext, Step};
use crate::flow::LiveState;
use kiln_bytecode::Opcode;
use kiln_core::collections::{Dict, Set};
use kiln_core::value::Slice;
use kiln_core::{protocol, Exception, KilnResult, PyResult, Value};
use std::sync::Arc;

pub(super) fn emit(ctx: &LowerContext<'_>, index: usize, _state: &LiveState) -> KilnResult<Step> {
    let instruction = ctx.instruction(index);
    let n = usize::try_from(instruction.arg).unwrap_or(usize::MAX);
    Ok(match instruction.opcode {
        // =====================================================================
        // Builders
        // =====================================================================
        Opcode::BuildTuple => Box::new(move |f: &mut Frame| {
            let items = f.pop_n(n)?;
            f.push(Value::tuple(items));
            Ok(Flow::Next)
        }),
        Opcode::BuildList => Box::new(move |f: &mut Frame| {
            let items = f.pop_n(n)?;
            f.push(Value::list(items));
            Ok(Flow::Next)
        }),
        Opcode::BuildSet => Box::new(move |f: &mut Frame| {
            let mut set = Set::new();
            for item in f.pop_n(n)? {
                set.insert(item)?;
            }
            f.push(Value::set(set));
            Ok(Flow::Next)
        }),
        Opcode::BuildMap => Box::new(move |f: &mut Frame| {
            let flat = f.pop_n(n.saturating_mul(2))?;
            let mut dict = Dict::new();
            let mut pairs = flat.into_iter();
            while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
                dict.insert(key, value)?;
            }
            f.push(Value::dict(dict));
            Ok(Flow::Next)
        }),
        Opcode::BuildConstKeyMap => Box::new(move |f: &mut Frame| {
            let key_tuple = f.pop()?;
            let Value::Tuple(keys) = &key_tuple else {
                return Err(Exception::system_error(format!(
                    "BUILD_CONST_KEY_MAP expects a key tuple, not {}",
                    key_tuple.type_name()
                )));
            };
            let values = f.pop_n(n)?;
            if keys.len() != values.len() {
                return Err(Exception::system_error(format!(
                    "BUILD_CONST_KEY_MAP has {} keys for {} values",
                    keys.len(),
                    values.len()
                )));
            }
            let mut dict = Dict::new();
            for (key, value) in keys.iter().cloned().zip(values) {
                dict.insert(key, value)?;
            }
            f.push(Value::dict(dict));
            Ok(Flow::Next)
        }),
        Opcode::BuildString => Box::new(move |f: &mut Frame| {
            let mut out = String::new();
            for part in f.pop_n(n)? {
                match part {
                    Value::Str(s) => out.push_str(&s),
                    other => out.push_str(&protocol::to_str(&other)?),
                }
            }
            f.push(Value::from(out));
            Ok(Flow::Next)
        }),
        Opcode::BuildSlice if n == 2 || n == 3 => Box::new(move |f: &mut Frame| {
            let mut parts = f.pop_n(n)?.into_iter();
            let start = parts.next().unwrap_or(Value::None);
            let stop = parts.next().unwrap_or(Value::None);
            let step = parts.next().unwrap_or(Value::None);
            f.push(Value::Slice(Arc::new(Slice { start, stop, step })));
            Ok(Flow::Next)
        }),
        Opcode::BuildSlice => {
            return Err(ctx
                .operands(index)
                .shape_error(format!("BUILD_SLICE takes 2 or 3 items, not {n}")))
        }

        // =====================================================================
        // Appends into a container `n` items down
        // =====================================================================
        Opcode::ListAppend => Box::new(move |f: &mut Frame| {
            let item = f.pop()?;
            with_list(f, n, |list| {
                list.push(item);
                Ok(())
            })?;
            Ok(Flow::Next)
        }),
        Opcode::ListExtend => Box::new(move |f: &mut Frame| {
            let items = protocol::collect_iterable(&f.pop()?)?;
            with_list(f, n, |list| {
                list.extend(items);
                Ok(())
            })?;
            Ok(Flow::Next)
        }),
        Opcode::SetAdd => Box::new(move |f: &mut Frame| {
            let item = f.pop()?;
            with_set(f, n, |set| set.insert(item).map(drop))?;
            Ok(Flow::Next)
        }),
        Opcode::SetUpdate => Box::new(move |f: &mut Frame| {
            let items = protocol::collect_iterable(&f.pop()?)?;
            with_set(f, n, |set| {
                for item in items {
                    set.insert(item)?;
                }
                Ok(())
            })?;
            Ok(Flow::Next)
        }),
        Opcode::MapAdd => Box::new(move |f: &mut Frame| {
            let value = f.pop()?;
            let key = f.pop()?;
            with_dict(f, n, |dict| dict.insert(key, value))?;
            Ok(Flow::Next)
        }),
        Opcode::DictUpdate | Opcode::DictMerge => {
            let merge = instruction.opcode == Opcode::DictMerge;
            Box::new(move |f: &mut Frame| {
                let popped = f.pop()?;
                let Value::Dict(source) = &popped else {
                    return Err(Exception::type_error(format!(
                        "'{}' object is not a mapping",
                        popped.type_name()
                    )));
                };
                let pairs: Vec<(Value, Value)> = source
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                with_dict(f, n, |dict| {
                    for (key, value) in pairs {
                        if merge && dict.contains(&key)? {
                            return Err(Exception::type_error(format!(
                                "got multiple values for keyword argument {}",
                                key.repr()
                            )));
                        }
                        dict.insert(key, value)?;
                    }
                    Ok(())
                })?;
                Ok(Flow::Next)
            })
        }
        Opcode::ListToTuple => Box::new(|f: &mut Frame| {
            let popped = f.pop()?;
            let Value::List(items) = &popped else {
                return Err(Exception::system_error(format!(
                    "LIST_TO_TUPLE expects a list, not {}",
                    popped.type_name()
                )));
            };
            let items = items.read().clone();
            f.push(Value::tuple(items));
            Ok(Flow::Next)
        }),

        // =====================================================================
        // Unpacking
        // =====================================================================
        Opcode::UnpackSequence => Box::new(move |f: &mut Frame| {
            let items = protocol::collect_iterable(&f.pop()?)?;
            if items.len() < n {
                return Err(Exception::value_error(format!(
                    "not enough values to unpack (expected {n}, got {})",
                    items.len()
                )));
            }
            if items.len() > n {
                return Err(Exception::value_error(format!(
                    "too many values to unpack (expected {n})"
                )));
            }
            f.stack.extend(items.into_iter().rev());
            Ok(Flow::Next)
        }),
        Opcode::UnpackEx => {
            let before = usize::try_from(instruction.arg & 0xff).unwrap_or(0);
            let after = usize::try_from(instruction.arg >> 8).unwrap_or(0);
            Box::new(move |f: &mut Frame| {
                let mut items = protocol::collect_iterable(&f.pop()?)?;
                if items.len() < before + after {
                    return Err(Exception::value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        before + after,
                        items.len()
                    )));
                }
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(before);
                f.stack.extend(tail.into_iter().rev());
                f.push(Value::list(middle));
                f.stack.extend(items.into_iter().rev());
                Ok(Flow::Next)
            })
        }

        // =====================================================================
        // Formatting
        // =====================================================================
        Opcode::FormatValue => {
            let conversion = instruction.arg & 3;
            let has_spec = instruction.arg & 4 != 0;
            Box::new(move |f: &mut Frame| {
                let spec = if has_spec {
                    match f.pop()? {
                        Value::Str(s) => s.to_string(),
                        other => protocol::to_str(&other)?,
                    }
                } else {
                    String::new()
                };
                let value = f.pop()?;
                let value = match conversion {
                    1 => Value::from(protocol::to_str(&value)?),
                    2 | 3 => Value::from(protocol::repr(&value)?),
                    _ => value,
                };
                f.push(Value::from(protocol::format_value(&value, &spec)?));
                Ok(Flow::Next)
            })
        }
        _ => return Err(ctx.unsupported(index)),
    })
}

/// Run `op` on the list `depth` items below TOS.
fn with_list(
    f: &mut Frame,
    depth: usize,
    op: impl FnOnce(&mut Vec<Value>) -> PyResult<()>,
) -> PyResult<()> {
    match target(f, depth)? {
        Value::List(list) => op(&mut list.write()),
        other => Err(not_a(other, "list")),
    }
}

fn with_set(f: &mut Frame, depth: usize, op: impl FnOnce(&mut Set) -> PyResult<()>) -> PyResult<()> {
    match target(f, depth)? {
        Value::Set(set) => op(&mut set.write()),
        other => Err(not_a(other, "set")),
    }
}

fn with_dict(f: &mut Frame, depth: usize, op: impl FnOnce(&mut Dict) -> PyResult<()>) -> PyResult<()> {
    match target(f, depth)? {
        Value::Dict(dict) => op(&mut dict.write()),
        other => Err(not_a(other, "dict")),
    }
}

fn target(f: &Frame, depth: usize) -> PyResult<&Value> {
    f.peek(depth.saturating_sub(1))
}

fn not_a(value: &Value, kind: &str) -> Exception {
    Exception::system_error(format!(
        "expected a {kind} below the stack top, found {}",
        value.type_name()
    ))
}
