//! Builtin functions (len, abs, min, max, sum, print, etc.).
//!
//! Builtin names resolve after module globals. Type names such as `int` or
//! `list` resolve to the type objects themselves, so calling them goes
//! through the type's constructor.

use crate::exception::{Exception, PyResult};
use crate::object::{KeywordArgs, NativeFn, NativeFunction};
use crate::protocol::{self, BinaryOp, CompareOp};
use crate::types::builtin_types;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::io::Write;
use std::sync::LazyLock;

static FUNCTIONS: &[(&str, NativeFn)] = &[
    ("len", builtin_len),
    ("isinstance", builtin_isinstance),
    ("iter", builtin_iter),
    ("next", builtin_next),
    ("abs", builtin_abs),
    ("min", builtin_min),
    ("max", builtin_max),
    ("sum", builtin_sum),
    ("repr", builtin_repr),
    ("print", builtin_print),
];

static TABLE: LazyLock<FxHashMap<String, Value>> = LazyLock::new(|| {
    let types = builtin_types();
    let mut table: FxHashMap<String, Value> = FUNCTIONS
        .iter()
        .map(|(name, func)| ((*name).to_string(), NativeFunction::value(name, *func)))
        .collect();
    for (name, ty) in [
        ("object", &types.object),
        ("type", &types.type_),
        ("int", &types.int),
        ("float", &types.float),
        ("bool", &types.bool),
        ("str", &types.str),
        ("list", &types.list),
        ("tuple", &types.tuple),
        ("dict", &types.dict),
        ("set", &types.set),
        ("range", &types.range),
    ] {
        table.insert(name.to_string(), Value::Type(ty.clone()));
    }
    for ty in types.exception_types() {
        table.insert(ty.name().to_string(), Value::Type(ty.clone()));
    }
    table
});

/// Resolve a builtin name.
#[must_use]
pub fn lookup(name: &str) -> Option<Value> {
    TABLE.get(name).cloned()
}

/// Every builtin name, unordered.
pub fn names() -> impl Iterator<Item = &'static str> {
    TABLE.keys().map(String::as_str)
}

fn no_keywords(name: &str, keywords: &KeywordArgs) -> PyResult<()> {
    match keywords.keys().next() {
        Some(key) => Err(Exception::type_error(format!(
            "{name}() got an unexpected keyword argument '{key}'"
        ))),
        None => Ok(()),
    }
}

fn arity(name: &str, n: usize, args: &[Value]) -> Exception {
    Exception::type_error(format!(
        "{name}() takes exactly {n} argument{} ({} given)",
        if n == 1 { "" } else { "s" },
        args.len()
    ))
}

// =============================================================================
// len / isinstance / repr
// =============================================================================

/// Builtin len function.
fn builtin_len(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    no_keywords("len", keywords)?;
    let [obj] = args else {
        return Err(arity("len", 1, args));
    };
    let n = protocol::len(obj)?;
    i64::try_from(n)
        .map(Value::Int)
        .map_err(|_| Exception::overflow("length does not fit in an int"))
}

fn builtin_isinstance(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    no_keywords("isinstance", keywords)?;
    match args {
        [value, class_or_tuple] => Ok(Value::Bool(protocol::is_instance(value, class_or_tuple)?)),
        _ => Err(arity("isinstance", 2, args)),
    }
}

fn builtin_repr(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    no_keywords("repr", keywords)?;
    match args {
        [value] => Ok(Value::from(protocol::repr(value)?)),
        _ => Err(arity("repr", 1, args)),
    }
}

// =============================================================================
// Iteration
// =============================================================================

fn builtin_iter(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    no_keywords("iter", keywords)?;
    match args {
        [value] => protocol::get_iter(value),
        _ => Err(arity("iter", 1, args)),
    }
}

/// `next(iterator[, default])`.
fn builtin_next(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    no_keywords("next", keywords)?;
    let (iterator, default) = match args {
        [it] => (it, None),
        [it, default] => (it, Some(default)),
        _ => {
            return Err(Exception::type_error(format!(
                "next expected 1 or 2 arguments, got {}",
                args.len()
            )))
        }
    };
    let method = iterator.type_of().lookup("__next__").ok_or_else(|| {
        Exception::type_error(format!(
            "'{}' object is not an iterator",
            iterator.type_name()
        ))
    })?;
    match method.call(std::slice::from_ref(iterator)) {
        Err(e) if e.is_instance(&builtin_types().stop_iteration) => match default {
            Some(d) => Ok(d.clone()),
            None => Err(e),
        },
        other => other,
    }
}

// =============================================================================
// Numeric
// =============================================================================

fn builtin_abs(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    no_keywords("abs", keywords)?;
    match args {
        [Value::Int(i)] => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Exception::overflow("int too large to take abs")),
        [Value::Bool(b)] => Ok(Value::Int(i64::from(*b))),
        [Value::Float(f)] => Ok(Value::Float(f.abs())),
        [other] => match other.type_of().lookup("__abs__") {
            Some(method) => method.call(std::slice::from_ref(other)),
            None => Err(Exception::type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
        _ => Err(arity("abs", 1, args)),
    }
}

/// Shared body of `min` and `max`: one iterable or several arguments.
fn extreme(name: &str, op: CompareOp, args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    let mut key = None;
    let mut default = None;
    for (k, v) in keywords {
        match &**k {
            "key" if !v.is_none() => key = Some(v.clone()),
            "key" => {}
            "default" => default = Some(v.clone()),
            other => {
                return Err(Exception::type_error(format!(
                    "{name}() got an unexpected keyword argument '{other}'"
                )))
            }
        }
    }
    let items = match args {
        [] => {
            return Err(Exception::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )))
        }
        [iterable] => protocol::collect_iterable(iterable)?,
        many => many.to_vec(),
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let score = match &key {
            Some(f) => f.call(std::slice::from_ref(&item))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_score, _)) => protocol::truthy(&protocol::compare(op, &score, best_score)?)?,
        };
        if replace {
            best = Some((score, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(Exception::value_error(format!(
            "{name}() arg is an empty sequence"
        ))),
    }
}

fn builtin_min(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    extreme("min", CompareOp::Lt, args, keywords)
}

fn builtin_max(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    extreme("max", CompareOp::Gt, args, keywords)
}

/// `sum(iterable, start=0)`.
fn builtin_sum(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    let (iterable, mut total) = match args {
        [iterable] => (iterable, keywords.get("start").cloned().unwrap_or(Value::Int(0))),
        [iterable, start] => (iterable, start.clone()),
        _ => {
            return Err(Exception::type_error(format!(
                "sum() takes at most 2 arguments ({} given)",
                args.len()
            )))
        }
    };
    if let Some(other) = keywords.keys().find(|k| &***k != "start") {
        return Err(Exception::type_error(format!(
            "sum() got an unexpected keyword argument '{other}'"
        )));
    }
    if total.as_str().is_some() {
        return Err(Exception::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    let iterator = protocol::get_iter(iterable)?;
    while let Some(item) = protocol::next(&iterator)? {
        total = protocol::binary_op(BinaryOp::Add, &total, &item)?;
    }
    Ok(total)
}

// =============================================================================
// print
// =============================================================================

/// `print(*values, sep=' ', end='\n')` to stdout.
fn builtin_print(args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    let text_arg = |name: &str, default: &str| -> PyResult<String> {
        match keywords.get(name) {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => Err(Exception::type_error(format!(
                "{name} must be None or a string, not {}",
                other.type_name()
            ))),
        }
    };
    if let Some(other) = keywords
        .keys()
        .find(|k| !matches!(&***k, "sep" | "end" | "flush"))
    {
        return Err(Exception::type_error(format!(
            "print() got an unexpected keyword argument '{other}'"
        )));
    }
    let sep = text_arg("sep", " ")?;
    let end = text_arg("end", "\n")?;
    let mut line = String::new();
    for (i, value) in args.iter().enumerate() {
        if i > 0 {
            line.push_str(&sep);
        }
        line.push_str(&protocol::to_str(value)?);
    }
    line.push_str(&end);
    let mut out = std::io::stdout().lock();
    out.write_all(line.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| Exception::runtime_error(format!("print failed: {e}")))?;
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> PyResult<Value> {
        lookup(name).unwrap().call(args)
    }

    fn call_kw(name: &str, args: &[Value], kw: &[(&str, Value)]) -> PyResult<Value> {
        let keywords: KeywordArgs = kw.iter().map(|(k, v)| (std::sync::Arc::from(*k), v.clone())).collect();
        protocol::call(&lookup(name).unwrap(), args, &keywords)
    }

    #[test]
    fn test_len_and_arity() {
        assert_eq!(call("len", &[Value::from("abc")]).unwrap(), Value::Int(3));
        let err = call("len", &[]).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: len() takes exactly 1 argument (0 given)");
    }

    #[test]
    fn test_min_max() {
        let items = Value::list(vec![Value::Int(3), Value::Int(-1), Value::Int(7)]);
        assert_eq!(call("min", std::slice::from_ref(&items)).unwrap(), Value::Int(-1));
        assert_eq!(call("max", &[Value::Int(2), Value::Float(2.5)]).unwrap(), Value::Float(2.5));
        assert!(call("max", &[Value::list(vec![])]).is_err());
        assert_eq!(
            call_kw("max", &[Value::list(vec![])], &[("default", Value::Int(0))]).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_min_with_key() {
        let items = Value::list(vec![Value::from("ccc"), Value::from("a"), Value::from("bb")]);
        let len = lookup("len").unwrap();
        assert_eq!(call_kw("min", &[items], &[("key", len)]).unwrap(), Value::from("a"));
    }

    #[test]
    fn test_sum() {
        let range = call("range", &[Value::Int(5)]).unwrap();
        assert_eq!(call("sum", std::slice::from_ref(&range)).unwrap(), Value::Int(10));
        assert_eq!(call("sum", &[range, Value::Float(0.5)]).unwrap(), Value::Float(10.5));
        assert!(call("sum", &[Value::list(vec![]), Value::from("")]).is_err());
    }

    #[test]
    fn test_next_default() {
        let it = call("iter", &[Value::list(vec![])]).unwrap();
        assert_eq!(call("next", &[it.clone(), Value::None]).unwrap(), Value::None);
        let err = call("next", &[it]).unwrap_err();
        assert!(err.is_instance(&builtin_types().stop_iteration));
    }

    #[test]
    fn test_types_are_builtins() {
        assert_eq!(call("int", &[Value::from("42")]).unwrap(), Value::Int(42));
        assert!(lookup("ValueError").is_some());
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn test_abs() {
        assert_eq!(call("abs", &[Value::Int(-3)]).unwrap(), Value::Int(3));
        assert!(call("abs", &[Value::Int(i64::MIN)]).is_err());
    }
}
