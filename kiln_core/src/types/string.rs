//! `str` methods.

use super::iterator::SequenceIterator;
use super::BuiltinTypes;
use crate::exception::{Exception, PyResult};
use crate::object::type_obj::TypeRef;
use crate::object::KeywordArgs;
use crate::protocol;
use crate::value::Value;
use std::sync::Arc;

pub(super) fn register(types: &BuiltinTypes) {
    let ty = &types.str;
    ty.define_native("__add__", str_add);
    ty.define_native("__mul__", str_mul);
    ty.define_native("__rmul__", str_mul);
    ty.define_native("__mod__", str_mod);
    ty.define_native("__eq__", str_eq);
    ty.define_native("__ne__", str_ne);
    ty.define_native("__lt__", str_lt);
    ty.define_native("__le__", str_le);
    ty.define_native("__gt__", str_gt);
    ty.define_native("__ge__", str_ge);
    ty.define_native("__len__", str_len);
    ty.define_native("__bool__", str_bool);
    ty.define_native("__contains__", str_contains);
    ty.define_native("__getitem__", str_getitem);
    ty.define_native("__iter__", str_iter);
    ty.define_native("upper", str_upper);
    ty.define_native("lower", str_lower);
    ty.define_native("strip", str_strip);
    ty.define_native("startswith", str_startswith);
    ty.define_native("endswith", str_endswith);
    ty.define_native("join", str_join);
    ty.define_native("split", str_split);
    ty.define_native("replace", str_replace);
    ty.define_native("find", str_find);
    ty.set_constructor(construct_str);
}

fn this(args: &[Value]) -> PyResult<&str> {
    match args.first() {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(Exception::type_error(format!(
            "descriptor requires a 'str' object but received a '{}'",
            other.type_name()
        ))),
        None => Err(Exception::type_error("unbound str method needs an argument")),
    }
}

fn str_arg<'a>(args: &'a [Value], index: usize, method: &str) -> PyResult<&'a str> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(Exception::type_error(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        ))),
        None => Err(Exception::type_error(format!(
            "{method}() missing required argument"
        ))),
    }
}

fn str_add(args: &[Value]) -> PyResult<Value> {
    let a = this(args)?;
    match args.get(1) {
        Some(Value::Str(b)) => Ok(Value::from(format!("{a}{b}"))),
        _ => Ok(Value::NotImplemented),
    }
}

fn str_mul(args: &[Value]) -> PyResult<Value> {
    let a = this(args)?;
    match args.get(1).and_then(Value::as_int) {
        Some(n) => Ok(Value::from(a.repeat(usize::try_from(n).unwrap_or(0)))),
        None => Ok(Value::NotImplemented),
    }
}

/// `"%s and %r" % (a, b)`: supports `%s`, `%r`, `%d` and `%%`.
fn str_mod(args: &[Value]) -> PyResult<Value> {
    let template = this(args)?;
    let values: Vec<Value> = match args.get(1) {
        Some(Value::Tuple(items)) => items.to_vec(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    };
    let mut values = values.into_iter();
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(spec @ ('s' | 'r' | 'd')) => {
                let value = values.next().ok_or_else(|| {
                    Exception::type_error("not enough arguments for format string")
                })?;
                match spec {
                    's' => out.push_str(&protocol::to_str(&value)?),
                    'r' => out.push_str(&protocol::repr(&value)?),
                    _ => match value.as_int() {
                        Some(i) => out.push_str(&i.to_string()),
                        None => {
                            return Err(Exception::type_error(format!(
                                "%d format: a number is required, not {}",
                                value.type_name()
                            )))
                        }
                    },
                }
            }
            other => {
                return Err(Exception::value_error(format!(
                    "unsupported format character '{}'",
                    other.unwrap_or(' ')
                )))
            }
        }
    }
    if values.next().is_some() {
        return Err(Exception::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(Value::from(out))
}

macro_rules! str_compare {
    ($name:ident, $op:tt) => {
        fn $name(args: &[Value]) -> PyResult<Value> {
            let a = this(args)?;
            match args.get(1) {
                Some(Value::Str(b)) => Ok(Value::Bool(a $op &**b)),
                _ => Ok(Value::NotImplemented),
            }
        }
    };
}

str_compare!(str_eq, ==);
str_compare!(str_ne, !=);
str_compare!(str_lt, <);
str_compare!(str_le, <=);
str_compare!(str_gt, >);
str_compare!(str_ge, >=);

fn str_len(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Int(this(args)?.chars().count() as i64))
}

fn str_bool(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Bool(!this(args)?.is_empty()))
}

fn str_contains(args: &[Value]) -> PyResult<Value> {
    let haystack = this(args)?;
    let needle = match args.get(1) {
        Some(Value::Str(s)) => s,
        Some(other) => {
            return Err(Exception::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            )))
        }
        None => return Err(Exception::type_error("__contains__ expected 1 argument")),
    };
    Ok(Value::Bool(haystack.contains(&**needle)))
}

fn str_getitem(args: &[Value]) -> PyResult<Value> {
    let s = this(args)?;
    let chars: Vec<char> = s.chars().collect();
    match args.get(1) {
        Some(Value::Slice(slice)) => {
            let indices = protocol::slice_indices(slice, chars.len())?;
            Ok(Value::from(indices.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        Some(index) => {
            let i = protocol::sequence_index(index, chars.len(), "string")?;
            Ok(Value::from(chars[i].to_string()))
        }
        None => Err(Exception::type_error("__getitem__ expected 1 argument")),
    }
}

fn str_iter(args: &[Value]) -> PyResult<Value> {
    let items: Vec<Value> = this(args)?
        .chars()
        .map(|c| Value::from(c.to_string()))
        .collect();
    Ok(SequenceIterator::value(items))
}

fn str_upper(args: &[Value]) -> PyResult<Value> {
    Ok(Value::from(this(args)?.to_uppercase()))
}

fn str_lower(args: &[Value]) -> PyResult<Value> {
    Ok(Value::from(this(args)?.to_lowercase()))
}

fn str_strip(args: &[Value]) -> PyResult<Value> {
    let s = this(args)?;
    match args.get(1) {
        Some(Value::Str(chars)) => {
            let set: Vec<char> = chars.chars().collect();
            Ok(Value::from(s.trim_matches(|c| set.contains(&c))))
        }
        _ => Ok(Value::from(s.trim())),
    }
}

fn str_startswith(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Bool(this(args)?.starts_with(str_arg(args, 1, "startswith")?)))
}

fn str_endswith(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Bool(this(args)?.ends_with(str_arg(args, 1, "endswith")?)))
}

fn str_join(args: &[Value]) -> PyResult<Value> {
    let sep = this(args)?;
    let iterable = args
        .get(1)
        .ok_or_else(|| Exception::type_error("join() takes exactly one argument"))?;
    let mut parts = Vec::new();
    for (i, item) in protocol::collect_iterable(iterable)?.into_iter().enumerate() {
        match item {
            Value::Str(s) => parts.push(s),
            other => {
                return Err(Exception::type_error(format!(
                    "sequence item {i}: expected str instance, {} found",
                    other.type_name()
                )))
            }
        }
    }
    Ok(Value::from(parts.join(sep)))
}

fn str_split(args: &[Value]) -> PyResult<Value> {
    let s = this(args)?;
    let parts: Vec<Value> = match args.get(1) {
        Some(Value::Str(sep)) if sep.is_empty() => {
            return Err(Exception::value_error("empty separator"))
        }
        Some(Value::Str(sep)) => s.split(&**sep).map(Value::from).collect(),
        _ => s.split_whitespace().map(Value::from).collect(),
    };
    Ok(Value::list(parts))
}

fn str_replace(args: &[Value]) -> PyResult<Value> {
    let s = this(args)?;
    let from = str_arg(args, 1, "replace")?;
    let to = str_arg(args, 2, "replace")?;
    Ok(Value::from(s.replace(from, to)))
}

fn str_find(args: &[Value]) -> PyResult<Value> {
    let s = this(args)?;
    let needle = str_arg(args, 1, "find")?;
    Ok(Value::Int(match s.find(needle) {
        Some(byte) => s[..byte].chars().count() as i64,
        None => -1,
    }))
}

fn construct_str(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    match args {
        [] => Ok(Value::Str(Arc::from(""))),
        [value] => Ok(Value::from(protocol::to_str(value)?)),
        _ => Err(Exception::type_error("str() takes at most 1 argument")),
    }
}
