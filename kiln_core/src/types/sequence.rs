//! `list` and `tuple` methods.

use super::iterator::SequenceIterator;
use super::BuiltinTypes;
use crate::exception::{Exception, PyResult};
use crate::object::type_obj::TypeRef;
use crate::object::KeywordArgs;
use crate::protocol::{self, CompareOp};
use crate::value::{ListRef, Value};
use std::cmp::Ordering;
use std::sync::Arc;

pub(super) fn register(types: &BuiltinTypes) {
    let list = &types.list;
    list.define_native("__add__", list_add);
    list.define_native("__iadd__", list_iadd);
    list.define_native("__mul__", list_mul);
    list.define_native("__rmul__", list_mul);
    list.define_native("__len__", list_len);
    list.define_native("__getitem__", list_getitem);
    list.define_native("__setitem__", list_setitem);
    list.define_native("__delitem__", list_delitem);
    list.define_native("__contains__", list_contains);
    list.define_native("__iter__", list_iter);
    list.define_native("__eq__", list_eq);
    list.define_native("append", list_append);
    list.define_native("extend", list_extend);
    list.define_native("pop", list_pop);
    list.define_native("insert", list_insert);
    list.define_native("index", list_index);
    list.define_native("count", list_count);
    list.define_native("copy", list_copy);
    list.define_native("reverse", list_reverse);
    list.define_native("clear", list_clear);
    list.define_native("sort", list_sort);
    list.set_constructor(construct_list);

    let tuple = &types.tuple;
    tuple.define_native("__add__", tuple_add);
    tuple.define_native("__mul__", tuple_mul);
    tuple.define_native("__rmul__", tuple_mul);
    tuple.define_native("__len__", tuple_len);
    tuple.define_native("__getitem__", tuple_getitem);
    tuple.define_native("__contains__", tuple_contains);
    tuple.define_native("__iter__", tuple_iter);
    tuple.define_native("__eq__", tuple_eq);
    tuple.define_native("__lt__", tuple_lt);
    tuple.define_native("count", tuple_count);
    tuple.define_native("index", tuple_index);
    tuple.set_constructor(construct_tuple);
}

fn this_list(args: &[Value]) -> PyResult<&ListRef> {
    match args.first() {
        Some(Value::List(list)) => Ok(list),
        _ => Err(Exception::type_error("descriptor requires a 'list' object")),
    }
}

fn this_tuple(args: &[Value]) -> PyResult<&Arc<[Value]>> {
    match args.first() {
        Some(Value::Tuple(items)) => Ok(items),
        _ => Err(Exception::type_error("descriptor requires a 'tuple' object")),
    }
}

fn arg<'a>(args: &'a [Value], index: usize, method: &str) -> PyResult<&'a Value> {
    args.get(index)
        .ok_or_else(|| Exception::type_error(format!("{method}() missing required argument")))
}

fn repeat(items: &[Value], times: i64) -> Vec<Value> {
    let n = usize::try_from(times).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend_from_slice(items);
    }
    out
}

fn position(items: &[Value], needle: &Value) -> PyResult<Option<usize>> {
    for (i, item) in items.iter().enumerate() {
        if protocol::equals(item, needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn count(items: &[Value], needle: &Value) -> PyResult<Value> {
    let mut n = 0;
    for item in items {
        if protocol::equals(item, needle)? {
            n += 1;
        }
    }
    Ok(Value::Int(n))
}

fn sequences_equal(a: &[Value], b: &[Value]) -> PyResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !protocol::equals(x, y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn get_item(items: &[Value], index: &Value, kind: &str) -> PyResult<Value> {
    match index {
        Value::Slice(slice) => {
            let picked: Vec<Value> = protocol::slice_indices(slice, items.len())?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(if kind == "list" {
                Value::list(picked)
            } else {
                Value::tuple(picked)
            })
        }
        _ => {
            let i = protocol::sequence_index(index, items.len(), kind)?;
            Ok(items[i].clone())
        }
    }
}

// =============================================================================
// list
// =============================================================================

fn list_add(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    match args.get(1) {
        Some(Value::List(other)) => {
            let mut items = list.read().clone();
            items.extend(other.read().iter().cloned());
            Ok(Value::list(items))
        }
        _ => Ok(Value::NotImplemented),
    }
}

fn list_iadd(args: &[Value]) -> PyResult<Value> {
    list_extend(args)?;
    Ok(args[0].clone())
}

fn list_mul(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    match args.get(1).and_then(Value::as_int) {
        Some(n) => Ok(Value::list(repeat(&list.read(), n))),
        None => Ok(Value::NotImplemented),
    }
}

fn list_len(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Int(this_list(args)?.read().len() as i64))
}

fn list_getitem(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    let items = list.read();
    get_item(&items, arg(args, 1, "__getitem__")?, "list")
}

fn list_setitem(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    let index = arg(args, 1, "__setitem__")?;
    let value = arg(args, 2, "__setitem__")?.clone();
    let mut items = list.write();
    let i = protocol::sequence_index(index, items.len(), "list assignment")?;
    items[i] = value;
    Ok(Value::None)
}

fn list_delitem(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    let index = arg(args, 1, "__delitem__")?;
    let mut items = list.write();
    let i = protocol::sequence_index(index, items.len(), "list assignment")?;
    items.remove(i);
    Ok(Value::None)
}

fn list_contains(args: &[Value]) -> PyResult<Value> {
    let items = this_list(args)?.read().clone();
    Ok(Value::Bool(position(&items, arg(args, 1, "__contains__")?)?.is_some()))
}

fn list_iter(args: &[Value]) -> PyResult<Value> {
    Ok(SequenceIterator::over_list(Arc::clone(this_list(args)?)))
}

fn list_eq(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    match args.get(1) {
        Some(Value::List(other)) => {
            let (a, b) = (list.read().clone(), other.read().clone());
            Ok(Value::Bool(sequences_equal(&a, &b)?))
        }
        _ => Ok(Value::NotImplemented),
    }
}

fn list_append(args: &[Value]) -> PyResult<Value> {
    let item = arg(args, 1, "append")?.clone();
    this_list(args)?.write().push(item);
    Ok(Value::None)
}

fn list_extend(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    let items = protocol::collect_iterable(arg(args, 1, "extend")?)?;
    list.write().extend(items);
    Ok(Value::None)
}

fn list_pop(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    let mut items = list.write();
    if items.is_empty() {
        return Err(Exception::index_error("pop from empty list"));
    }
    let i = match args.get(1) {
        Some(index) => protocol::sequence_index(index, items.len(), "pop")?,
        None => items.len() - 1,
    };
    Ok(items.remove(i))
}

fn list_insert(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    let index = arg(args, 1, "insert")?
        .as_int()
        .ok_or_else(|| Exception::type_error("insert() index must be an integer"))?;
    let item = arg(args, 2, "insert")?.clone();
    let mut items = list.write();
    let len = items.len() as i64;
    let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
    items.insert(usize::try_from(at).unwrap_or(0), item);
    Ok(Value::None)
}

fn list_index(args: &[Value]) -> PyResult<Value> {
    let items = this_list(args)?.read().clone();
    let needle = arg(args, 1, "index")?;
    match position(&items, needle)? {
        Some(i) => Ok(Value::Int(i as i64)),
        None => Err(Exception::value_error(format!("{} is not in list", needle.repr()))),
    }
}

fn list_count(args: &[Value]) -> PyResult<Value> {
    let items = this_list(args)?.read().clone();
    count(&items, arg(args, 1, "count")?)
}

fn list_copy(args: &[Value]) -> PyResult<Value> {
    Ok(Value::list(this_list(args)?.read().clone()))
}

fn list_reverse(args: &[Value]) -> PyResult<Value> {
    this_list(args)?.write().reverse();
    Ok(Value::None)
}

fn list_clear(args: &[Value]) -> PyResult<Value> {
    this_list(args)?.write().clear();
    Ok(Value::None)
}

/// Stable sort using `<` from the protocol. The first comparison error aborts.
fn list_sort(args: &[Value]) -> PyResult<Value> {
    let list = this_list(args)?;
    let mut items = list.read().clone();
    let mut failure = None;
    items.sort_by(|a, b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        match protocol::compare(CompareOp::Lt, a, b).and_then(|v| protocol::truthy(&v)) {
            Ok(true) => Ordering::Less,
            Ok(false) => match protocol::compare(CompareOp::Lt, b, a)
                .and_then(|v| protocol::truthy(&v))
            {
                Ok(true) => Ordering::Greater,
                Ok(false) => Ordering::Equal,
                Err(e) => {
                    failure = Some(e);
                    Ordering::Equal
                }
            },
            Err(e) => {
                failure = Some(e);
                Ordering::Equal
            }
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    *list.write() = items;
    Ok(Value::None)
}

fn construct_list(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    match args {
        [] => Ok(Value::list(Vec::new())),
        [iterable] => Ok(Value::list(protocol::collect_iterable(iterable)?)),
        _ => Err(Exception::type_error("list expected at most 1 argument")),
    }
}

// =============================================================================
// tuple
// =============================================================================

fn tuple_add(args: &[Value]) -> PyResult<Value> {
    let items = this_tuple(args)?;
    match args.get(1) {
        Some(Value::Tuple(other)) => {
            let mut out = items.to_vec();
            out.extend(other.iter().cloned());
            Ok(Value::tuple(out))
        }
        _ => Ok(Value::NotImplemented),
    }
}

fn tuple_mul(args: &[Value]) -> PyResult<Value> {
    let items = this_tuple(args)?;
    match args.get(1).and_then(Value::as_int) {
        Some(n) => Ok(Value::tuple(repeat(items, n))),
        None => Ok(Value::NotImplemented),
    }
}

fn tuple_len(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Int(this_tuple(args)?.len() as i64))
}

fn tuple_getitem(args: &[Value]) -> PyResult<Value> {
    get_item(this_tuple(args)?, arg(args, 1, "__getitem__")?, "tuple")
}

fn tuple_contains(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Bool(
        position(this_tuple(args)?, arg(args, 1, "__contains__")?)?.is_some(),
    ))
}

fn tuple_iter(args: &[Value]) -> PyResult<Value> {
    Ok(SequenceIterator::over_tuple(Arc::clone(this_tuple(args)?)))
}

fn tuple_eq(args: &[Value]) -> PyResult<Value> {
    let items = this_tuple(args)?;
    match args.get(1) {
        Some(Value::Tuple(other)) => Ok(Value::Bool(sequences_equal(items, other)?)),
        _ => Ok(Value::NotImplemented),
    }
}

fn tuple_lt(args: &[Value]) -> PyResult<Value> {
    let items = this_tuple(args)?;
    let Some(Value::Tuple(other)) = args.get(1) else {
        return Ok(Value::NotImplemented);
    };
    for (a, b) in items.iter().zip(other.iter()) {
        if !protocol::equals(a, b)? {
            return protocol::compare(CompareOp::Lt, a, b);
        }
    }
    Ok(Value::Bool(items.len() < other.len()))
}

fn tuple_count(args: &[Value]) -> PyResult<Value> {
    count(this_tuple(args)?, arg(args, 1, "count")?)
}

fn tuple_index(args: &[Value]) -> PyResult<Value> {
    let needle = arg(args, 1, "index")?;
    match position(this_tuple(args)?, needle)? {
        Some(i) => Ok(Value::Int(i as i64)),
        None => Err(Exception::value_error("tuple.index(x): x not in tuple")),
    }
}

fn construct_tuple(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    match args {
        [] => Ok(Value::tuple(Vec::new())),
        [Value::Tuple(items)] => Ok(Value::Tuple(Arc::clone(items))),
        [iterable] => Ok(Value::tuple(protocol::collect_iterable(iterable)?)),
        _ => Err(Exception::type_error("tuple expected at most 1 argument")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn test_list_slice() {
        let list = Value::list(ints(&[0, 1, 2, 3, 4]));
        let slice = Value::Slice(Arc::new(crate::value::Slice {
            start: Value::Int(1),
            stop: Value::Int(4),
            step: Value::Int(2),
        }));
        assert_eq!(list_getitem(&[list, slice]).unwrap(), Value::list(ints(&[1, 3])));
    }

    #[test]
    fn test_negative_index() {
        let list = Value::list(ints(&[5, 6]));
        assert_eq!(list_getitem(&[list.clone(), Value::Int(-1)]).unwrap(), Value::Int(6));
        let err = list_getitem(&[list, Value::Int(2)]).unwrap_err();
        assert_eq!(err.to_string(), "IndexError: list index out of range");
    }

    #[test]
    fn test_pop_and_insert() {
        let list = Value::list(ints(&[1, 2, 3]));
        assert_eq!(list_pop(&[list.clone()]).unwrap(), Value::Int(3));
        list_insert(&[list.clone(), Value::Int(0), Value::Int(0)]).unwrap();
        assert_eq!(list, Value::list(ints(&[0, 1, 2])));
        assert!(list_pop(&[Value::list(vec![])]).is_err());
    }

    #[test]
    fn test_sort_uses_protocol() {
        let list = Value::list(ints(&[3, 1, 2]));
        list_sort(&[list.clone()]).unwrap();
        assert_eq!(list, Value::list(ints(&[1, 2, 3])));
        let mixed = Value::list(vec![Value::Int(1), Value::from("a")]);
        assert!(list_sort(&[mixed]).is_err());
    }

    #[test]
    fn test_tuple_ordering() {
        let a = Value::tuple(ints(&[1, 2]));
        let b = Value::tuple(ints(&[1, 3]));
        assert_eq!(tuple_lt(&[a.clone(), b.clone()]).unwrap(), Value::Bool(true));
        assert_eq!(tuple_lt(&[b, a]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_concat_declines_mismatch() {
        let list = Value::list(vec![]);
        assert!(list_add(&[list, Value::tuple(vec![])]).unwrap().is_not_implemented());
    }
}
