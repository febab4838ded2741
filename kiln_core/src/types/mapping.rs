//! `dict` and `set` methods.

use super::iterator::SequenceIterator;
use super::BuiltinTypes;
use crate::collections::{Dict, Set};
use crate::exception::{Exception, PyResult};
use crate::object::type_obj::TypeRef;
use crate::object::KeywordArgs;
use crate::protocol;
use crate::value::{DictRef, SetRef, Value};

pub(super) fn register(types: &BuiltinTypes) {
    let dict = &types.dict;
    dict.define_native("__getitem__", dict_getitem);
    dict.define_native("__setitem__", dict_setitem);
    dict.define_native("__delitem__", dict_delitem);
    dict.define_native("__contains__", dict_contains);
    dict.define_native("__len__", dict_len);
    dict.define_native("__iter__", dict_iter);
    dict.define_native("__eq__", dict_eq);
    dict.define_native("__or__", dict_or);
    dict.define_native("get", dict_get);
    dict.define_native("keys", dict_keys);
    dict.define_native("values", dict_values);
    dict.define_native("items", dict_items);
    dict.define_native("pop", dict_pop);
    dict.define_native("update", dict_update);
    dict.define_native("setdefault", dict_setdefault);
    dict.define_native("copy", dict_copy);
    dict.define_native("clear", dict_clear);
    dict.set_constructor(construct_dict);

    let set = &types.set;
    set.define_native("__contains__", set_contains);
    set.define_native("__len__", set_len);
    set.define_native("__iter__", set_iter);
    set.define_native("__eq__", set_eq);
    set.define_native("__or__", set_union);
    set.define_native("__and__", set_intersection);
    set.define_native("__sub__", set_difference);
    set.define_native("add", set_add);
    set.define_native("remove", set_remove);
    set.define_native("discard", set_discard);
    set.set_constructor(construct_set);
}

fn this_dict(args: &[Value]) -> PyResult<&DictRef> {
    match args.first() {
        Some(Value::Dict(d)) => Ok(d),
        _ => Err(Exception::type_error("descriptor requires a 'dict' object")),
    }
}

fn this_set(args: &[Value]) -> PyResult<&SetRef> {
    match args.first() {
        Some(Value::Set(s)) => Ok(s),
        _ => Err(Exception::type_error("descriptor requires a 'set' object")),
    }
}

fn arg<'a>(args: &'a [Value], index: usize, method: &str) -> PyResult<&'a Value> {
    args.get(index)
        .ok_or_else(|| Exception::type_error(format!("{method}() missing required argument")))
}

/// Merge `source` (a dict or an iterable of pairs) into `target`.
pub(crate) fn merge_into(target: &mut Dict, source: &Value) -> PyResult<()> {
    if let Value::Dict(other) = source {
        let entries: Vec<(Value, Value)> = other
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in entries {
            target.insert(k, v)?;
        }
        return Ok(());
    }
    for (i, pair) in protocol::collect_iterable(source)?.into_iter().enumerate() {
        let items = protocol::collect_iterable(&pair)?;
        let [key, value] = <[Value; 2]>::try_from(items).map_err(|items| {
            Exception::value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                items.len()
            ))
        })?;
        target.insert(key, value)?;
    }
    Ok(())
}

// =============================================================================
// dict
// =============================================================================

fn dict_getitem(args: &[Value]) -> PyResult<Value> {
    let key = arg(args, 1, "__getitem__")?;
    let found = this_dict(args)?.read().get(key)?;
    found.ok_or_else(|| Exception::key_error(key.clone()))
}

fn dict_setitem(args: &[Value]) -> PyResult<Value> {
    let key = arg(args, 1, "__setitem__")?.clone();
    let value = arg(args, 2, "__setitem__")?.clone();
    this_dict(args)?.write().insert(key, value)?;
    Ok(Value::None)
}

fn dict_delitem(args: &[Value]) -> PyResult<Value> {
    let key = arg(args, 1, "__delitem__")?;
    match this_dict(args)?.write().remove(key)? {
        Some(_) => Ok(Value::None),
        None => Err(Exception::key_error(key.clone())),
    }
}

fn dict_contains(args: &[Value]) -> PyResult<Value> {
    let key = arg(args, 1, "__contains__")?;
    Ok(Value::Bool(this_dict(args)?.read().contains(key)?))
}

fn dict_len(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Int(this_dict(args)?.read().len() as i64))
}

fn dict_iter(args: &[Value]) -> PyResult<Value> {
    Ok(SequenceIterator::value(this_dict(args)?.read().keys()))
}

fn dict_eq(args: &[Value]) -> PyResult<Value> {
    let dict = this_dict(args)?;
    match args.get(1) {
        Some(Value::Dict(other)) => Ok(Value::Bool(*dict.read() == *other.read())),
        _ => Ok(Value::NotImplemented),
    }
}

fn dict_or(args: &[Value]) -> PyResult<Value> {
    let mut merged = this_dict(args)?.read().clone();
    match args.get(1) {
        Some(other @ Value::Dict(_)) => {
            merge_into(&mut merged, other)?;
            Ok(Value::dict(merged))
        }
        _ => Ok(Value::NotImplemented),
    }
}

fn dict_get(args: &[Value]) -> PyResult<Value> {
    let key = arg(args, 1, "get")?;
    let found = this_dict(args)?.read().get(key)?;
    Ok(found.unwrap_or_else(|| args.get(2).cloned().unwrap_or(Value::None)))
}

fn dict_keys(args: &[Value]) -> PyResult<Value> {
    Ok(Value::list(this_dict(args)?.read().keys()))
}

fn dict_values(args: &[Value]) -> PyResult<Value> {
    Ok(Value::list(this_dict(args)?.read().values()))
}

fn dict_items(args: &[Value]) -> PyResult<Value> {
    let items = this_dict(args)?
        .read()
        .iter()
        .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
        .collect();
    Ok(Value::list(items))
}

fn dict_pop(args: &[Value]) -> PyResult<Value> {
    let key = arg(args, 1, "pop")?;
    match this_dict(args)?.write().remove(key)? {
        Some(v) => Ok(v),
        None => args
            .get(2)
            .cloned()
            .ok_or_else(|| Exception::key_error(key.clone())),
    }
}

fn dict_update(args: &[Value]) -> PyResult<Value> {
    let dict = this_dict(args)?;
    let mut updated = dict.read().clone();
    merge_into(&mut updated, arg(args, 1, "update")?)?;
    *dict.write() = updated;
    Ok(Value::None)
}

fn dict_setdefault(args: &[Value]) -> PyResult<Value> {
    let key = arg(args, 1, "setdefault")?;
    let default = args.get(2).cloned().unwrap_or(Value::None);
    let dict = this_dict(args)?;
    let mut guard = dict.write();
    match guard.get(key)? {
        Some(existing) => Ok(existing),
        None => {
            guard.insert(key.clone(), default.clone())?;
            Ok(default)
        }
    }
}

fn dict_copy(args: &[Value]) -> PyResult<Value> {
    Ok(Value::dict(this_dict(args)?.read().clone()))
}

fn dict_clear(args: &[Value]) -> PyResult<Value> {
    this_dict(args)?.write().clear();
    Ok(Value::None)
}

fn construct_dict(_ty: &TypeRef, args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
    let mut dict = Dict::new();
    match args {
        [] => {}
        [source] => merge_into(&mut dict, source)?,
        _ => return Err(Exception::type_error("dict expected at most 1 argument")),
    }
    for (name, value) in keywords {
        dict.insert(Value::Str(name.clone()), value.clone())?;
    }
    Ok(Value::dict(dict))
}

// =============================================================================
// set
// =============================================================================

fn set_contains(args: &[Value]) -> PyResult<Value> {
    let item = arg(args, 1, "__contains__")?;
    Ok(Value::Bool(this_set(args)?.read().contains(item)?))
}

fn set_len(args: &[Value]) -> PyResult<Value> {
    Ok(Value::Int(this_set(args)?.read().len() as i64))
}

fn set_iter(args: &[Value]) -> PyResult<Value> {
    Ok(SequenceIterator::value(
        this_set(args)?.read().iter().cloned().collect(),
    ))
}

fn set_eq(args: &[Value]) -> PyResult<Value> {
    let set = this_set(args)?;
    match args.get(1) {
        Some(Value::Set(other)) => Ok(Value::Bool(*set.read() == *other.read())),
        _ => Ok(Value::NotImplemented),
    }
}

fn other_set(args: &[Value]) -> Option<Set> {
    match args.get(1) {
        Some(Value::Set(other)) => Some(other.read().clone()),
        _ => None,
    }
}

fn set_union(args: &[Value]) -> PyResult<Value> {
    let Some(other) = other_set(args) else {
        return Ok(Value::NotImplemented);
    };
    let mut out = this_set(args)?.read().clone();
    for item in other.iter() {
        out.insert(item.clone())?;
    }
    Ok(Value::set(out))
}

fn set_intersection(args: &[Value]) -> PyResult<Value> {
    let Some(other) = other_set(args) else {
        return Ok(Value::NotImplemented);
    };
    let mut out = Set::new();
    for item in this_set(args)?.read().iter() {
        if other.contains(item)? {
            out.insert(item.clone())?;
        }
    }
    Ok(Value::set(out))
}

fn set_difference(args: &[Value]) -> PyResult<Value> {
    let Some(other) = other_set(args) else {
        return Ok(Value::NotImplemented);
    };
    let mut out = Set::new();
    for item in this_set(args)?.read().iter() {
        if !other.contains(item)? {
            out.insert(item.clone())?;
        }
    }
    Ok(Value::set(out))
}

fn set_add(args: &[Value]) -> PyResult<Value> {
    let item = arg(args, 1, "add")?.clone();
    this_set(args)?.write().insert(item)?;
    Ok(Value::None)
}

fn set_remove(args: &[Value]) -> PyResult<Value> {
    let item = arg(args, 1, "remove")?;
    if this_set(args)?.write().remove(item)? {
        Ok(Value::None)
    } else {
        Err(Exception::key_error(item.clone()))
    }
}

fn set_discard(args: &[Value]) -> PyResult<Value> {
    let item = arg(args, 1, "discard")?;
    this_set(args)?.write().remove(item)?;
    Ok(Value::None)
}

fn construct_set(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    let mut set = Set::new();
    match args {
        [] => {}
        [iterable] => {
            for item in protocol::collect_iterable(iterable)? {
                set.insert(item)?;
            }
        }
        _ => return Err(Exception::type_error("set expected at most 1 argument")),
    }
    Ok(Value::set(set))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        let mut dict = Dict::new();
        dict.insert(Value::from("a"), Value::Int(1)).unwrap();
        dict.insert(Value::from("b"), Value::Int(2)).unwrap();
        Value::dict(dict)
    }

    #[test]
    fn test_missing_key() {
        let err = dict_getitem(&[sample(), Value::from("z")]).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'z'");
    }

    #[test]
    fn test_get_with_default() {
        assert_eq!(
            dict_get(&[sample(), Value::from("z"), Value::Int(0)]).unwrap(),
            Value::Int(0)
        );
        assert_eq!(dict_get(&[sample(), Value::from("a")]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_items_keep_order() {
        let items = dict_items(&[sample()]).unwrap();
        assert_eq!(items.repr(), "[('a', 1), ('b', 2)]");
    }

    #[test]
    fn test_update_from_pairs() {
        let d = sample();
        let pairs = Value::list(vec![Value::tuple(vec![Value::from("c"), Value::Int(3)])]);
        dict_update(&[d.clone(), pairs]).unwrap();
        assert_eq!(dict_len(&[d]).unwrap(), Value::Int(3));
        let bad = Value::list(vec![Value::tuple(vec![Value::Int(1)])]);
        assert!(dict_update(&[sample(), bad]).is_err());
    }

    #[test]
    fn test_set_algebra() {
        let a = construct_set(
            &crate::types::builtin_types().set,
            &[Value::list(vec![Value::Int(1), Value::Int(2)])],
            &KeywordArgs::default(),
        )
        .unwrap();
        let b = construct_set(
            &crate::types::builtin_types().set,
            &[Value::list(vec![Value::Int(2), Value::Int(3)])],
            &KeywordArgs::default(),
        )
        .unwrap();
        assert_eq!(set_len(&[set_union(&[a.clone(), b.clone()]).unwrap()]).unwrap(), Value::Int(3));
        assert_eq!(set_intersection(&[a.clone(), b.clone()]).unwrap().repr(), "{2}");
        assert_eq!(set_difference(&[a, b]).unwrap().repr(), "{1}");
    }
}
