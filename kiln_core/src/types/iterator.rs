//! Builtin iterators and `range`.

use super::{builtin_types, BuiltinTypes};
use crate::exception::{Exception, PyResult};
use crate::object::type_obj::TypeRef;
use crate::object::{downcast, KeywordArgs, NativeObject};
use crate::protocol;
use crate::value::{ListRef, Value};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

pub(super) fn register(types: &BuiltinTypes) {
    types.iterator.define_native("__iter__", iter_self);
    types.iterator.define_native("__next__", iter_next);

    types.range.define_native("__iter__", range_iter);
    types.range.define_native("__len__", range_len);
    types.range.define_native("__contains__", range_contains);
    types.range.define_native("__getitem__", range_getitem);
    types.range.set_constructor(construct_range);
}

// =============================================================================
// Sequence iterator
// =============================================================================

enum Source {
    Snapshot(Arc<[Value]>),
    List(ListRef),
}

/// Iterator over a tuple snapshot or a live list.
pub struct SequenceIterator {
    source: Source,
    index: Mutex<usize>,
}

impl SequenceIterator {
    /// Iterate over a fixed sequence of values.
    #[must_use]
    pub fn value(items: Vec<Value>) -> Value {
        Self::over_tuple(Arc::from(items))
    }

    /// Iterate over a tuple without copying it.
    #[must_use]
    pub fn over_tuple(items: Arc<[Value]>) -> Value {
        Value::Object(Arc::new(Self {
            source: Source::Snapshot(items),
            index: Mutex::new(0),
        }))
    }

    /// Iterate over a list, observing appends made during iteration.
    #[must_use]
    pub fn over_list(list: ListRef) -> Value {
        Value::Object(Arc::new(Self {
            source: Source::List(list),
            index: Mutex::new(0),
        }))
    }

    /// Next item, `None` when exhausted.
    pub fn next_item(&self) -> Option<Value> {
        let mut index = self.index.lock();
        let item = match &self.source {
            Source::Snapshot(items) => items.get(*index).cloned(),
            Source::List(list) => list.read().get(*index).cloned(),
        };
        if item.is_some() {
            *index += 1;
        }
        item
    }
}

impl NativeObject for SequenceIterator {
    fn type_ref(&self) -> TypeRef {
        builtin_types().iterator.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        "<iterator object>".to_string()
    }
}

// =============================================================================
// range
// =============================================================================

/// `range(start, stop, step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// First value.
    pub start: i64,
    /// Exclusive bound.
    pub stop: i64,
    /// Non-zero step.
    pub step: i64,
}

impl Range {
    /// Create a range, rejecting a zero step.
    pub fn new(start: i64, stop: i64, step: i64) -> PyResult<Self> {
        if step == 0 {
            return Err(Exception::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    /// Number of values produced.
    #[must_use]
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (i128::from(self.start), i128::from(self.stop), i128::from(self.step))
        } else {
            (i128::from(self.stop), i128::from(self.start), -i128::from(self.step))
        };
        if lo >= hi {
            0
        } else {
            usize::try_from((hi - lo - 1) / step + 1).unwrap_or(usize::MAX)
        }
    }

    /// Whether the range is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at position `i`.
    #[must_use]
    pub fn at(&self, i: usize) -> i64 {
        let offset = i64::try_from(i).unwrap_or(i64::MAX);
        self.start.saturating_add(offset.saturating_mul(self.step))
    }

    /// Membership test for integers.
    #[must_use]
    pub fn contains(&self, v: i64) -> bool {
        let in_bounds = if self.step > 0 {
            v >= self.start && v < self.stop
        } else {
            v <= self.start && v > self.stop
        };
        in_bounds && (i128::from(v) - i128::from(self.start)) % i128::from(self.step) == 0
    }

    /// Wrap as a value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(Arc::new(self))
    }
}

impl NativeObject for Range {
    fn type_ref(&self) -> TypeRef {
        builtin_types().range.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        if self.step == 1 {
            format!("range({}, {})", self.start, self.stop)
        } else {
            format!("range({}, {}, {})", self.start, self.stop, self.step)
        }
    }
}

/// Iterator over a [`Range`].
pub struct RangeIterator {
    range: Range,
    position: Mutex<usize>,
}

impl RangeIterator {
    /// Next value, `None` when exhausted.
    pub fn next_item(&self) -> Option<Value> {
        let mut position = self.position.lock();
        if *position >= self.range.len() {
            return None;
        }
        let value = self.range.at(*position);
        *position += 1;
        Some(Value::Int(value))
    }
}

impl NativeObject for RangeIterator {
    fn type_ref(&self) -> TypeRef {
        builtin_types().iterator.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        "<range_iterator object>".to_string()
    }
}

fn this_range(args: &[Value]) -> PyResult<Range> {
    args.first()
        .and_then(downcast::<Range>)
        .copied()
        .ok_or_else(|| Exception::type_error("descriptor requires a 'range' object"))
}

fn range_iter(args: &[Value]) -> PyResult<Value> {
    let range = this_range(args)?;
    Ok(Value::Object(Arc::new(RangeIterator {
        range,
        position: Mutex::new(0),
    })))
}

fn range_len(args: &[Value]) -> PyResult<Value> {
    let len = this_range(args)?.len();
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|_| Exception::overflow("range too large"))
}

fn range_contains(args: &[Value]) -> PyResult<Value> {
    let range = this_range(args)?;
    Ok(Value::Bool(
        args.get(1)
            .and_then(Value::as_int)
            .is_some_and(|v| range.contains(v)),
    ))
}

fn range_getitem(args: &[Value]) -> PyResult<Value> {
    let range = this_range(args)?;
    let index = args
        .get(1)
        .ok_or_else(|| Exception::type_error("__getitem__ expected 1 argument"))?;
    let i = protocol::sequence_index(index, range.len(), "range object")?;
    Ok(Value::Int(range.at(i)))
}

fn construct_range(_ty: &TypeRef, args: &[Value], _kw: &KeywordArgs) -> PyResult<Value> {
    let ints = args
        .iter()
        .map(|a| {
            a.as_int().ok_or_else(|| {
                Exception::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    a.type_name()
                ))
            })
        })
        .collect::<PyResult<Vec<i64>>>()?;
    let range = match ints.as_slice() {
        [stop] => Range::new(0, *stop, 1)?,
        [start, stop] => Range::new(*start, *stop, 1)?,
        [start, stop, step] => Range::new(*start, *stop, *step)?,
        _ => {
            return Err(Exception::type_error(format!(
                "range expected at most 3 arguments, got {}",
                args.len()
            )))
        }
    };
    Ok(range.into_value())
}

// =============================================================================
// Iterator protocol
// =============================================================================

fn iter_self(args: &[Value]) -> PyResult<Value> {
    args.first()
        .cloned()
        .ok_or_else(|| Exception::type_error("__iter__ expected a receiver"))
}

fn iter_next(args: &[Value]) -> PyResult<Value> {
    let this = args
        .first()
        .ok_or_else(|| Exception::type_error("__next__ expected a receiver"))?;
    let item = if let Some(it) = downcast::<SequenceIterator>(this) {
        it.next_item()
    } else if let Some(it) = downcast::<RangeIterator>(this) {
        it.next_item()
    } else {
        return Err(Exception::type_error(format!(
            "'{}' object is not an iterator",
            this.type_name()
        )));
    };
    item.ok_or_else(|| Exception::stop_iteration(Value::None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len() {
        assert_eq!(Range::new(0, 5, 1).unwrap().len(), 5);
        assert_eq!(Range::new(0, 5, 2).unwrap().len(), 3);
        assert_eq!(Range::new(5, 0, -1).unwrap().len(), 5);
        assert_eq!(Range::new(5, 0, 1).unwrap().len(), 0);
        assert!(Range::new(0, 1, 0).is_err());
    }

    #[test]
    fn test_range_contains() {
        let r = Range::new(1, 10, 3).unwrap();
        assert!(r.contains(4));
        assert!(!r.contains(5));
        assert!(!r.contains(10));
    }

    #[test]
    fn test_list_iterator_sees_appends() {
        let list = Value::list(vec![Value::Int(1)]);
        let Value::List(storage) = &list else { unreachable!() };
        let it = SequenceIterator::over_list(storage.clone());
        let first = iter_next(std::slice::from_ref(&it)).unwrap();
        assert_eq!(first, Value::Int(1));
        storage.write().push(Value::Int(2));
        assert_eq!(iter_next(std::slice::from_ref(&it)).unwrap(), Value::Int(2));
        let stop = iter_next(std::slice::from_ref(&it)).unwrap_err();
        assert!(stop.is_instance(&builtin_types().stop_iteration));
    }

    #[test]
    fn test_range_iteration() {
        let range = Range::new(3, 0, -1).unwrap().into_value();
        let values = protocol::collect_iterable(&range).unwrap();
        assert_eq!(values, vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
    }
}
