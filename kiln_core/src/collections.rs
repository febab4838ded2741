//! Hash-keyed storage for `dict` and `set`.
//!
//! Keys are normalized into [`HashKey`] so that values which compare equal
//! also hash equal: `1`, `1.0` and `True` all map to `HashKey::Int(1)`.
//! Both containers keep insertion order.

use crate::exception::{Exception, PyResult};
use crate::value::Value;
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use std::sync::Arc;

/// Normalized hashing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    /// `None`.
    None,
    /// Integral numbers of any numeric type.
    Int(i64),
    /// Non-integral floats, by bit pattern.
    Float(u64),
    /// Strings.
    Str(Arc<str>),
    /// Tuples of hashable values.
    Tuple(Box<[HashKey]>),
    /// Type objects.
    Type(u32),
    /// Everything else hashes by identity.
    Identity(usize),
}

impl HashKey {
    /// Compute the key for `value`, rejecting unhashable types.
    pub fn from_value(value: &Value) -> PyResult<Self> {
        Ok(match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => HashKey::Str(Arc::clone(s)),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(HashKey::from_value)
                    .collect::<PyResult<Vec<_>>>()?
                    .into_boxed_slice(),
            ),
            Value::Type(t) => HashKey::Type(t.id().raw()),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => {
                return Err(Exception::type_error(format!(
                    "unhashable type: '{}'",
                    value.type_name()
                )))
            }
            other => HashKey::Identity(other.identity()),
        })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_key(f: f64) -> HashKey {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        HashKey::Int(f as i64)
    } else {
        HashKey::Float(f.to_bits())
    }
}

// =============================================================================
// Dict
// =============================================================================

/// Insertion-ordered mapping.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: IndexMap<HashKey, (Value, Value), FxBuildHasher>,
}

impl Dict {
    /// Empty dict.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dict is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a key.
    pub fn get(&self, key: &Value) -> PyResult<Option<Value>> {
        let hk = key.hash_key()?;
        Ok(self.entries.get(&hk).map(|(_, v)| v.clone()))
    }

    /// Look up a string key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<Value> {
        self.entries
            .get(&HashKey::Str(Arc::from(key)))
            .map(|(_, v)| v.clone())
    }

    /// Insert or replace. The original key object is kept on replace.
    pub fn insert(&mut self, key: Value, value: Value) -> PyResult<()> {
        let hk = key.hash_key()?;
        match self.entries.get_mut(&hk) {
            Some(entry) => entry.1 = value,
            None => {
                self.entries.insert(hk, (key, value));
            }
        }
        Ok(())
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &Value) -> PyResult<Option<Value>> {
        let hk = key.hash_key()?;
        Ok(self.entries.shift_remove(&hk).map(|(_, v)| v))
    }

    /// Membership test.
    pub fn contains(&self, key: &Value) -> PyResult<bool> {
        Ok(self.entries.contains_key(&key.hash_key()?))
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    /// Keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    /// Values in insertion order.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(hk, (_, v))| other.entries.get(hk).is_some_and(|(_, ov)| ov == v))
    }
}

// =============================================================================
// Set
// =============================================================================

/// Insertion-ordered set.
#[derive(Debug, Clone, Default)]
pub struct Set {
    entries: IndexMap<HashKey, Value, FxBuildHasher>,
}

impl Set {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a member. Returns whether it was new.
    pub fn insert(&mut self, value: Value) -> PyResult<bool> {
        let hk = value.hash_key()?;
        if self.entries.contains_key(&hk) {
            return Ok(false);
        }
        self.entries.insert(hk, value);
        Ok(true)
    }

    /// Remove a member. Returns whether it was present.
    pub fn remove(&mut self, value: &Value) -> PyResult<bool> {
        Ok(self.entries.shift_remove(&value.hash_key()?).is_some())
    }

    /// Membership test.
    pub fn contains(&self, value: &Value) -> PyResult<bool> {
        Ok(self.entries.contains_key(&value.hash_key()?))
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.entries.keys().all(|k| other.entries.contains_key(k))
    }
}

impl FromIterator<Value> for Set {
    /// Collects hashable values; unhashable ones are skipped.
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = Set::new();
        for value in iter {
            let _ = set.insert(value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_unify() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::from("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::from("float")).unwrap();
        dict.insert(Value::Bool(true), Value::from("bool")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::Int(1)).unwrap(), Some(Value::from("bool")));
        // The first key object is kept.
        assert_eq!(dict.keys()[0].type_name(), "int");
    }

    #[test]
    fn test_unhashable_key() {
        let mut dict = Dict::new();
        let err = dict.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: unhashable type: 'list'");
    }

    #[test]
    fn test_tuple_keys() {
        let mut dict = Dict::new();
        let key = Value::tuple(vec![Value::Int(1), Value::from("a")]);
        dict.insert(key.clone(), Value::Int(9)).unwrap();
        let lookup = Value::tuple(vec![Value::Float(1.0), Value::from("a")]);
        assert_eq!(dict.get(&lookup).unwrap(), Some(Value::Int(9)));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut dict = Dict::new();
        for i in 0..4 {
            dict.insert(Value::Int(i), Value::Int(i * 10)).unwrap();
        }
        dict.remove(&Value::Int(1)).unwrap();
        assert_eq!(dict.keys(), vec![Value::Int(0), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_set_membership() {
        let mut set = Set::new();
        assert!(set.insert(Value::from("a")).unwrap());
        assert!(!set.insert(Value::from("a")).unwrap());
        assert!(set.contains(&Value::from("a")).unwrap());
        assert!(set.remove(&Value::from("a")).unwrap());
        assert!(set.is_empty());
    }

    #[test]
    fn test_dict_equality_ignores_order() {
        let mut a = Dict::new();
        a.insert(Value::Int(1), Value::Int(2)).unwrap();
        a.insert(Value::Int(3), Value::Int(4)).unwrap();
        let mut b = Dict::new();
        b.insert(Value::Int(3), Value::Int(4)).unwrap();
        b.insert(Value::Int(1), Value::Int(2)).unwrap();
        assert_eq!(a, b);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_dict_keeps_last_write_and_first_order(keys in prop::collection::vec(-20i64..20, 0..40)) {
                let mut dict = Dict::new();
                for (i, k) in keys.iter().enumerate() {
                    dict.insert(Value::Int(*k), Value::Int(i as i64)).unwrap();
                }
                let mut first_seen = Vec::new();
                for k in &keys {
                    if !first_seen.contains(k) {
                        first_seen.push(*k);
                    }
                }
                let expected: Vec<Value> = first_seen.iter().map(|k| Value::Int(*k)).collect();
                prop_assert_eq!(dict.keys(), expected);
                for k in &first_seen {
                    let last = keys.iter().rposition(|x| x == k).unwrap();
                    prop_assert_eq!(dict.get(&Value::Int(*k)).unwrap(), Some(Value::Int(last as i64)));
                }
            }

            #[test]
            fn test_int_and_float_keys_agree(k in -1_000_000i64..1_000_000) {
                let a = HashKey::from_value(&Value::Int(k)).unwrap();
                let b = HashKey::from_value(&Value::Float(k as f64)).unwrap();
                prop_assert_eq!(a, b);
            }
        }
    }
}
