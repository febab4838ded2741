//! Runtime values.
//!
//! `Value` is a tagged union over the builtin types plus two open-ended
//! variants: `Function` (anything implementing [`Callable`]) and `Object`
//! (anything implementing [`NativeObject`]). Cloning a value is at most one
//! reference-count increment.
//!
//! `PartialEq` on `Value` is structural equality for builtin data and
//! identity for everything else. Language-level `==` goes through
//! [`protocol::compare`](crate::protocol::compare).

use crate::collections::{Dict, HashKey, Set};
use crate::exception::{Exception, PyResult};
use crate::object::cell::Cell;
use crate::object::type_obj::TypeRef;
use crate::object::{Callable, KeywordArgs, NativeObject};
use crate::protocol;
use crate::types::builtin_types;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Shared mutable list storage.
pub type ListRef = Arc<RwLock<Vec<Value>>>;
/// Shared mutable dict storage.
pub type DictRef = Arc<RwLock<Dict>>;
/// Shared mutable set storage.
pub type SetRef = Arc<RwLock<Set>>;

/// A `slice(start, stop, step)` object.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    /// Start bound or `None`.
    pub start: Value,
    /// Stop bound or `None`.
    pub stop: Value,
    /// Step or `None`.
    pub step: Value,
}

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    /// `None`.
    None,
    /// `NotImplemented`, returned by binary dunders that decline an operand.
    NotImplemented,
    /// `bool`.
    Bool(bool),
    /// `int`, limited to 64 bits. Overflow raises `OverflowError`.
    Int(i64),
    /// `float`.
    Float(f64),
    /// `str`.
    Str(Arc<str>),
    /// `tuple`.
    Tuple(Arc<[Value]>),
    /// `list`.
    List(ListRef),
    /// `dict`, insertion ordered.
    Dict(DictRef),
    /// `set`, insertion ordered.
    Set(SetRef),
    /// `slice`.
    Slice(Arc<Slice>),
    /// Closure cell, as pushed by `LOAD_CLOSURE`.
    Cell(Arc<Cell>),
    /// A type object.
    Type(TypeRef),
    /// An exception instance.
    Exception(Exception),
    /// Any callable.
    Function(Arc<dyn Callable>),
    /// Any other heap object.
    Object(Arc<dyn NativeObject>),
}

impl Value {
    /// Build a list value.
    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    /// Build a tuple value.
    #[must_use]
    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    /// Build a dict value.
    #[must_use]
    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Arc::new(RwLock::new(dict)))
    }

    /// Build a set value.
    #[must_use]
    pub fn set(set: Set) -> Self {
        Value::Set(Arc::new(RwLock::new(set)))
    }

    /// Runtime type.
    #[must_use]
    pub fn type_of(&self) -> TypeRef {
        let types = builtin_types();
        match self {
            Value::None => types.none.clone(),
            Value::NotImplemented => types.not_implemented.clone(),
            Value::Bool(_) => types.bool.clone(),
            Value::Int(_) => types.int.clone(),
            Value::Float(_) => types.float.clone(),
            Value::Str(_) => types.str.clone(),
            Value::Tuple(_) => types.tuple.clone(),
            Value::List(_) => types.list.clone(),
            Value::Dict(_) => types.dict.clone(),
            Value::Set(_) => types.set.clone(),
            Value::Slice(_) => types.slice.clone(),
            Value::Cell(_) => types.cell.clone(),
            Value::Type(_) => types.type_.clone(),
            Value::Exception(e) => e.type_ref().clone(),
            Value::Function(f) => f.type_ref(),
            Value::Object(o) => o.type_ref(),
        }
    }

    /// Name of the runtime type.
    #[must_use]
    pub fn type_name(&self) -> String {
        self.type_of().name().to_string()
    }

    /// `isinstance(self, ty)`.
    #[must_use]
    pub fn is_instance(&self, ty: &TypeRef) -> bool {
        self.type_of().is_subtype_of(ty)
    }

    /// Whether this is `None`.
    #[inline]
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Whether this is `NotImplemented`.
    #[inline]
    #[must_use]
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Value::NotImplemented)
    }

    /// Integer view of `int` and `bool`.
    #[inline]
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of `float`, `int` and `bool`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    /// String view of `str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Identity comparison (`is`).
    #[must_use]
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::NotImplemented, Value::NotImplemented) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::Slice(a), Value::Slice(b)) => Arc::ptr_eq(a, b),
            (Value::Cell(a), Value::Cell(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a.id() == b.id(),
            (Value::Exception(a), Value::Exception(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            (Value::Object(a), Value::Object(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            _ => false,
        }
    }

    /// Address used for identity hashing of reference values.
    #[must_use]
    pub fn identity(&self) -> usize {
        match self {
            Value::Tuple(t) => Arc::as_ptr(t).cast::<()>() as usize,
            Value::List(l) => Arc::as_ptr(l) as usize,
            Value::Dict(d) => Arc::as_ptr(d) as usize,
            Value::Set(s) => Arc::as_ptr(s) as usize,
            Value::Slice(s) => Arc::as_ptr(s) as usize,
            Value::Cell(c) => Arc::as_ptr(c) as usize,
            Value::Type(t) => Arc::as_ptr(t) as usize,
            Value::Exception(e) => e.addr(),
            Value::Function(f) => Arc::as_ptr(f).cast::<()>() as usize,
            Value::Object(o) => Arc::as_ptr(o).cast::<()>() as usize,
            Value::Str(s) => Arc::as_ptr(s).cast::<u8>() as usize,
            _ => 0,
        }
    }

    /// Key used for dict and set membership.
    pub fn hash_key(&self) -> PyResult<HashKey> {
        HashKey::from_value(self)
    }

    /// Call this value with positional arguments.
    pub fn call(&self, args: &[Value]) -> PyResult<Value> {
        protocol::call(self, args, &KeywordArgs::default())
    }

    /// `repr(self)` for builtin data; native objects use their own fallback.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::NotImplemented => "NotImplemented".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote_str(s),
            Value::Tuple(items) => {
                if items.len() == 1 {
                    format!("({},)", items[0].repr())
                } else {
                    format!("({})", join_reprs(items.iter()))
                }
            }
            Value::List(items) => format!("[{}]", join_reprs(items.read().iter())),
            Value::Dict(dict) => {
                let dict = dict.read();
                let body: Vec<String> = dict
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", body.join(", "))
            }
            Value::Set(set) => {
                let set = set.read();
                if set.is_empty() {
                    "set()".to_string()
                } else {
                    format!("{{{}}}", join_reprs(set.iter()))
                }
            }
            Value::Slice(s) => format!(
                "slice({}, {}, {})",
                s.start.repr(),
                s.stop.repr(),
                s.step.repr()
            ),
            Value::Cell(c) => format!("{c:?}"),
            Value::Type(t) => format!("<class '{}'>", t.name()),
            Value::Exception(e) => format!("{e:?}"),
            Value::Function(f) => format!("<function {}>", f.name()),
            Value::Object(o) => o.repr(),
        }
    }

    /// `str(self)` for builtin data.
    #[must_use]
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message(),
            other => other.repr(),
        }
    }
}

fn join_reprs<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items.map(Value::repr).collect::<Vec<_>>().join(", ")
}

/// Quote a string the way `repr` does.
#[must_use]
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Format a float the way `repr(float)` does.
#[must_use]
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{f:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp:0>2}"),
            Some((mantissa, exp)) => format!("{mantissa}e-{:0>2}", &exp[1..]),
            None => formatted,
        };
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Arc::ptr_eq(a, b) || *a.read() == *b.read()
            }
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Slice(a), Value::Slice(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (a, b) if a.as_int().is_some() && b.as_int().is_some() => a.as_int() == b.as_int(),
            (a, b) if a.as_float().is_some() && b.as_float().is_some() => {
                a.as_float() == b.as_float()
            }
            (a, b) => a.is(b),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Exception> for Value {
    fn from(e: Exception) -> Self {
        Value::Exception(e)
    }
}

impl From<TypeRef> for Value {
    fn from(t: TypeRef) -> Self {
        Value::Type(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_of_builtins() {
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::Bool(true).type_name(), "bool");
        assert_eq!(Value::from("x").type_name(), "str");
        assert_eq!(Value::None.type_name(), "NoneType");
        assert_eq!(Value::tuple(vec![]).type_name(), "tuple");
    }

    #[test]
    fn test_bool_is_int_subtype() {
        assert!(Value::Bool(true).is_instance(&builtin_types().int));
        assert!(!Value::Int(1).is_instance(&builtin_types().bool));
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(Value::Int(1), Value::Bool(true));
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Float(2.5));
        assert_ne!(Value::Int(1), Value::from("1"));
    }

    #[test]
    fn test_repr() {
        assert_eq!(Value::from("it's").repr(), "\"it's\"");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::from("a")]).repr(),
            "[1, 'a']"
        );
        assert_eq!(Value::Float(3.0).repr(), "3.0");
        assert_eq!(Value::Float(0.5).repr(), "0.5");
        assert_eq!(Value::Float(1e20).repr(), "1e+20");
        assert_eq!(Value::Float(f64::INFINITY).repr(), "inf");
    }

    #[test]
    fn test_list_equality_is_structural() {
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(a, b);
        assert!(!a.is(&b));
        assert!(a.is(&a.clone()));
    }
}
