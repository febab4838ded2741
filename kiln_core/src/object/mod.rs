//! Object model traits.
//!
//! - [`Callable`]: the general call convention shared by native functions,
//!   translated units and overload dispatchers.
//! - [`NativeObject`]: any heap value that is not one of the builtin
//!   `Value` variants (iterators, generators, ranges, instances).

pub mod cell;
pub mod instance;
pub mod type_obj;

use crate::exception::{Exception, PyResult};
use crate::types::builtin_types;
use crate::value::Value;
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use type_obj::{Method, TypeRef};

/// Keyword arguments in call order.
pub type KeywordArgs = IndexMap<Arc<str>, Value, FxBuildHasher>;

// =============================================================================
// Callable
// =============================================================================

/// The uniform call convention.
///
/// `receiver` is the bound `self` for instance calls. Callables that do not
/// take a receiver ignore it.
pub trait Callable: Send + Sync {
    /// Name used in error messages and reprs.
    fn name(&self) -> &str;

    /// Invoke with positional arguments, keyword arguments and an optional receiver.
    fn invoke(
        &self,
        positional: &[Value],
        keywords: &KeywordArgs,
        receiver: Option<&Value>,
    ) -> PyResult<Value>;

    /// Runtime type of the callable value.
    fn type_ref(&self) -> TypeRef {
        builtin_types().function.clone()
    }

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Signature of a native free function.
pub type NativeFn = fn(&[Value], &KeywordArgs) -> PyResult<Value>;

/// A builtin function backed by a Rust fn pointer.
pub struct NativeFunction {
    name: Arc<str>,
    func: NativeFn,
}

impl NativeFunction {
    /// Wrap a native function as a value.
    #[must_use]
    pub fn value(name: &str, func: NativeFn) -> Value {
        Value::Function(Arc::new(Self {
            name: Arc::from(name),
            func,
        }))
    }
}

impl Callable for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        positional: &[Value],
        keywords: &KeywordArgs,
        _receiver: Option<&Value>,
    ) -> PyResult<Value> {
        (self.func)(positional, keywords)
    }

    fn type_ref(&self) -> TypeRef {
        builtin_types().builtin_function.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A method bound to its receiver.
pub struct BoundMethod {
    receiver: Value,
    name: Arc<str>,
    method: Method,
}

impl BoundMethod {
    /// Bind `method` to `receiver`.
    #[must_use]
    pub fn new(receiver: Value, name: &str, method: Method) -> Self {
        Self {
            receiver,
            name: Arc::from(name),
            method,
        }
    }

    /// The bound receiver.
    #[must_use]
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }
}

impl Callable for BoundMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        positional: &[Value],
        keywords: &KeywordArgs,
        _receiver: Option<&Value>,
    ) -> PyResult<Value> {
        self.method
            .call_with_keywords(&self.receiver, positional, keywords)
    }

    fn type_ref(&self) -> TypeRef {
        builtin_types().method.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A callable stored as a value inside an object, bound to that object on lookup.
pub struct BoundCallable {
    receiver: Value,
    target: Arc<dyn Callable>,
}

impl BoundCallable {
    /// Bind `target` to `receiver`.
    #[must_use]
    pub fn new(receiver: Value, target: Arc<dyn Callable>) -> Self {
        Self { receiver, target }
    }
}

impl Callable for BoundCallable {
    fn name(&self) -> &str {
        self.target.name()
    }

    fn invoke(
        &self,
        positional: &[Value],
        keywords: &KeywordArgs,
        _receiver: Option<&Value>,
    ) -> PyResult<Value> {
        self.target.invoke(positional, keywords, Some(&self.receiver))
    }

    fn type_ref(&self) -> TypeRef {
        builtin_types().method.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Native Objects
// =============================================================================

/// Heap objects outside the builtin `Value` variants.
pub trait NativeObject: Send + Sync + 'static {
    /// Runtime type.
    fn type_ref(&self) -> TypeRef;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Fallback representation when the type defines no `__repr__`.
    fn repr(&self) -> String {
        format!("<{} object>", self.type_ref().name())
    }

    /// Instance attribute lookup.
    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Instance attribute assignment.
    fn set_attr(&self, name: &str, _value: Value) -> PyResult<()> {
        Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            self.type_ref().name(),
            name
        )))
    }

    /// Instance attribute deletion.
    fn del_attr(&self, name: &str) -> PyResult<()> {
        Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            self.type_ref().name(),
            name
        )))
    }
}

impl fmt::Debug for dyn NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// Downcast a value to a concrete native object type.
#[must_use]
pub fn downcast<T: NativeObject>(value: &Value) -> Option<&T> {
    match value {
        Value::Object(obj) => obj.as_any().downcast_ref::<T>(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(args: &[Value], kw: &KeywordArgs) -> PyResult<Value> {
        Ok(Value::Int((args.len() + kw.len()) as i64))
    }

    #[test]
    fn test_native_function_invoke() {
        let f = NativeFunction::value("echo", echo);
        let Value::Function(callable) = f else {
            panic!("expected function");
        };
        let mut kw = KeywordArgs::default();
        kw.insert(Arc::from("a"), Value::None);
        let out = callable.invoke(&[Value::Int(1)], &kw, None).unwrap();
        assert_eq!(out, Value::Int(2));
        assert_eq!(callable.name(), "echo");
    }

    #[test]
    fn test_bound_method_prepends_receiver() {
        fn first(args: &[Value]) -> PyResult<Value> {
            Ok(args[0].clone())
        }
        let bound = BoundMethod::new(Value::from("self"), "first", Method::Native(first));
        let out = bound.invoke(&[Value::Int(3)], &KeywordArgs::default(), None).unwrap();
        assert_eq!(out, Value::from("self"));
    }

    #[test]
    fn test_native_method_rejects_keywords() {
        fn noop(_: &[Value]) -> PyResult<Value> {
            Ok(Value::None)
        }
        let bound = BoundMethod::new(Value::None, "noop", Method::Native(noop));
        let mut kw = KeywordArgs::default();
        kw.insert(Arc::from("x"), Value::Int(1));
        assert!(bound.invoke(&[], &kw, None).is_err());
    }
}
