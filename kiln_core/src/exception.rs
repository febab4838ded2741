//! Language-level exceptions.
//!
//! An [`Exception`] is the value raised by running code: a type from the
//! exception hierarchy plus its constructor arguments. It is cheap to clone
//! (one `Arc`) and carries the chaining links (`__cause__`, `__context__`)
//! and a traceback that grows as the error unwinds through translated frames.
//!
//! ```text
//! BaseException
//!  ├── Exception
//!  │    ├── TypeError / ValueError / AttributeError / AssertionError
//!  │    ├── NameError ── UnboundLocalError
//!  │    ├── LookupError ── KeyError / IndexError
//!  │    ├── ArithmeticError ── ZeroDivisionError / OverflowError
//!  │    ├── RuntimeError ── NotImplementedError
//!  │    ├── StopIteration
//!  │    └── SystemError
//!  └── GeneratorExit
//! ```

use crate::object::type_obj::TypeRef;
use crate::types::builtin_types;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Result of running code that may raise.
pub type PyResult<T> = Result<T, Exception>;

/// One frame of a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracebackEntry {
    /// Name of the unit the exception passed through.
    pub function: Arc<str>,
    /// Source line, when the instruction carried one.
    pub line: Option<u32>,
}

struct ExceptionData {
    ty: TypeRef,
    args: Vec<Value>,
    cause: Mutex<Option<Exception>>,
    context: Mutex<Option<Exception>>,
    traceback: Mutex<Vec<TracebackEntry>>,
}

/// A raised exception.
#[derive(Clone)]
pub struct Exception {
    inner: Arc<ExceptionData>,
}

impl Exception {
    /// Create an exception of type `ty` with constructor arguments.
    #[must_use]
    pub fn new(ty: TypeRef, args: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(ExceptionData {
                ty,
                args,
                cause: Mutex::new(None),
                context: Mutex::new(None),
                traceback: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create an exception with a single message argument.
    #[must_use]
    pub fn with_message(ty: &TypeRef, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(Arc::clone(ty), vec![Value::from(message.as_str())])
    }

    /// `TypeError(message)`.
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::with_message(&builtin_types().type_error, message)
    }

    /// `ValueError(message)`.
    #[must_use]
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::with_message(&builtin_types().value_error, message)
    }

    /// `NameError` for an undefined global.
    #[must_use]
    pub fn name_error(name: &str) -> Self {
        Self::with_message(
            &builtin_types().name_error,
            format!("name '{name}' is not defined"),
        )
    }

    /// `UnboundLocalError` for a local read before assignment.
    #[must_use]
    pub fn unbound_local(name: &str) -> Self {
        Self::with_message(
            &builtin_types().unbound_local_error,
            format!("cannot access local variable '{name}' where it is not associated with a value"),
        )
    }

    /// `AttributeError(message)`.
    #[must_use]
    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::with_message(&builtin_types().attribute_error, message)
    }

    /// `KeyError(key)`.
    #[must_use]
    pub fn key_error(key: Value) -> Self {
        Self::new(builtin_types().key_error.clone(), vec![key])
    }

    /// `IndexError(message)`.
    #[must_use]
    pub fn index_error(message: impl Into<String>) -> Self {
        Self::with_message(&builtin_types().index_error, message)
    }

    /// `ZeroDivisionError(message)`.
    #[must_use]
    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::with_message(&builtin_types().zero_division_error, message)
    }

    /// `OverflowError(message)`.
    #[must_use]
    pub fn overflow(message: impl Into<String>) -> Self {
        Self::with_message(&builtin_types().overflow_error, message)
    }

    /// `RuntimeError(message)`.
    #[must_use]
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::with_message(&builtin_types().runtime_error, message)
    }

    /// `SystemError(message)`: a broken invariant inside generated code.
    #[must_use]
    pub fn system_error(message: impl Into<String>) -> Self {
        Self::with_message(&builtin_types().system_error, message)
    }

    /// `StopIteration(value)`.
    #[must_use]
    pub fn stop_iteration(value: Value) -> Self {
        let args = if value.is_none() { Vec::new() } else { vec![value] };
        Self::new(builtin_types().stop_iteration.clone(), args)
    }

    /// `GeneratorExit()`.
    #[must_use]
    pub fn generator_exit() -> Self {
        Self::new(builtin_types().generator_exit.clone(), Vec::new())
    }

    /// Exception type.
    #[inline]
    #[must_use]
    pub fn type_ref(&self) -> &TypeRef {
        &self.inner.ty
    }

    /// Type name.
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.inner.ty.name()
    }

    /// Constructor arguments.
    #[inline]
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    /// `isinstance(self, ty)`.
    #[inline]
    #[must_use]
    pub fn is_instance(&self, ty: &TypeRef) -> bool {
        self.inner.ty.is_subtype_of(ty)
    }

    /// `str(self)`.
    #[must_use]
    pub fn message(&self) -> String {
        match self.inner.args.as_slice() {
            [] => String::new(),
            [single] if self.is_instance(&builtin_types().key_error) => single.repr(),
            [single] => single.to_display(),
            many => Value::Tuple(Arc::from(many)).repr(),
        }
    }

    /// Value carried by a `StopIteration`, `None` otherwise.
    #[must_use]
    pub fn stop_value(&self) -> Value {
        self.inner.args.first().cloned().unwrap_or(Value::None)
    }

    /// Explicit cause (`raise X from Y`).
    #[must_use]
    pub fn cause(&self) -> Option<Exception> {
        self.inner.cause.lock().clone()
    }

    /// Set the explicit cause.
    pub fn set_cause(&self, cause: Option<Exception>) {
        *self.inner.cause.lock() = cause;
    }

    /// Implicit context: the exception being handled when this one was raised.
    #[must_use]
    pub fn context(&self) -> Option<Exception> {
        self.inner.context.lock().clone()
    }

    /// Set the implicit context unless it would create a self-reference.
    pub fn set_context(&self, context: Option<Exception>) {
        if let Some(ctx) = &context {
            if ctx.ptr_eq(self) {
                return;
            }
        }
        *self.inner.context.lock() = context;
    }

    /// Record a frame the exception unwound through.
    pub fn push_traceback(&self, function: Arc<str>, line: Option<u32>) {
        self.inner
            .traceback
            .lock()
            .push(TracebackEntry { function, line });
    }

    /// Frames recorded so far, innermost first.
    #[must_use]
    pub fn traceback(&self) -> Vec<TracebackEntry> {
        self.inner.traceback.lock().clone()
    }

    /// Identity comparison.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Exception) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address used for identity hashing.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message();
        if message.is_empty() {
            f.write_str(self.type_name())
        } else {
            write!(f, "{}: {}", self.type_name(), message)
        }
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name())?;
        for (i, arg) in self.inner.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&arg.repr())?;
        }
        f.write_str(")")
    }
}

impl std::error::Error for Exception {}
