//! The runtime generator object.

use super::{GeneratorPlan, GeneratorState, Resume, EXHAUSTED};
use crate::lower::exceptions::to_exception;
use crate::lower::frame::Frame;
use kiln_core::object::type_obj::{TypeFlags, TypeObject};
use kiln_core::object::{downcast, NativeObject};
use kiln_core::types::builtin_types;
use kiln_core::{Exception, PyResult, TypeRef, Value};
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::sync::{Arc, LazyLock};

static GENERATOR_TYPE: LazyLock<TypeRef> = LazyLock::new(|| {
    let ty = TypeObject::builtin(
        "generator",
        &builtin_types().object,
        TypeFlags::ITERATOR | TypeFlags::FINAL,
    );
    ty.define_native("__iter__", gen_iter);
    ty.define_native("__next__", gen_next);
    ty.define_native("send", gen_send);
    ty.define_native("throw", gen_throw);
    ty.define_native("close", gen_close);
    ty
});

/// The `generator` type.
#[must_use]
pub fn generator_type() -> &'static TypeRef {
    &GENERATOR_TYPE
}

struct Inner {
    gen: GeneratorState,
    /// Value produced by `has_more` and not yet consumed.
    buffered: Option<Value>,
}

/// A suspended translated generator body.
///
/// Driven by one caller at a time; re-entrant advancement raises
/// `ValueError("generator already executing")`.
pub struct Generator {
    name: Arc<str>,
    plan: Arc<GeneratorPlan>,
    inner: Mutex<Inner>,
}

impl Generator {
    /// A generator in state `0` over a prepared frame.
    #[must_use]
    pub fn new(name: Arc<str>, plan: Arc<GeneratorPlan>, frame: Frame) -> Self {
        Self {
            name,
            plan,
            inner: Mutex::new(Inner {
                gen: GeneratorState {
                    state: 0,
                    frame,
                    returned: Value::None,
                },
                buffered: None,
            }),
        }
    }

    /// Name of the generating unit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state number (`-1` once exhausted).
    pub fn state(&self) -> PyResult<i64> {
        Ok(self.lock()?.gen.state)
    }

    fn lock(&self) -> PyResult<MutexGuard<'_, Inner>> {
        self.inner
            .try_lock()
            .ok_or_else(|| Exception::value_error("generator already executing"))
    }

    fn finished(inner: &Inner) -> Exception {
        Exception::stop_iteration(inner.gen.returned.clone())
    }

    /// Whether another value is available, advancing once if none is buffered.
    pub fn has_more(&self) -> PyResult<bool> {
        let mut inner = self.lock()?;
        if inner.buffered.is_some() {
            return Ok(true);
        }
        if inner.gen.state != EXHAUSTED {
            let inner = &mut *inner;
            inner.buffered = self.plan.advance(&mut inner.gen, Resume::Next)?;
        }
        Ok(inner.gen.state != EXHAUSTED)
    }

    /// The next value; `StopIteration(return value)` once exhausted.
    pub fn consume(&self) -> PyResult<Value> {
        let mut inner = self.lock()?;
        if let Some(value) = inner.buffered.take() {
            return Ok(value);
        }
        match self.plan.advance(&mut inner.gen, Resume::Next)? {
            Some(value) => Ok(value),
            None => Err(Self::finished(&inner)),
        }
    }

    /// Resume with `value` as the result of the pending yield.
    ///
    /// A value buffered by [`has_more`](Self::has_more) is returned first and
    /// `value` is dropped without reaching the body.
    pub fn send(&self, value: Value) -> PyResult<Value> {
        let mut inner = self.lock()?;
        if let Some(buffered) = inner.buffered.take() {
            return Ok(buffered);
        }
        match self.plan.advance(&mut inner.gen, Resume::Send(value))? {
            Some(yielded) => Ok(yielded),
            None => Err(Self::finished(&inner)),
        }
    }

    /// Raise `exc` at the pending yield.
    ///
    /// A value buffered by [`has_more`](Self::has_more) is discarded; the
    /// result is whatever the body yields after handling `exc`.
    pub fn throw(&self, exc: Exception) -> PyResult<Value> {
        let mut inner = self.lock()?;
        inner.buffered = None;
        match self.plan.advance(&mut inner.gen, Resume::Throw(exc))? {
            Some(yielded) => Ok(yielded),
            None => Err(Self::finished(&inner)),
        }
    }

    /// Throw `GeneratorExit` into the body and require it to finish.
    pub fn close(&self) -> PyResult<()> {
        let mut inner = self.lock()?;
        inner.buffered = None;
        match inner.gen.state {
            EXHAUSTED => return Ok(()),
            0 => {
                inner.gen.state = EXHAUSTED;
                return Ok(());
            }
            _ => {}
        }
        match self
            .plan
            .advance(&mut inner.gen, Resume::Throw(Exception::generator_exit()))
        {
            Ok(Some(_)) => Err(Exception::runtime_error("generator ignored GeneratorExit")),
            Ok(None) => Ok(()),
            Err(exc) if exc.is_instance(&builtin_types().generator_exit) => Ok(()),
            Err(exc) => Err(exc),
        }
    }
}

impl NativeObject for Generator {
    fn type_ref(&self) -> TypeRef {
        GENERATOR_TYPE.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("<generator object {}>", self.name)
    }
}

// =============================================================================
// Native methods
// =============================================================================

fn receiver(args: &[Value]) -> PyResult<&Generator> {
    args.first()
        .and_then(downcast::<Generator>)
        .ok_or_else(|| Exception::type_error("descriptor requires a 'generator' object"))
}

fn gen_iter(args: &[Value]) -> PyResult<Value> {
    receiver(args)?;
    Ok(args[0].clone())
}

fn gen_next(args: &[Value]) -> PyResult<Value> {
    receiver(args)?.consume()
}

fn gen_send(args: &[Value]) -> PyResult<Value> {
    let value = args.get(1).cloned().unwrap_or(Value::None);
    receiver(args)?.send(value)
}

fn gen_throw(args: &[Value]) -> PyResult<Value> {
    let gen = receiver(args)?;
    let exc = args
        .get(1)
        .cloned()
        .ok_or_else(|| Exception::type_error("throw expected at least 1 argument, got 0"))?;
    gen.throw(to_exception(exc)?)
}

fn gen_close(args: &[Value]) -> PyResult<Value> {
    receiver(args)?.close()?;
    Ok(Value::None)
}
