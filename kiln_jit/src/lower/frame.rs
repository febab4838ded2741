//! Heap-resident activation state of a running unit.
//!
//! Generators keep their [`Frame`] across suspensions, so everything a
//! lowered step reads or writes lives here rather than on the native stack.

use kiln_core::collections::Dict;
use kiln_core::object::cell::Cell;
use kiln_core::value::DictRef;
use kiln_core::{Exception, PyResult, Value};
use parking_lot::RwLock;
use std::sync::Arc;

/// Activation state.
pub struct Frame {
    /// Operand stack, top at the end.
    pub stack: Vec<Value>,
    /// Local slots; `None` when unbound.
    pub locals: Vec<Option<Value>>,
    /// Cell slots: cellvars, then freevars.
    pub cells: Vec<Arc<Cell>>,
    /// Keyword names for the next call, set by `KW_NAMES`.
    pub kw_names: Option<Arc<[Arc<str>]>>,
    /// Exception currently being handled.
    pub exc_info: Option<Exception>,
    /// Stack captured at each region start, by region id.
    pub captured: Vec<Option<Vec<Value>>>,
    /// Module globals.
    pub globals: DictRef,
    /// Exception to throw into a delegate on resume.
    pub pending_throw: Option<Exception>,
}

impl Frame {
    /// A frame with bound locals and cells.
    #[must_use]
    pub fn new(
        locals: Vec<Option<Value>>,
        cells: Vec<Arc<Cell>>,
        globals: DictRef,
        regions: usize,
    ) -> Self {
        Self {
            stack: Vec::with_capacity(8),
            locals,
            cells,
            kw_names: None,
            exc_info: None,
            captured: vec![None; regions],
            globals,
            pending_throw: None,
        }
    }

    /// A frame with `locals` unbound slots, no cells and empty globals.
    #[must_use]
    pub fn detached(locals: usize, regions: usize) -> Self {
        Self::new(
            vec![None; locals],
            Vec::new(),
            Arc::new(RwLock::new(Dict::new())),
            regions,
        )
    }

    /// Push a value.
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop the top value.
    #[inline]
    pub fn pop(&mut self) -> PyResult<Value> {
        self.stack.pop().ok_or_else(underflow)
    }

    /// Pop `n` values, deepest first.
    pub fn pop_n(&mut self, n: usize) -> PyResult<Vec<Value>> {
        let at = self.stack.len().checked_sub(n).ok_or_else(underflow)?;
        Ok(self.stack.split_off(at))
    }

    /// Value `n` items below the top (0 is TOS).
    pub fn peek(&self, n: usize) -> PyResult<&Value> {
        let len = self.stack.len();
        len.checked_sub(n + 1)
            .map(|i| &self.stack[i])
            .ok_or_else(underflow)
    }
}

fn underflow() -> Exception {
    Exception::system_error("operand stack underflow")
}
