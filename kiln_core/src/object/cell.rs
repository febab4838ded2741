//! Closure cells.
//!
//! A `Cell` holds one captured variable shared between an enclosing function
//! and the functions nested in it. Both sides hold the same `Arc<Cell>`, so a
//! write through either is visible to the other.
//!
//! ```text
//! def outer():
//!     x = 10            # STORE_DEREF 0   -> cell.set(10)
//!     def inner():
//!         nonlocal x
//!         x = x + 1     # LOAD_DEREF / STORE_DEREF on the same cell
//!         return x
//!     return inner
//! ```

use crate::value::Value;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A shared variable slot. Empty until first assignment.
#[derive(Default)]
pub struct Cell {
    slot: RwLock<Option<Value>>,
}

impl Cell {
    /// Create an empty cell.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a cell holding `value`.
    #[must_use]
    pub fn with_value(value: Value) -> Arc<Self> {
        Arc::new(Self {
            slot: RwLock::new(Some(value)),
        })
    }

    /// Current contents, `None` if unbound.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.slot.read().clone()
    }

    /// Store a value.
    #[inline]
    pub fn set(&self, value: Value) {
        *self.slot.write() = Some(value);
    }

    /// Unbind the cell. Returns whether it was bound.
    pub fn clear(&self) -> bool {
        self.slot.write().take().is_some()
    }

    /// Whether a value is stored.
    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.slot.read() {
            Some(v) => write!(f, "<cell: {v:?}>"),
            None => f.write_str("<cell: empty>"),
        }
    }
}
