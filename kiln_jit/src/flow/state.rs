//! Per-program-point stack and type state.

use super::value_source::ValueSource;
use std::fmt;
use std::sync::Arc;

/// Merging two live states whose operand stacks differ in depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthMismatch {
    /// Depth of the left operand.
    pub left: usize,
    /// Depth of the right operand.
    pub right: usize,
    /// Rendered stacks of both sides.
    pub types: String,
}

/// The inferred state of a reachable program point.
#[derive(Clone, PartialEq, Eq)]
pub struct LiveState {
    /// Operand stack, top at the highest index.
    pub stack: Vec<ValueSource>,
    /// Local slots; `None` when definitely unbound.
    pub locals: Box<[Option<ValueSource>]>,
    /// Cell slots (cellvars then freevars); `None` when definitely unbound.
    pub cells: Box<[Option<ValueSource>]>,
    /// Keyword names set by `KW_NAMES` for the next call.
    pub kw_names: Option<Arc<[Arc<str>]>>,
}

impl LiveState {
    /// Empty stack with `locals` and `cells` slots, all unbound.
    #[must_use]
    pub fn new(locals: usize, cells: usize) -> Self {
        Self {
            stack: Vec::new(),
            locals: vec![None; locals].into_boxed_slice(),
            cells: vec![None; cells].into_boxed_slice(),
            kw_names: None,
        }
    }

    /// Operand stack depth.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Push a value.
    #[inline]
    pub fn push(&mut self, value: ValueSource) {
        self.stack.push(value);
    }

    /// Pop the top value.
    #[inline]
    pub fn pop(&mut self) -> Option<ValueSource> {
        self.stack.pop()
    }

    /// Pop `n` values, deepest first.
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<ValueSource>> {
        let at = self.stack.len().checked_sub(n)?;
        Some(self.stack.split_off(at))
    }

    /// Value `n` items below the top (0 is TOS).
    #[must_use]
    pub fn peek(&self, n: usize) -> Option<&ValueSource> {
        let len = self.stack.len();
        len.checked_sub(n + 1).map(|i| &self.stack[i])
    }

    /// Render the stack types, bottom first.
    #[must_use]
    pub fn render_stack(&self) -> String {
        let items: Vec<String> = self.stack.iter().map(ToString::to_string).collect();
        format!("[{}]", items.join(", "))
    }

    fn merge(&self, other: &LiveState) -> Result<LiveState, DepthMismatch> {
        if self.stack.len() != other.stack.len() {
            return Err(DepthMismatch {
                left: self.stack.len(),
                right: other.stack.len(),
                types: format!("{} / {}", self.render_stack(), other.render_stack()),
            });
        }
        let stack = self
            .stack
            .iter()
            .zip(other.stack.iter())
            .map(|(a, b)| a.merge(b))
            .collect();
        let kw_names = match (&self.kw_names, &other.kw_names) {
            (Some(a), Some(b)) if a == b => Some(Arc::clone(a)),
            _ => None,
        };
        Ok(LiveState {
            stack,
            locals: merge_slots(&self.locals, &other.locals),
            cells: merge_slots(&self.cells, &other.cells),
            kw_names,
        })
    }
}

fn merge_slots(a: &[Option<ValueSource>], b: &[Option<ValueSource>]) -> Box<[Option<ValueSource>]> {
    a.iter()
        .zip(b.iter())
        .map(|pair| match pair {
            (Some(x), Some(y)) => Some(x.merge(y)),
            (Some(x), None) | (None, Some(x)) => Some(x.clone()),
            (None, None) => None,
        })
        .collect()
}

/// State before an instruction; `Dead` marks unreachable code.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum StackFrameState {
    /// Not reached by any edge.
    #[default]
    Dead,
    /// Reached, with the merged state of every incoming edge.
    Live(LiveState),
}

impl StackFrameState {
    /// Whether the point is unreachable.
    #[inline]
    #[must_use]
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }

    /// The live state, if any.
    #[inline]
    #[must_use]
    pub fn live(&self) -> Option<&LiveState> {
        match self {
            Self::Dead => None,
            Self::Live(state) => Some(state),
        }
    }

    /// Merge two states. `Dead` is the identity.
    pub fn merge(&self, other: &StackFrameState) -> Result<StackFrameState, DepthMismatch> {
        match (self, other) {
            (Self::Dead, x) | (x, Self::Dead) => Ok(x.clone()),
            (Self::Live(a), Self::Live(b)) => a.merge(b).map(Self::Live),
        }
    }
}

impl fmt::Debug for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack={:?}", self.stack)?;
        let bound: Vec<String> = self
            .locals
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| format!("{i}:{s}")))
            .collect();
        write!(f, " locals=[{}]", bound.join(", "))?;
        if let Some(names) = &self.kw_names {
            write!(f, " kw_names={names:?}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StackFrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dead => f.write_str("DEAD"),
            Self::Live(state) => state.fmt(f),
        }
    }
}
