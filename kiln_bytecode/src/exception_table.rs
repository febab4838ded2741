//! The flat exception table.
//!
//! Each entry protects a half-open offset range `[start, end)` and names the
//! handler that receives control when an instruction in the range raises.
//! Entries are kept in declaration order; nesting is expressed by narrower
//! ranges, not by ordering.

use smallvec::SmallVec;

/// One protected range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionTableEntry {
    /// First protected offset.
    pub start: u32,
    /// End of the protected range (exclusive).
    pub end: u32,
    /// Handler offset.
    pub target: u32,
    /// Operand-stack depth at handler entry, before lasti and the exception.
    pub depth: u32,
    /// Push the raising instruction's offset before the exception.
    pub push_lasti: bool,
}

impl ExceptionTableEntry {
    /// Create an entry.
    #[must_use]
    pub const fn new(start: u32, end: u32, target: u32, depth: u32, push_lasti: bool) -> Self {
        Self {
            start,
            end,
            target,
            depth,
            push_lasti,
        }
    }

    /// An empty range protects nothing.
    #[inline]
    #[must_use]
    pub const fn is_void(&self) -> bool {
        self.start >= self.end
    }

    /// The handler lies before the protected range.
    #[inline]
    #[must_use]
    pub const fn is_backward(&self) -> bool {
        self.target < self.start
    }

    /// Whether `offset` is protected.
    #[inline]
    #[must_use]
    pub const fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Width of the protected range.
    #[inline]
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// Ordered exception table of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionTable {
    entries: Vec<ExceptionTableEntry>,
}

impl ExceptionTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, entry: ExceptionTableEntry) {
        self.entries.push(entry);
    }

    /// Number of entries, void ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ExceptionTableEntry> {
        self.entries.iter()
    }

    /// Entry by index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ExceptionTableEntry> {
        self.entries.get(index)
    }

    /// Indices of non-void entries covering `offset`, in table order.
    #[must_use]
    pub fn covering(&self, offset: u32) -> SmallVec<[usize; 4]> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_void() && e.covers(offset))
            .map(|(i, _)| i)
            .collect()
    }
}

impl FromIterator<ExceptionTableEntry> for ExceptionTable {
    fn from_iter<I: IntoIterator<Item = ExceptionTableEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ExceptionTable {
    type Item = &'a ExceptionTableEntry;
    type IntoIter = std::slice::Iter<'a, ExceptionTableEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
