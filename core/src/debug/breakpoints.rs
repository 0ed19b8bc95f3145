//! Breakpoint set
//!
//! Breakpoints are kept sorted by (source, line) so lookups from the line
//! hook are a binary search and all breakpoints of one source are adjacent.

use std::cmp::Ordering;

use super::strip_source_prefix;

/// Source line the debugger stops at
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Breakpoint {
    pub source: String,
    /// 1-based
    pub line: i32,
}

impl Breakpoint {
    pub fn new(source: impl Into<String>, line: i32) -> Self {
        Self {
            source: source.into(),
            line,
        }
    }

    fn cmp_key(&self, source: &str, line: i32) -> Ordering {
        self.source
            .as_str()
            .cmp(source)
            .then(self.line.cmp(&line))
    }
}

/// Sorted, deduplicated breakpoint collection
#[derive(Debug, Default, Clone)]
pub struct Breakpoints {
    entries: Vec<Breakpoint>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, source: &str, line: i32) -> Result<usize, usize> {
        self.entries.binary_search_by(|bp| bp.cmp_key(source, line))
    }

    /// Adds (`on`) or removes a breakpoint.
    ///
    /// Returns false when nothing changed: adding a duplicate or removing a
    /// breakpoint that does not exist.
    pub fn set(&mut self, source: &str, line: i32, on: bool) -> bool {
        match (self.find(source, line), on) {
            (Err(index), true) => {
                self.entries.insert(index, Breakpoint::new(source, line));
                true
            }
            (Ok(index), false) => {
                self.entries.remove(index);
                true
            }
            _ => false,
        }
    }

    /// Removes the breakpoints of one source, or all with `None`.
    ///
    /// Returns how many were removed.
    pub fn clear(&mut self, source: Option<&str>) -> usize {
        match source {
            None => {
                let count = self.entries.len();
                self.entries.clear();
                count
            }
            Some(source) => {
                let range = self.range_of(source);
                let count = range.len();
                self.entries.drain(range);
                count
            }
        }
    }

    /// Visits the breakpoints of one source, or all with `None`, in order.
    ///
    /// Returns how many were visited.
    pub fn visit(&self, source: Option<&str>, mut visitor: impl FnMut(&str, i32)) -> usize {
        let slice = match source {
            None => &self.entries[..],
            Some(source) => &self.entries[self.range_of(source)],
        };
        for bp in slice {
            visitor(&bp.source, bp.line);
        }
        slice.len()
    }

    /// Whether execution should stop at `line` of a VM chunk name.
    ///
    /// The chunk's `=`/`@` prefix is ignored.
    pub fn contains(&self, source: &str, line: i32) -> bool {
        if self.entries.is_empty() || line < 0 {
            return false;
        }
        self.find(strip_source_prefix(source), line).is_ok()
    }

    fn range_of(&self, source: &str) -> std::ops::Range<usize> {
        let start = self.entries.partition_point(|bp| bp.source.as_str() < source);
        let end = start + self.entries[start..].partition_point(|bp| bp.source == source);
        start..end
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.iter()
    }
}
