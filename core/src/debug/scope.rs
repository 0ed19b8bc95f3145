//! Call frame identity used by stepping

use crate::vm::{FrameInfo, FrameKind, Introspect};

/// Snapshot of one call frame.
///
/// Two scopes are equal when they describe the same function activation
/// site; the current line is ignored so a frame stays "the same" while it
/// advances.
#[derive(Debug, Clone)]
pub struct Scope {
    pub source: String,
    pub line: i32,
    pub line_defined: i32,
    pub name: Option<String>,
    pub kind: Option<FrameKind>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::empty()
    }
}

impl Scope {
    pub fn empty() -> Self {
        Self {
            source: String::new(),
            line: -1,
            line_defined: -1,
            name: None,
            kind: None,
        }
    }

    pub fn from_frame(frame: &FrameInfo) -> Self {
        Self {
            source: frame.source.clone(),
            line: frame.line,
            line_defined: frame.line_defined,
            name: frame.name.clone(),
            kind: Some(frame.kind),
        }
    }

    /// Scope of the frame at `level`, empty if the stack is not that deep
    pub fn capture(vm: &dyn Introspect, level: usize) -> Self {
        vm.frame(level)
            .map(|frame| Self::from_frame(&frame))
            .unwrap_or_else(Self::empty)
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
            && self.line == -1
            && self.line_defined == -1
            && self.name.is_none()
            && self.kind.is_none()
    }

    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    pub fn is_native(&self) -> bool {
        self.kind == Some(FrameKind::Native)
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.line_defined == other.line_defined
            && self.name == other.name
            && self.kind == other.kind
    }
}

impl Eq for Scope {}
