//! Script debugger
//!
//! Breakpoints, call stack records and stepping for a running script.
//!
//! # Overview
//!
//! The UI talks to a [`DebugSession`] owned by the executor. The script
//! thread consults the same session from its VM hook:
//!
//! - on a breakpoint line it captures a [`Record`] per active frame,
//!   focuses the innermost one and parks until the user steps or resumes
//! - step over, into and out are one-shot flags resolved against a
//!   [`Scope`] captured when the step was requested
//! - while parked it answers variable reads and writes from the UI
//!
//! Sources are compared without the VM's chunk prefix (`=` for literal
//! chunks, `@` for files), so breakpoints are set on plain asset names.

mod breakpoints;
pub(crate) mod hook;
mod record;
mod scope;
mod session;


pub use breakpoints::{Breakpoint, Breakpoints};
pub use record::{Record, RecordVariable, capture_records, format_value};
pub use scope::Scope;
pub use session::{DebugSession, Step, StepFlags};
pub(crate) use session::{Inspection, InspectionReply};

/// Removes the VM's `=` or `@` chunk prefix
pub fn strip_source_prefix(source: &str) -> &str {
    source
        .strip_prefix('=')
        .or_else(|| source.strip_prefix('@'))
        .unwrap_or(source)
}
