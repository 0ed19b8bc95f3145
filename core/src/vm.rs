//! Script VM capabilities
//!
//! The engine never depends on a concrete scripting language. It drives a
//! VM through [`ScriptVm`] (compile, call, install hooks) and inspects its
//! call stack through [`Introspect`] while a [`Hook`] is running.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::ScriptError;
use crate::require::Modules;

/// Script value as seen by the debugger
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    /// Value the debugger can only name and print (tables, functions, userdata)
    Opaque { type_name: String, repr: String },
}

impl Value {
    pub fn type_name(&self) -> &str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) | Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Opaque { type_name, .. } => type_name,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
            Self::Opaque { repr, .. } => f.write_str(repr),
        }
    }
}

/// Named value in a stack frame
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: Value,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// What kind of function a frame runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Top level of a loaded chunk
    Main,
    /// Function written in the script language
    Script,
    /// Host function called from script
    Native,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Main => "main",
            Self::Script => "script",
            Self::Native => "native",
        })
    }
}

/// Description of one call stack frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Chunk name, possibly prefixed with `=` or `@`
    pub source: String,
    /// Line being executed, -1 when unknown
    pub line: i32,
    /// Line where the function was defined, -1 when unknown
    pub line_defined: i32,
    pub name: Option<String>,
    pub kind: FrameKind,
}

/// Event a hook is called for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// A function was entered; frame 0 is the callee
    Call,
    /// A function is about to return; frame 0 is still the returning function
    Return,
    /// A new source line is about to execute
    Line,
}

bitflags! {
    /// Events a hook is installed for
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HookMask: u8 {
        const CALL = 1 << 0;
        const RETURN = 1 << 1;
        const LINE = 1 << 2;
    }
}

impl HookEvent {
    pub fn mask(self) -> HookMask {
        match self {
            Self::Call => HookMask::CALL,
            Self::Return => HookMask::RETURN,
            Self::Line => HookMask::LINE,
        }
    }
}

/// Callback invoked by the VM on call, return and line events.
///
/// Returning an error raises it inside the script at the current point,
/// unwinding through the VM's normal error path.
pub trait Hook: Send + Sync {
    fn on_event(&self, event: HookEvent, vm: &mut dyn Introspect) -> Result<(), ScriptError>;
}

/// Stack inspection available while script code is suspended in a hook.
///
/// Level 0 is the innermost active frame.
pub trait Introspect {
    fn frame(&self, level: usize) -> Option<FrameInfo>;

    /// Locals of a frame in declaration order, including VM temporaries
    fn locals(&self, level: usize) -> Vec<Binding>;

    /// Upvalues captured by the function of a frame
    fn upvalues(&self, level: usize) -> Vec<Binding>;

    /// Overwrites a local; returns false if the frame has no such local
    fn set_local(&mut self, level: usize, name: &str, value: Value) -> bool;

    fn set_global(&mut self, name: &str, value: Value);

    /// Replaces the installed hook; `None` removes it
    fn set_hook(&mut self, hook: Option<Arc<dyn Hook>>, mask: HookMask);
}

/// A script VM instance
pub trait ScriptVm: Introspect + Send {
    /// Compiles and runs a chunk; returns how many values the chunk returned
    fn load(&mut self, chunk_name: &str, code: &str) -> Result<usize, ScriptError>;

    /// Whether a global function with this name exists
    fn has_function(&self, name: &str) -> bool;

    /// Calls a global function, discarding its results
    fn call(&mut self, name: &str, args: &[Value]) -> Result<(), ScriptError>;

    /// Hands the VM the module registry its `require` resolves against
    fn set_modules(&mut self, _modules: Arc<Modules>) {}
}

/// Creates a fresh VM for each run, on the thread that will execute it
pub type VmFactory = Arc<dyn Fn() -> Box<dyn ScriptVm> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_names() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::Integer(3).type_name(), "number");
        assert_eq!(Value::Number(0.5).type_name(), "number");
        assert_eq!(Value::String("x".into()).type_name(), "string");
        let table = Value::Opaque {
            type_name: "table".into(),
            repr: "{}".into(),
        };
        assert_eq!(table.type_name(), "table");
        assert_eq!(table.to_string(), "{}");
    }

    #[test]
    fn test_event_masks() {
        let normal = HookMask::LINE;
        let debug = HookMask::CALL | HookMask::RETURN | HookMask::LINE;
        assert!(normal.contains(HookEvent::Line.mask()));
        assert!(!normal.contains(HookEvent::Call.mask()));
        assert!(debug.contains(HookEvent::Return.mask()));
    }
}
