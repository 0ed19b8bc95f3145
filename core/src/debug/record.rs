//! Call stack snapshots taken at a pause

use smallvec::SmallVec;

use super::strip_source_prefix;
use crate::vm::{Binding, FrameKind, Introspect, Value};

/// Names the VM gives to internal stack slots
const TEMPORARY_NAMES: [&str; 2] = ["(temporary)", "(C temporary)"];

/// Chunk names of frames without usable source information
const UNKNOWN_SOURCES: [&str; 2] = ["=?", "=[C]"];

/// One variable binding captured in a [`Record`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordVariable {
    pub name: String,
    pub type_name: String,
    pub value: Value,
    pub is_upvalue: bool,
}

impl RecordVariable {
    fn from_binding(binding: Binding, is_upvalue: bool) -> Self {
        Self {
            name: binding.name,
            type_name: binding.value.type_name().to_string(),
            value: binding.value,
            is_upvalue,
        }
    }

    /// Value as shown in a watch view
    pub fn text(&self) -> String {
        format_value(&self.value)
    }
}

/// One call stack frame captured at a pause
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Source without its chunk prefix
    pub source: String,
    pub line: i32,
    pub line_defined: i32,
    pub name: Option<String>,
    pub kind: FrameKind,
    /// Locals first, then upvalues
    pub variables: SmallVec<[RecordVariable; 8]>,
}

/// Formats a value for display.
///
/// Strings are quoted with control characters escaped; functions and
/// threads show only their type.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let escaped = s
                .replace('\r', "\\r")
                .replace('\n', "\\n")
                .replace('\t', "\\t");
            format!("\"{}\"", escaped)
        }
        Value::Opaque { type_name, .. } if type_name == "function" || type_name == "thread" => type_name.clone(),
        other => other.to_string(),
    }
}

/// Captures every active frame, innermost first.
///
/// Frames the VM cannot name a source for take `source_hint`, and unknown
/// lines take `line_hint`.
pub fn capture_records(vm: &dyn Introspect, source_hint: &str, line_hint: i32) -> Vec<Record> {
    let mut records = Vec::new();
    let mut level = 0;
    while let Some(frame) = vm.frame(level) {
        let source = if UNKNOWN_SOURCES.contains(&frame.source.as_str()) {
            source_hint
        } else {
            frame.source.as_str()
        };
        let line = if frame.line == -1 { line_hint } else { frame.line };

        let locals = vm
            .locals(level)
            .into_iter()
            .filter(|b| !TEMPORARY_NAMES.contains(&b.name.as_str()))
            .map(|b| RecordVariable::from_binding(b, false));
        let upvalues = vm
            .upvalues(level)
            .into_iter()
            .filter(|b| !TEMPORARY_NAMES.contains(&b.name.as_str()))
            .map(|b| RecordVariable::from_binding(b, true));

        records.push(Record {
            source: strip_source_prefix(source).to_string(),
            line,
            line_defined: frame.line_defined,
            name: frame.name,
            kind: frame.kind,
            variables: locals.chain(upvalues).collect(),
        });
        level += 1;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::String("a\tb\r\n".into())), "\"a\\tb\\r\\n\"");
        assert_eq!(format_value(&Value::Integer(42)), "42");
        assert_eq!(format_value(&Value::Nil), "nil");
        let func = Value::Opaque {
            type_name: "function".into(),
            repr: "function: 0x1234".into(),
        };
        assert_eq!(format_value(&func), "function");
        let table = Value::Opaque {
            type_name: "table".into(),
            repr: "{x=1}".into(),
        };
        assert_eq!(format_value(&table), "{x=1}");
    }
}
