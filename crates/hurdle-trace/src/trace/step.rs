//! Wire shape of trace entries.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::fault::FaultKind;

/// One observed moment of execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// 1-based source line.
    pub line: u32,
    /// Serialized bindings in first-assignment order. `return` steps carry
    /// the returned value's text under `__return__`.
    pub locals: IndexMap<String, serde_json::Value>,
    /// Enclosing callable, or `<module>`.
    pub func_name: String,
}

/// Terminal entry for a run that ended in a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStep {
    /// Short description, the exception's `str()`.
    pub error: String,
    /// Full formatted traceback.
    pub traceback: String,
    pub kind: FaultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Informational entry produced by backends without a real tracer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoStep {
    pub message: String,
}

/// A trace entry, tagged by its `event` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TraceEntry {
    Call(TraceStep),
    Line(TraceStep),
    Return(TraceStep),
    Error(ErrorStep),
    Info(InfoStep),
}

impl TraceEntry {
    pub fn event(&self) -> &'static str {
        match self {
            TraceEntry::Call(_) => "call",
            TraceEntry::Line(_) => "line",
            TraceEntry::Return(_) => "return",
            TraceEntry::Error(_) => "error",
            TraceEntry::Info(_) => "info",
        }
    }

    pub fn as_step(&self) -> Option<&TraceStep> {
        match self {
            TraceEntry::Call(step) | TraceEntry::Line(step) | TraceEntry::Return(step) => {
                Some(step)
            }
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorStep> {
        match self {
            TraceEntry::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// Ordered entries of one (code, input) run. An [`ErrorStep`], if present,
/// is the last entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    pub entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new(entries: Vec<TraceEntry>) -> Self {
        Trace { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &TraceStep> {
        self.entries.iter().filter_map(TraceEntry::as_step)
    }

    pub fn error(&self) -> Option<&ErrorStep> {
        self.entries.last().and_then(TraceEntry::as_error)
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn steps_serialize_with_event_tag() {
        let mut locals = IndexMap::new();
        locals.insert("x".to_string(), json!(1));
        let entry = TraceEntry::Line(TraceStep {
            line: 1,
            locals,
            func_name: "<module>".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"event": "line", "line": 1, "locals": {"x": 1}, "func_name": "<module>"})
        );
    }

    #[test]
    fn error_step_omits_unknown_line() {
        let entry = TraceEntry::Error(ErrorStep {
            error: "bad".to_string(),
            traceback: "Traceback".to_string(),
            kind: FaultKind::Runtime,
            line: None,
        });
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"event": "error", "error": "bad", "traceback": "Traceback", "kind": "runtime"})
        );
    }

    #[test]
    fn trace_is_a_plain_array() {
        let trace = Trace::new(vec![TraceEntry::Info(InfoStep {
            message: "hi".to_string(),
        })]);
        assert_eq!(
            serde_json::to_value(&trace).unwrap(),
            json!([{"event": "info", "message": "hi"}])
        );
        let back: Trace = serde_json::from_value(json!([{"event": "info", "message": "hi"}])).unwrap();
        assert_eq!(back, trace);
    }
}
