//! Event recorder: turns interpreter events into trace steps.

use std::time::Instant;

use indexmap::IndexMap;
use tracing::debug;

use crate::interpreter::value::plain_str;
use crate::interpreter::{Event, EventArg, FrameView, HookControl, TraceHook};

use super::budget::{self, TraceBudget};
use super::serializer::{serialize_within, text_cost};
use super::step::{ErrorStep, Trace, TraceEntry, TraceStep};

/// Key under which `return` steps carry the returned value's text.
pub const RETURN_KEY: &str = "__return__";

/// Steps at least this costly make the recorder check the deadline on
/// every event instead of every 64th.
const HEAVY_STEP: usize = 4096;

/// Builds the trace of one run. It is the only writer of the trace buffer
/// and enforces the step, size and deadline budget.
pub struct Recorder {
    budget: TraceBudget,
    deadline: Option<Instant>,
    entries: Vec<TraceEntry>,
    events: u64,
    /// Serialized values recorded so far.
    spent: usize,
    heavy: bool,
}

impl Recorder {
    pub fn new(budget: TraceBudget) -> Self {
        let deadline = budget.deadline_from(Instant::now());
        Recorder {
            budget,
            deadline,
            entries: Vec::new(),
            events: 0,
            spent: 0,
            heavy: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends the terminal fault entry.
    pub fn record_fault(&mut self, error: ErrorStep) {
        debug!(kind = error.kind.as_str(), steps = self.entries.len(), "run ended in a fault");
        self.entries.push(TraceEntry::Error(error));
    }

    pub fn finish(self) -> Trace {
        Trace::new(self.entries)
    }

    fn oversized(&self) -> HookControl {
        debug!(
            spent = self.spent,
            steps = self.entries.len(),
            "trace size budget exhausted"
        );
        HookControl::Halt(budget::trace_size_halt(&self.budget))
    }
}

impl TraceHook for Recorder {
    fn on_event(
        &mut self,
        frame: &FrameView<'_>,
        event: Event,
        arg: EventArg<'_>,
    ) -> HookControl {
        let entry: fn(TraceStep) -> TraceEntry = match event {
            Event::Call => TraceEntry::Call,
            Event::Line => TraceEntry::Line,
            Event::Return => TraceEntry::Return,
            Event::Exception => return HookControl::Continue,
        };

        self.events += 1;
        if self.entries.len() >= self.budget.max_steps {
            return HookControl::Halt(budget::step_limit_halt(&self.budget));
        }
        if self.heavy || self.events & 0x3F == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return HookControl::Halt(budget::timeout_halt(&self.budget));
                }
            }
        }

        let mut remaining = self.budget.max_trace_values.saturating_sub(self.spent);
        let mut locals = IndexMap::with_capacity(frame.locals.len());
        for (name, value) in frame.locals {
            if name.starts_with("__") {
                continue;
            }
            let Some(encoded) = serialize_within(value, frame.ids, remaining) else {
                return self.oversized();
            };
            remaining -= encoded.cost;
            locals.insert(name.clone(), encoded.json);
        }
        if let (Event::Return, EventArg::Return(value)) = (event, arg) {
            let text = plain_str(value, frame.ids);
            let cost = text_cost(&text);
            if cost > remaining {
                return self.oversized();
            }
            remaining -= cost;
            locals.insert(RETURN_KEY.to_string(), serde_json::Value::String(text));
        }

        let step_cost = self.budget.max_trace_values.saturating_sub(self.spent) - remaining;
        self.spent += step_cost;
        self.heavy = step_cost >= HEAVY_STEP;

        self.entries.push(entry(TraceStep {
            line: frame.line,
            locals,
            func_name: frame.func_name.to_string(),
        }));
        HookControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::{ObjectIds, Value};
    use serde_json::json;

    fn locals(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn filters_dunder_names_and_adds_return_value() {
        let ids = ObjectIds::new();
        let bindings = locals(&[
            ("__name__", Value::str("__main__")),
            ("x", Value::Int(1)),
        ]);
        let view = FrameView {
            func_name: "f",
            line: 3,
            locals: &bindings,
            ids: &ids,
        };
        let mut recorder = Recorder::new(TraceBudget::default());
        recorder.on_event(&view, Event::Return, EventArg::Return(&Value::str("done")));
        let trace = recorder.finish();
        let step = trace.steps().next().unwrap();
        assert_eq!(step.func_name, "f");
        assert_eq!(step.line, 3);
        assert_eq!(
            serde_json::to_value(&step.locals).unwrap(),
            json!({"x": 1, "__return__": "done"})
        );
    }

    #[test]
    fn exception_events_are_not_recorded() {
        let ids = ObjectIds::new();
        let bindings = IndexMap::new();
        let view = FrameView {
            func_name: "<module>",
            line: 1,
            locals: &bindings,
            ids: &ids,
        };
        let mut recorder = Recorder::new(TraceBudget::default());
        assert!(matches!(
            recorder.on_event(&view, Event::Exception, EventArg::None),
            HookControl::Continue
        ));
        assert!(recorder.is_empty());
    }

    #[test]
    fn halts_once_the_step_budget_is_spent() {
        let ids = ObjectIds::new();
        let bindings = IndexMap::new();
        let view = FrameView {
            func_name: "<module>",
            line: 1,
            locals: &bindings,
            ids: &ids,
        };
        let budget = TraceBudget {
            max_steps: 2,
            ..TraceBudget::default()
        };
        let mut recorder = Recorder::new(budget);
        for _ in 0..2 {
            assert!(matches!(
                recorder.on_event(&view, Event::Line, EventArg::None),
                HookControl::Continue
            ));
        }
        match recorder.on_event(&view, Event::Line, EventArg::None) {
            HookControl::Halt(halt) => {
                assert_eq!(halt.kind, crate::fault::FaultKind::ResourceExhausted)
            }
            HookControl::Continue => panic!("expected a halt"),
        }
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn halts_once_snapshots_outgrow_the_size_budget() {
        let ids = ObjectIds::new();
        let bindings = locals(&[("xs", Value::list(vec![Value::Int(0); 9]))]);
        let view = FrameView {
            func_name: "<module>",
            line: 1,
            locals: &bindings,
            ids: &ids,
        };
        let budget = TraceBudget {
            max_trace_values: 25,
            ..TraceBudget::default()
        };
        let mut recorder = Recorder::new(budget);
        for _ in 0..2 {
            assert!(matches!(
                recorder.on_event(&view, Event::Line, EventArg::None),
                HookControl::Continue
            ));
        }
        match recorder.on_event(&view, Event::Line, EventArg::None) {
            HookControl::Halt(halt) => {
                assert_eq!(halt.kind, crate::fault::FaultKind::ResourceExhausted);
                assert!(halt.message.contains("25 values"), "{}", halt.message);
            }
            HookControl::Continue => panic!("expected a halt"),
        }
        assert_eq!(recorder.len(), 2);
    }
}
