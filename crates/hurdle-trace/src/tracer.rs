//! The execution tracer: runs one program against one input and returns its
//! trace.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hurdle_lang::SyntaxError;

use crate::error::TraceError;
use crate::fault::FaultKind;
use crate::interpreter::value::{plain_str, Value};
use crate::interpreter::{
    format_traceback, ExcType, Flow, Interpreter, InterpreterConfig, LineSnapshot, TraceHook,
};
use crate::io;
use crate::registry::Tracer;
use crate::trace::{ErrorStep, Recorder, Trace, TraceBudget, TraceEntry};

/// Default stack of a trace worker thread.
pub const DEFAULT_WORKER_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Knobs for one tracer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceOptions {
    pub budget: TraceBudget,
    pub line_snapshot: LineSnapshot,
    pub worker_stack_bytes: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        TraceOptions {
            budget: TraceBudget::default(),
            line_snapshot: LineSnapshot::default(),
            worker_stack_bytes: DEFAULT_WORKER_STACK_BYTES,
        }
    }
}

/// The trace of one (code, input) run and what the program printed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub input: String,
    pub trace: Trace,
    pub stdout: String,
}

/// Tracer for the `python` language.
#[derive(Debug, Clone, Default)]
pub struct ScriptTracer {
    options: TraceOptions,
}

impl ScriptTracer {
    pub fn new(options: TraceOptions) -> Self {
        ScriptTracer { options }
    }

    pub fn options(&self) -> &TraceOptions {
        &self.options
    }
}

impl Tracer for ScriptTracer {
    fn language(&self) -> &'static str {
        "python"
    }

    fn trace(&self, code: &str, input: &str) -> Result<RunResult, TraceError> {
        let options = &self.options;
        thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("hurdle-trace".to_string())
                .stack_size(options.worker_stack_bytes)
                .spawn_scoped(scope, || run_traced(code, input, options))
                .map_err(|err| TraceError::Worker(format!("could not start worker: {err}")))?;
            worker
                .join()
                .map_err(|payload| TraceError::Worker(panic_message(payload.as_ref())))
        })
    }
}

/// Parses and runs `code` on the current thread.
pub fn run_traced(code: &str, input: &str, options: &TraceOptions) -> RunResult {
    let program = match hurdle_lang::parse_program(code) {
        Ok(program) => program,
        Err(err) => {
            debug!(line = err.line, "syntax error");
            return RunResult {
                input: input.to_string(),
                trace: Trace::new(vec![TraceEntry::Error(syntax_error_step(code, &err))]),
                stdout: String::new(),
            };
        }
    };

    let mut recorder = Recorder::new(options.budget.clone());
    let config = InterpreterConfig {
        budget: options.budget.clone(),
        line_snapshot: options.line_snapshot,
    };
    let mut interp = Interpreter::new(config);
    let hook: &mut dyn TraceHook = &mut recorder;
    let (outcome, stdout) = io::with_isolated_streams(&mut interp, input, move |interp| {
        let mut guard = interp.install_hook(hook);
        panic::catch_unwind(AssertUnwindSafe(|| guard.run_module(&program)))
    });
    let fault = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(flow)) => fault_step(&mut interp, flow),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(%message, "interpreter panicked");
            Some(ErrorStep {
                traceback: format_traceback(&[], &format!("SystemError: {message}")),
                error: message,
                kind: FaultKind::Runtime,
                line: None,
            })
        }
    };
    drop(interp);

    if let Some(step) = fault {
        recorder.record_fault(step);
    }
    RunResult {
        input: input.to_string(),
        trace: recorder.finish(),
        stdout,
    }
}

/// The terminal entry for a run that left the module frame with `flow`.
/// An uncaught `SystemExit` ends the run quietly.
fn fault_step(interp: &mut Interpreter<'_>, flow: Flow) -> Option<ErrorStep> {
    match flow {
        Flow::Raise(raised) => {
            let exception = raised.exception;
            if exception.exc_type == ExcType::SystemExit && exception.class.is_none() {
                return None;
            }
            let value = Value::Exception(exception.clone());
            let message = interp
                .str_of(&value)
                .unwrap_or_else(|_| plain_str(&value, &interp.ids));
            let type_name = exception.type_name();
            let last_line = if message.is_empty() {
                type_name
            } else {
                format!("{type_name}: {message}")
            };
            Some(ErrorStep {
                traceback: format_traceback(&raised.traceback, &last_line),
                error: message,
                kind: FaultKind::Runtime,
                line: raised.traceback.last().map(|entry| entry.line),
            })
        }
        Flow::Halt(halt) => Some(ErrorStep {
            traceback: format_traceback(
                &halt.traceback,
                &format!("{}: {}", halt.label, halt.message),
            ),
            line: halt.traceback.last().map(|entry| entry.line),
            error: halt.message,
            kind: halt.kind,
        }),
        Flow::Return(_) | Flow::Break | Flow::Continue => None,
    }
}

/// A parse failure rendered the way the reference runtime prints one.
/// Unsupported constructs are labelled `NotImplementedError`.
fn syntax_error_step(code: &str, err: &SyntaxError) -> ErrorStep {
    let mut traceback = String::from("Traceback (most recent call last):\n");
    traceback.push_str(&format!("  File \"<string>\", line {}\n", err.line));
    if let Some(source) = code.lines().nth(err.line.saturating_sub(1) as usize) {
        let trimmed = source.trim_start();
        let indent = source.chars().count() - trimmed.chars().count();
        let caret = (err.col as usize).saturating_sub(1).saturating_sub(indent);
        traceback.push_str(&format!("    {}\n", trimmed.trim_end()));
        traceback.push_str(&format!("    {}^\n", " ".repeat(caret)));
    }
    let (label, kind) = if err.unsupported {
        ("NotImplementedError", FaultKind::Unsupported)
    } else {
        ("SyntaxError", FaultKind::Syntax)
    };
    traceback.push_str(&format!("{label}: {}", err.message));
    ErrorStep {
        error: err.to_string(),
        traceback,
        kind,
        line: Some(err.line),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(code: &str) -> RunResult {
        ScriptTracer::default().trace(code, "").unwrap()
    }

    #[test]
    fn empty_source_has_an_empty_trace() {
        let result = trace("");
        assert!(result.trace.is_empty());
    }

    #[test]
    fn syntax_errors_become_a_single_error_step() {
        let result = trace("x = 1\nif x\n    y = 2\n");
        assert_eq!(result.trace.len(), 1);
        let error = result.trace.error().unwrap();
        assert_eq!(error.kind, FaultKind::Syntax);
        assert_eq!(error.line, Some(2));
        assert!(error.traceback.contains("    if x\n"));
        assert!(error.traceback.ends_with(&format!("SyntaxError: {}", error.error.split(" (<string>").next().unwrap())));
    }

    #[test]
    fn unsupported_constructs_are_not_syntax_errors() {
        let result = trace("def gen():\n    yield 1\n");
        assert_eq!(result.trace.len(), 1);
        let error = result.trace.error().unwrap();
        assert_eq!(error.kind, FaultKind::Unsupported);
        assert_eq!(error.line, Some(2));
        assert!(error
            .traceback
            .ends_with("NotImplementedError: generators ('yield') are not supported"));
    }

    #[test]
    fn uncaught_exceptions_end_the_trace() {
        let result = trace("def f():\n    raise ValueError('bad')\nf()\n");
        let error = result.trace.error().unwrap();
        assert_eq!(error.error, "bad");
        assert_eq!(error.kind, FaultKind::Runtime);
        assert_eq!(error.line, Some(2));
        assert_eq!(
            error.traceback,
            "Traceback (most recent call last):\n  File \"<string>\", line 3, in <module>\n  File \"<string>\", line 2, in f\nValueError: bad"
        );
    }

    #[test]
    fn system_exit_is_not_a_fault() {
        let result = trace("print('a')\nexit(0)\nprint('b')\n");
        assert!(result.trace.error().is_none());
        assert_eq!(result.stdout, "a\n");
    }

    #[test]
    fn input_is_read_from_the_run_input() {
        let result = ScriptTracer::default()
            .trace("n = int(input())\nprint(n * 2)\n", "21\n")
            .unwrap();
        assert_eq!(result.stdout, "42\n");
        assert_eq!(result.input, "21\n");
    }

    #[test]
    fn infinite_loops_hit_the_step_budget() {
        let options = TraceOptions {
            budget: TraceBudget {
                max_steps: 50,
                ..TraceBudget::default()
            },
            ..TraceOptions::default()
        };
        let result = ScriptTracer::new(options).trace("while True:\n    pass\n", "").unwrap();
        let error = result.trace.error().unwrap();
        assert_eq!(error.kind, FaultKind::ResourceExhausted);
        assert_eq!(result.trace.len(), 51);
    }
}
