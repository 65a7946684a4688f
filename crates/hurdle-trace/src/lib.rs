//! Step tracing for the scripting language.
//!
//! Runs a program against one input at a time and records every call, line
//! and return event as a [`TraceStep`] with a snapshot of the frame's
//! locals. Faults of the program end the trace with an [`ErrorStep`]
//! instead of escaping to the caller.
//!
//! # Modules
//!
//! - [`interpreter`] -- Tree-walking interpreter with an event hook
//! - [`trace`] -- Event recorder, snapshot serializer, budget and wire types
//! - [`io`] -- Per-run stdin/stdout isolation
//! - [`tracer`] -- Runs one (code, input) pair on a worker thread
//! - [`registry`] -- `Tracer` trait and the language registry
//! - [`orchestrator`] -- One run per submitted input

pub mod error;
pub mod fault;
pub mod interpreter;
pub mod io;
pub mod orchestrator;
pub mod registry;
pub mod trace;
pub mod tracer;

pub use error::TraceError;
pub use fault::FaultKind;
pub use interpreter::LineSnapshot;
pub use orchestrator::run_all;
pub use registry::{LanguageInfo, StubTracer, Tracer, TracerRegistry};
pub use trace::{ErrorStep, InfoStep, Trace, TraceBudget, TraceEntry, TraceStep};
pub use tracer::{run_traced, RunResult, ScriptTracer, TraceOptions};
