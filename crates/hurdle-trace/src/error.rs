//! Errors a trace request can fail with before or outside program execution.
//!
//! Faults of the traced program itself never show up here; they end the
//! trace with an [`ErrorStep`](crate::trace::ErrorStep).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// No tracer is registered for the requested language.
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    /// The worker thread running a trace could not start or died.
    #[error("trace worker failed: {0}")]
    Worker(String),
}
