//! Simulation request/response types.

use serde::{Deserialize, Serialize};

use hurdle_trace::{RunResult, Trace};

/// A submission: one program, run once per test case.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulateRequest {
    pub code: String,
    /// Language identifier, e.g. `python`.
    pub language: String,
    /// Standard input of each run.
    pub testcases: Vec<String>,
}

/// One run's trace, keyed by the input it ran with.
#[derive(Debug, Clone, Serialize)]
pub struct SimulateResult {
    pub input: String,
    pub trace: Trace,
    pub stdout: String,
}

impl From<RunResult> for SimulateResult {
    fn from(run: RunResult) -> Self {
        SimulateResult {
            input: run.input,
            trace: run.trace,
            stdout: run.stdout,
        }
    }
}

/// Response of `POST /simulate`, in test-case order.
#[derive(Debug, Clone, Serialize)]
pub struct SimulateResponse {
    pub results: Vec<SimulateResult>,
}
