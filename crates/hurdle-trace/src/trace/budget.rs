//! Resource limits for one trace run.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::fault::FaultKind;
use crate::interpreter::Halt;

/// Step, time, depth and size limits that bound one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceBudget {
    /// Maximum number of recorded steps before the run is stopped.
    pub max_steps: usize,
    /// Wall-clock limit for the whole run.
    pub timeout: Duration,
    /// Maximum call depth, counting the module frame. Exceeding it raises a
    /// catchable `RecursionError`.
    pub max_recursion_depth: usize,
    /// Largest list, string or other container the program may build.
    pub max_collection_len: usize,
    /// Largest amount of text the program may print.
    pub max_output_bytes: usize,
    /// Total size of all recorded snapshots, in serialized values. Every
    /// JSON node counts one and strings one more per 8 bytes of text.
    pub max_trace_values: usize,
}

impl Default for TraceBudget {
    fn default() -> Self {
        TraceBudget {
            max_steps: 10_000,
            timeout: Duration::from_secs(5),
            max_recursion_depth: 256,
            max_collection_len: 1_000_000,
            max_output_bytes: 1 << 20,
            max_trace_values: 4_000_000,
        }
    }
}

impl TraceBudget {
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        start.checked_add(self.timeout)
    }
}

pub fn timeout_halt(budget: &TraceBudget) -> Halt {
    Halt::new(
        FaultKind::Timeout,
        "TimeoutError",
        format!(
            "execution exceeded the time limit of {} ms",
            budget.timeout.as_millis()
        ),
    )
}

pub fn step_limit_halt(budget: &TraceBudget) -> Halt {
    Halt::new(
        FaultKind::ResourceExhausted,
        "StepLimitExceeded",
        format!("execution exceeded the limit of {} steps", budget.max_steps),
    )
}

pub fn collection_halt(budget: &TraceBudget) -> Halt {
    Halt::new(
        FaultKind::ResourceExhausted,
        "MemoryError",
        format!(
            "collection size exceeds the limit of {} elements",
            budget.max_collection_len
        ),
    )
}

pub fn output_halt(budget: &TraceBudget) -> Halt {
    Halt::new(
        FaultKind::ResourceExhausted,
        "MemoryError",
        format!(
            "program output exceeds the limit of {} bytes",
            budget.max_output_bytes
        ),
    )
}

pub fn trace_size_halt(budget: &TraceBudget) -> Halt {
    Halt::new(
        FaultKind::ResourceExhausted,
        "MemoryError",
        format!(
            "recorded snapshots exceed the limit of {} values",
            budget.max_trace_values
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let budget = TraceBudget::default();
        assert_eq!(budget.max_steps, 10_000);
        assert_eq!(budget.timeout, Duration::from_secs(5));
        assert_eq!(budget.max_recursion_depth, 256);
        assert_eq!(budget.max_trace_values, 4_000_000);
    }

    #[test]
    fn halts_carry_their_kind() {
        let budget = TraceBudget::default();
        assert_eq!(timeout_halt(&budget).kind, FaultKind::Timeout);
        assert_eq!(step_limit_halt(&budget).kind, FaultKind::ResourceExhausted);
        assert!(step_limit_halt(&budget).message.contains("10000"));
    }
}
