//! Runs one program against every submitted input.

use std::time::Instant;

use tracing::{error, info};

use crate::error::TraceError;
use crate::registry::Tracer;
use crate::tracer::RunResult;

/// Traces `code` once per input, in submission order. Every run gets a fresh
/// interpreter, so a fault in one run never affects the others.
pub fn run_all<T: Tracer + ?Sized>(
    tracer: &T,
    code: &str,
    inputs: &[String],
) -> Result<Vec<RunResult>, TraceError> {
    let started = Instant::now();
    let mut results = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        match tracer.trace(code, input) {
            Ok(result) => results.push(result),
            Err(err) => {
                error!(language = tracer.language(), index, %err, "trace run failed");
                return Err(err);
            }
        }
    }
    info!(
        language = tracer.language(),
        runs = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "traced submission"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{ScriptTracer, TraceOptions};

    #[test]
    fn one_result_per_input_in_order() {
        let tracer = ScriptTracer::new(TraceOptions::default());
        let inputs = vec!["1".to_string(), "oops".to_string(), "3".to_string()];
        let results = run_all(&tracer, "n = int(input())\nprint(n)\n", &inputs).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.input.as_str()).collect::<Vec<_>>(),
            ["1", "oops", "3"]
        );
        assert!(results[0].trace.error().is_none());
        assert!(results[1].trace.error().is_some());
        assert!(results[2].trace.error().is_none());
        assert_eq!(results[2].stdout, "3\n");
    }

    #[test]
    fn no_inputs_means_no_runs() {
        let tracer = ScriptTracer::new(TraceOptions::default());
        assert!(run_all(&tracer, "x = 1\n", &[]).unwrap().is_empty());
    }
}
