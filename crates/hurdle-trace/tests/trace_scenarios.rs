//! End-to-end trace scenarios through the public tracer API.

use hurdle_trace::{
    run_all, FaultKind, LineSnapshot, RunResult, ScriptTracer, TraceBudget, TraceEntry,
    TraceOptions, TraceStep, Tracer, TracerRegistry,
};
use serde_json::json;
use std::time::{Duration, Instant};

fn trace(code: &str) -> RunResult {
    ScriptTracer::default().trace(code, "").unwrap()
}

fn events(result: &RunResult) -> Vec<&'static str> {
    result.trace.entries.iter().map(TraceEntry::event).collect()
}

fn lines(result: &RunResult) -> Vec<&TraceStep> {
    result
        .trace
        .entries
        .iter()
        .filter_map(|entry| match entry {
            TraceEntry::Line(step) => Some(step),
            _ => None,
        })
        .collect()
}

#[test]
fn straight_line_module() {
    let result = trace("x = 1\ny = x + 1\n");
    assert_eq!(events(&result), ["call", "line", "line", "return"]);

    let line_steps = lines(&result);
    assert_eq!(line_steps[0].line, 1);
    assert_eq!(json!(line_steps[0].locals), json!({"x": 1}));
    assert_eq!(line_steps[1].line, 2);
    assert_eq!(json!(line_steps[1].locals), json!({"x": 1, "y": 2}));

    let Some(TraceEntry::Return(last)) = result.trace.last() else {
        panic!("expected a trailing return step");
    };
    assert_eq!(last.func_name, "<module>");
    assert_eq!(json!(last.locals), json!({"x": 1, "y": 2, "__return__": "None"}));
}

#[test]
fn before_mode_snapshots_precede_the_statement() {
    let options = TraceOptions {
        line_snapshot: LineSnapshot::Before,
        ..TraceOptions::default()
    };
    let result = ScriptTracer::new(options)
        .trace("x = 1\ny = x + 1\n", "")
        .unwrap();
    let line_steps = lines(&result);
    assert_eq!(line_steps.len(), 2);
    assert_eq!(json!(line_steps[0].locals), json!({}));
    assert_eq!(json!(line_steps[1].locals), json!({"x": 1}));
}

#[test]
fn uncaught_exception_ends_with_an_error_step() {
    let result = trace("def f():\n    raise ValueError(\"bad\")\nf()\n");
    let error = result.trace.error().unwrap();
    assert_eq!(error.error, "bad");
    assert_eq!(error.kind, FaultKind::Runtime);
    assert!(error.traceback.starts_with("Traceback (most recent call last):\n"));
    assert!(error.traceback.ends_with("ValueError: bad"));
    assert!(matches!(result.trace.last(), Some(TraceEntry::Error(_))));
    assert_eq!(
        result
            .trace
            .entries
            .iter()
            .filter(|entry| matches!(entry, TraceEntry::Error(_)))
            .count(),
        1
    );
}

#[test]
fn function_calls_bind_arguments_and_report_returns() {
    let code = "def add(a, b):\n    c = a + b\n    return c\nr = add(1, 2)\n";
    let result = trace(code);
    let calls: Vec<&TraceStep> = result
        .trace
        .entries
        .iter()
        .filter_map(|entry| match entry {
            TraceEntry::Call(step) if step.func_name == "add" => Some(step),
            _ => None,
        })
        .collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].line, 1);
    assert_eq!(json!(calls[0].locals), json!({"a": 1, "b": 2}));

    let returned = result
        .trace
        .entries
        .iter()
        .find_map(|entry| match entry {
            TraceEntry::Return(step) if step.func_name == "add" => Some(step),
            _ => None,
        })
        .unwrap();
    assert_eq!(returned.line, 3);
    assert_eq!(returned.locals["__return__"], json!("3"));
    assert_eq!(returned.locals["c"], json!(3));

    let Some(TraceEntry::Return(last)) = result.trace.last() else {
        panic!("expected a trailing return step");
    };
    assert_eq!(last.locals["r"], json!(3));
}

const DFS: &str = "\
graph = {
    'A': ['B', 'C'],
    'B': ['D', 'E'],
    'C': ['F'],
    'D': [],
    'E': ['F'],
    'F': [],
}

def dfs(node, visited):
    if node in visited:
        return
    visited.append(node)
    for neighbour in graph[node]:
        dfs(neighbour, visited)

order = []
dfs('A', order)
print(order)
";

#[test]
fn depth_first_search_over_six_nodes() {
    let result = trace(DFS);
    assert!(result.trace.error().is_none());
    assert_eq!(result.stdout, "['A', 'B', 'D', 'E', 'F', 'C']\n");

    let dfs_calls = result
        .trace
        .entries
        .iter()
        .filter(|entry| matches!(entry, TraceEntry::Call(step) if step.func_name == "dfs"))
        .count();
    let dfs_returns = result
        .trace
        .entries
        .iter()
        .filter(|entry| matches!(entry, TraceEntry::Return(step) if step.func_name == "dfs"))
        .count();
    assert_eq!(dfs_calls, 7);
    assert_eq!(dfs_returns, 7);

    for step in result.trace.steps().filter(|step| step.func_name == "dfs") {
        assert!(step.locals.contains_key("visited"));
        assert!(step.locals.contains_key("node"));
    }
    let Some(TraceEntry::Return(last)) = result.trace.last() else {
        panic!("expected a trailing return step");
    };
    assert_eq!(last.locals["order"], json!(["A", "B", "D", "E", "F", "C"]));
}

#[test]
fn only_return_steps_carry_dunder_names() {
    let code = "class Box:\n    def __init__(self, v):\n        self.v = v\nb = Box(2)\nitems = {1, 2}\n";
    let result = trace(code);
    for entry in &result.trace.entries {
        let (step, is_return) = match entry {
            TraceEntry::Return(step) => (step, true),
            TraceEntry::Call(step) | TraceEntry::Line(step) => (step, false),
            _ => continue,
        };
        for name in step.locals.keys() {
            if is_return && name == "__return__" {
                continue;
            }
            assert!(!name.starts_with("__"), "{name} leaked into {}", entry.event());
        }
    }
    let Some(TraceEntry::Return(last)) = result.trace.last() else {
        panic!("expected a trailing return step");
    };
    assert_eq!(last.locals["items"], json!("{1, 2}"));
    assert!(last.locals["b"].is_string());
}

#[test]
fn traces_are_deterministic() {
    let code = "class P:\n    pass\np = P()\nxs = [p, object()]\nprint(id(p) == id(xs[0]))\n";
    let first = trace(code);
    let second = trace(code);
    assert_eq!(first, second);
    assert_eq!(first.stdout, "True\n");
}

#[test]
fn each_input_runs_in_isolation() {
    let code = "total = 0\nfor token in input().split():\n    total += int(token)\nprint(total)\n";
    let inputs = vec!["1 2 3".to_string(), "x".to_string(), "10".to_string()];
    let results = run_all(&ScriptTracer::default(), code, &inputs).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].stdout, "6\n");
    assert!(results[0].trace.error().is_none());
    let error = results[1].trace.error().unwrap();
    assert_eq!(error.error, "invalid literal for int() with base 10: 'x'");
    assert_eq!(results[2].stdout, "10\n");
    assert!(results[2].trace.error().is_none());
}

#[test]
fn caught_exceptions_do_not_end_the_trace() {
    let code = "try:\n    1 / 0\nexcept ZeroDivisionError as e:\n    msg = str(e)\nprint(msg)\n";
    let result = trace(code);
    assert!(result.trace.error().is_none());
    assert_eq!(result.stdout, "division by zero\n");
}

#[test]
fn runaway_recursion_is_a_recursion_error() {
    let result = trace("def f(n):\n    return f(n + 1)\nf(0)\n");
    let error = result.trace.error().unwrap();
    assert_eq!(error.kind, FaultKind::Runtime);
    assert!(error.traceback.contains("RecursionError"));
}

#[test]
fn the_step_budget_bounds_every_trace() {
    let options = TraceOptions {
        budget: TraceBudget {
            max_steps: 100,
            ..TraceBudget::default()
        },
        ..TraceOptions::default()
    };
    let result = ScriptTracer::new(options)
        .trace("i = 0\nwhile True:\n    i += 1\n", "")
        .unwrap();
    assert_eq!(result.trace.steps().count(), 100);
    assert_eq!(
        result.trace.error().map(|error| error.kind),
        Some(FaultKind::ResourceExhausted)
    );
}

fn trace_with(budget: TraceBudget, code: &str) -> RunResult {
    let options = TraceOptions {
        budget,
        ..TraceOptions::default()
    };
    ScriptTracer::new(options).trace(code, "").unwrap()
}

#[test]
fn infinite_loops_end_in_a_timeout() {
    let budget = TraceBudget {
        max_steps: usize::MAX,
        timeout: Duration::from_millis(50),
        ..TraceBudget::default()
    };
    let started = Instant::now();
    let result = trace_with(budget, "while True:\n    pass\n");
    assert!(started.elapsed() < Duration::from_secs(5));
    let error = result.trace.error().unwrap();
    assert_eq!(error.kind, FaultKind::Timeout);
    assert!(error.traceback.contains("TimeoutError"));
}

#[test]
fn oversized_collections_are_refused() {
    let result = trace("x = [0] * 10000000\n");
    let error = result.trace.error().unwrap();
    assert_eq!(error.kind, FaultKind::ResourceExhausted);
    assert_eq!(
        error.error,
        "collection size exceeds the limit of 1000000 elements"
    );
    assert_eq!(error.line, Some(1));
}

#[test]
fn runaway_output_is_cut_off() {
    let budget = TraceBudget {
        max_output_bytes: 1000,
        ..TraceBudget::default()
    };
    let result = trace_with(budget, "while True:\n    print(\"x\" * 100)\n");
    let error = result.trace.error().unwrap();
    assert_eq!(error.kind, FaultKind::ResourceExhausted);
    assert_eq!(error.error, "program output exceeds the limit of 1000 bytes");
    assert!(result.trace.steps().count() < 50);
}

#[test]
fn large_snapshots_exhaust_the_trace_size_budget() {
    let budget = TraceBudget {
        max_trace_values: 20_000,
        ..TraceBudget::default()
    };
    let result = trace_with(budget, "xs = list(range(1000))\nfor i in range(100):\n    pass\n");
    let error = result.trace.error().unwrap();
    assert_eq!(error.kind, FaultKind::ResourceExhausted);
    assert_eq!(error.error, "recorded snapshots exceed the limit of 20000 values");
    assert!(result.trace.steps().count() <= 25);
}

#[test]
fn million_element_snapshots_stop_after_a_few_steps() {
    let result = trace("x = [0] * 999999\nfor i in range(200):\n    pass\n");
    let error = result.trace.error().unwrap();
    assert_eq!(error.kind, FaultKind::ResourceExhausted);
    assert!(error.error.starts_with("recorded snapshots exceed"));
    assert!(result.trace.steps().count() <= 5);
}

#[test]
fn stub_languages_return_a_single_info_step() {
    let registry = TracerRegistry::with_defaults(TraceOptions::default());
    let tracer = registry.get("cpp").unwrap();
    let inputs = vec!["a".to_string(), "b".to_string()];
    let results = run_all(tracer, "int main() {}", &inputs).unwrap();
    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.trace.len(), 1);
        assert_eq!(
            serde_json::to_value(&result.trace).unwrap(),
            json!([{"event": "info", "message": "C++ tracing not yet implemented"}])
        );
    }
}

#[test]
fn wire_shape_of_a_line_step() {
    let result = trace("x = [1, 'a', None, 2.5, {'k': (1, 2)}]\n");
    let json = serde_json::to_value(&result.trace).unwrap();
    assert_eq!(
        json[1],
        json!({
            "event": "line",
            "line": 1,
            "locals": {"x": [1, "a", null, 2.5, {"k": [1, 2]}]},
            "func_name": "<module>"
        })
    );
}
