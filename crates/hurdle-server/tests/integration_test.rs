//! End-to-end tests for the Hurdle HTTP API.
//!
//! Requests go through the full stack: axum router -> handler -> service ->
//! tracer registry -> interpreter -> JSON response. Tests use
//! `tower::ServiceExt::oneshot` to send requests directly to the router
//! without starting a network server.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use tower::ServiceExt;

use hurdle_server::config::ServerConfig;
use hurdle_server::router::build_router;
use hurdle_server::state::AppState;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn test_app() -> Router {
    build_router(AppState::new(&ServerConfig::default()))
}

async fn read_json(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap_or(json!(null));
    (status, json)
}

async fn post_raw(app: &Router, path: &str, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn post_json(
    app: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    post_raw(app, path, serde_json::to_vec(&body).unwrap()).await
}

async fn get_json(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn simulate(code: &str, testcases: &[&str]) -> serde_json::Value {
    let (status, body) = post_json(
        &test_app(),
        "/simulate",
        json!({ "code": code, "language": "python", "testcases": testcases }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "simulate failed: {:?}", body);
    body
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn root_describes_the_service() {
    let (status, body) = get_json(&test_app(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Hurdle tracing backend" }));
}

#[tokio::test]
async fn languages_lists_registered_backends() {
    let (status, body) = get_json(&test_app(), "/languages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "languages": [
            { "language": "python", "implemented": true },
            { "language": "cpp", "implemented": false },
        ]})
    );
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulate_returns_one_trace_per_testcase() {
    let body = simulate("n = int(input())\nprint(n * n)\n", &["3", "4", "5"]).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    let inputs: Vec<&str> = results.iter().map(|r| r["input"].as_str().unwrap()).collect();
    assert_eq!(inputs, vec!["3", "4", "5"]);
    assert_eq!(results[1]["stdout"], json!("16\n"));

    let trace = results[0]["trace"].as_array().unwrap();
    assert_eq!(trace[0]["event"], json!("call"));
    assert_eq!(trace[0]["func_name"], json!("<module>"));
    assert_eq!(
        trace[1],
        json!({ "event": "line", "line": 1, "locals": { "n": 3 }, "func_name": "<module>" })
    );
    let last = trace.last().unwrap();
    assert_eq!(last["event"], json!("return"));
    assert_eq!(last["locals"]["__return__"], json!("None"));
}

#[tokio::test]
async fn simulate_reports_runtime_errors_in_the_trace() {
    let body = simulate("x = 1\nraise ValueError(\"bad\")\n", &[""]).await;
    let trace = body["results"][0]["trace"].as_array().unwrap();
    let last = trace.last().unwrap();
    assert_eq!(last["event"], json!("error"));
    assert_eq!(last["error"], json!("bad"));
    assert_eq!(last["kind"], json!("runtime"));
    assert_eq!(last["line"], json!(2));
    assert!(last["traceback"].as_str().unwrap().ends_with("ValueError: bad"));
    assert_eq!(trace.iter().filter(|e| e["event"] == json!("error")).count(), 1);
}

#[tokio::test]
async fn simulate_reports_syntax_errors_for_every_testcase() {
    let body = simulate("def f(:\n    pass\n", &["a", "b"]).await;
    for result in body["results"].as_array().unwrap() {
        let trace = result["trace"].as_array().unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0]["event"], json!("error"));
        assert_eq!(trace[0]["kind"], json!("syntax"));
    }
}

#[tokio::test]
async fn simulate_with_no_testcases_returns_no_results() {
    let body = simulate("print('never')\n", &[]).await;
    assert_eq!(body, json!({ "results": [] }));
}

#[tokio::test]
async fn cpp_returns_an_info_step_per_testcase() {
    let (status, body) = post_json(
        &test_app(),
        "/simulate",
        json!({ "code": "int main() {}", "language": "cpp", "testcases": ["1", "2"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        assert_eq!(
            result["trace"],
            json!([{ "event": "info", "message": "C++ tracing not yet implemented" }])
        );
    }
}

#[tokio::test]
async fn unknown_language_is_rejected() {
    let (status, body) = post_json(
        &test_app(),
        "/simulate",
        json!({ "code": "print(1)", "language": "cobol", "testcases": ["x"] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("BAD_REQUEST"));
    assert_eq!(body["error"]["message"], json!("unsupported language 'cobol'"));
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let app = test_app();

    let (status, body) = post_raw(&app, "/simulate", b"{not json".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("BAD_REQUEST"));

    let (status, body) = post_json(&app, "/simulate", json!({ "code": "x = 1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    let (status, _) = post_json(
        &app,
        "/simulate",
        json!({ "code": "x = 1", "language": "python", "testcases": "1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn budget_from_config_bounds_traces() {
    let mut config = ServerConfig::default();
    config.trace.budget.max_steps = 20;
    let app = build_router(AppState::new(&config));
    let (status, body) = post_json(
        &app,
        "/simulate",
        json!({ "code": "while True:\n    pass\n", "language": "python", "testcases": [""] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let trace = body["results"][0]["trace"].as_array().unwrap();
    assert_eq!(trace.len(), 21);
    assert_eq!(trace[20]["kind"], json!("resource_exhausted"));
}

#[tokio::test]
async fn concurrent_submissions_all_complete() {
    let app = build_router(AppState::with_registry(
        hurdle_trace::TracerRegistry::with_defaults(Default::default()),
        1,
    ));
    let requests = (0..4).map(|i| {
        let app = app.clone();
        async move {
            post_json(
                &app,
                "/simulate",
                json!({ "code": "print(input())", "language": "python", "testcases": [i.to_string()] }),
            )
            .await
        }
    });
    let responses = spawn_all(requests).await;
    for (i, (status, body)) in responses.into_iter().enumerate() {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["stdout"], json!(format!("{i}\n")));
    }
}

async fn spawn_all<F, T>(futures: impl Iterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = futures.map(tokio::spawn).collect();
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}
