//! Submission handling between the HTTP layer and the tracers.
//!
//! Traces are CPU-bound and synchronous, so every submission runs on the
//! blocking pool while holding one permit of the run semaphore.

use tracing::{info, info_span};
use uuid::Uuid;

use hurdle_trace::run_all;

use crate::error::ApiError;
use crate::schema::languages::LanguagesResponse;
use crate::schema::simulate::{SimulateRequest, SimulateResponse};
use crate::state::AppState;

/// Traces `req.code` once per test case.
///
/// The language is checked before any code runs; an unknown one is a
/// [`ApiError::BadRequest`].
pub async fn simulate(
    state: &AppState,
    req: SimulateRequest,
) -> Result<SimulateResponse, ApiError> {
    state.registry.get(&req.language)?;

    let run_id = Uuid::new_v4();
    let permit = state
        .runs
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::InternalError("run queue is closed".to_string()))?;
    let registry = state.registry.clone();
    let span = info_span!(
        "simulate",
        %run_id,
        language = %req.language,
        testcases = req.testcases.len()
    );
    info!(%run_id, language = %req.language, "submission accepted");

    let results = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let _entered = span.enter();
        let tracer = registry.get(&req.language)?;
        run_all(tracer, &req.code, &req.testcases)
    })
    .await
    .map_err(|err| ApiError::InternalError(format!("trace task failed: {err}")))??;

    Ok(SimulateResponse {
        results: results.into_iter().map(Into::into).collect(),
    })
}

pub fn languages(state: &AppState) -> LanguagesResponse {
    LanguagesResponse {
        languages: state.registry.languages(),
    }
}
