//! Simulation handler.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::error::ApiError;
use crate::schema::simulate::{SimulateRequest, SimulateResponse};
use crate::service;
use crate::state::AppState;

/// Traces a submission against each of its test cases.
///
/// `POST /simulate`
pub async fn simulate(
    State(state): State<AppState>,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> Result<Json<SimulateResponse>, ApiError> {
    let Json(req) = payload?;
    let response = service::simulate(&state, req).await?;
    Ok(Json(response))
}
