//! Service description handlers.

use axum::extract::State;
use axum::Json;

use crate::schema::languages::{LanguagesResponse, RootResponse};
use crate::service;
use crate::state::AppState;

/// `GET /`
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Hurdle tracing backend".to_string(),
    })
}

/// Lists registered languages and whether each really traces.
///
/// `GET /languages`
pub async fn languages(State(state): State<AppState>) -> Json<LanguagesResponse> {
    Json(service::languages(&state))
}
