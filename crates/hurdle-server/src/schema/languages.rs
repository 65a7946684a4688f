//! Service description types.

use serde::Serialize;

use hurdle_trace::LanguageInfo;

/// Response of `GET /`.
#[derive(Debug, Clone, Serialize)]
pub struct RootResponse {
    pub message: String,
}

/// Response of `GET /languages`, in registration order.
#[derive(Debug, Clone, Serialize)]
pub struct LanguagesResponse {
    pub languages: Vec<LanguageInfo>,
}
