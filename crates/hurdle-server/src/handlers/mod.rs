//! HTTP handler modules for the Hurdle API.
//!
//! Handlers parse requests, delegate to [`service`](crate::service) and
//! return JSON responses. No tracing logic lives in handlers.

pub mod meta;
pub mod simulate;
