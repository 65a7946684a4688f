//! HTTP/JSON API for the Hurdle step tracer.
//!
//! Accepts a program with a list of test-case inputs, traces it once per
//! input with the tracer registered for its language and returns every
//! trace. This crate contains the server framework, API schema types,
//! error handling, configuration and route definitions.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod schema;
pub mod service;
pub mod state;
