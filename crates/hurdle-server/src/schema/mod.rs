//! API schema types for request/response definitions.
//!
//! Types use serde derives for JSON serialization/deserialization. Trace
//! entries reuse the wire types of `hurdle-trace` unchanged.

pub mod languages;
pub mod simulate;
