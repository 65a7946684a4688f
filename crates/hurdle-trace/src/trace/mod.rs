//! Trace recording: the event recorder, snapshot serializer, run budget
//! and the wire types of a trace.

pub mod budget;
pub mod recorder;
pub mod serializer;
pub mod step;

pub use budget::TraceBudget;
pub use recorder::{Recorder, RETURN_KEY};
pub use serializer::{serialize, serialize_within, Encoded};
pub use step::{ErrorStep, InfoStep, Trace, TraceEntry, TraceStep};
