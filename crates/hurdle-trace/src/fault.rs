//! Classification of terminal trace entries.

use serde::{Deserialize, Serialize};

/// Why a run ended in an [`ErrorStep`](crate::trace::ErrorStep).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The source failed to parse; nothing executed.
    Syntax,
    /// The source uses a language feature the interpreter lacks; nothing
    /// executed.
    Unsupported,
    /// The program raised an exception nothing caught.
    Runtime,
    /// The wall-clock deadline passed.
    Timeout,
    /// A step, size or output limit was exceeded.
    ResourceExhausted,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::Syntax => "syntax",
            FaultKind::Unsupported => "unsupported",
            FaultKind::Runtime => "runtime",
            FaultKind::Timeout => "timeout",
            FaultKind::ResourceExhausted => "resource_exhausted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&FaultKind::ResourceExhausted).unwrap();
        assert_eq!(json, "\"resource_exhausted\"");
        assert_eq!(FaultKind::ResourceExhausted.as_str(), "resource_exhausted");
        assert_eq!(serde_json::to_string(&FaultKind::Unsupported).unwrap(), "\"unsupported\"");
    }
}
