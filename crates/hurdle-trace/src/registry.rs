//! Language dispatch: maps language identifiers to tracers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::TraceError;
use crate::trace::{InfoStep, Trace, TraceEntry};
use crate::tracer::{RunResult, ScriptTracer, TraceOptions};

/// A backend that traces programs of one language.
pub trait Tracer: Send + Sync {
    /// Identifier clients send in the `language` field.
    fn language(&self) -> &'static str;

    /// Whether the backend really executes code.
    fn implemented(&self) -> bool {
        true
    }

    /// Runs `code` once with `input` as its standard input.
    fn trace(&self, code: &str, input: &str) -> Result<RunResult, TraceError>;
}

/// Placeholder backend for a language that has no tracer yet. Every run
/// yields a single informational step.
#[derive(Debug, Clone)]
pub struct StubTracer {
    language: &'static str,
    display_name: &'static str,
}

impl StubTracer {
    pub fn new(language: &'static str, display_name: &'static str) -> Self {
        StubTracer {
            language,
            display_name,
        }
    }
}

impl Tracer for StubTracer {
    fn language(&self) -> &'static str {
        self.language
    }

    fn implemented(&self) -> bool {
        false
    }

    fn trace(&self, _code: &str, input: &str) -> Result<RunResult, TraceError> {
        Ok(RunResult {
            input: input.to_string(),
            trace: Trace::new(vec![TraceEntry::Info(InfoStep {
                message: format!("{} tracing not yet implemented", self.display_name),
            })]),
            stdout: String::new(),
        })
    }
}

/// A registered language as listed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub language: String,
    pub implemented: bool,
}

/// Tracers keyed by language identifier, in registration order.
#[derive(Default)]
pub struct TracerRegistry {
    tracers: IndexMap<&'static str, Box<dyn Tracer>>,
}

impl TracerRegistry {
    pub fn new() -> Self {
        TracerRegistry::default()
    }

    /// `python` backed by the script tracer and `cpp` as a stub.
    pub fn with_defaults(options: TraceOptions) -> Self {
        let mut registry = TracerRegistry::new();
        registry.register(ScriptTracer::new(options));
        registry.register(StubTracer::new("cpp", "C++"));
        registry
    }

    /// Adds `tracer`, replacing any tracer for the same language.
    pub fn register(&mut self, tracer: impl Tracer + 'static) {
        self.tracers.insert(tracer.language(), Box::new(tracer));
    }

    pub fn get(&self, language: &str) -> Result<&dyn Tracer, TraceError> {
        self.tracers
            .get(language)
            .map(|tracer| tracer.as_ref())
            .ok_or_else(|| TraceError::UnsupportedLanguage(language.to_string()))
    }

    pub fn languages(&self) -> Vec<LanguageInfo> {
        self.tracers
            .values()
            .map(|tracer| LanguageInfo {
                language: tracer.language().to_string(),
                implemented: tracer.implemented(),
            })
            .collect()
    }
}

impl std::fmt::Debug for TracerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracerRegistry")
            .field("languages", &self.tracers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_python_and_cpp() {
        let registry = TracerRegistry::with_defaults(TraceOptions::default());
        let languages = registry.languages();
        assert_eq!(
            languages,
            vec![
                LanguageInfo {
                    language: "python".to_string(),
                    implemented: true
                },
                LanguageInfo {
                    language: "cpp".to_string(),
                    implemented: false
                },
            ]
        );
    }

    #[test]
    fn unknown_languages_are_rejected() {
        let registry = TracerRegistry::with_defaults(TraceOptions::default());
        assert_eq!(
            registry.get("rust").err(),
            Some(TraceError::UnsupportedLanguage("rust".to_string()))
        );
    }

    #[test]
    fn stub_yields_one_info_step() {
        let result = StubTracer::new("cpp", "C++").trace("int main() {}", "5").unwrap();
        assert_eq!(result.input, "5");
        assert_eq!(
            result.trace.entries,
            vec![TraceEntry::Info(InfoStep {
                message: "C++ tracing not yet implemented".to_string()
            })]
        );
    }
}
