//! Server configuration from environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `HURDLE_HOST` | `0.0.0.0` |
//! | `HURDLE_PORT` | `8000` |
//! | `HURDLE_MAX_STEPS` | `10000` |
//! | `HURDLE_TIMEOUT_MS` | `5000` |
//! | `HURDLE_MAX_RECURSION` | `256` |
//! | `HURDLE_MAX_TRACE_VALUES` | `4000000` |
//! | `HURDLE_MAX_CONCURRENT_RUNS` | `4` |
//! | `HURDLE_WORKER_STACK_MB` | `64` |

use std::str::FromStr;
use std::time::Duration;

use hurdle_trace::TraceOptions;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} must be at least 1")]
    Zero { var: &'static str },
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Budget and worker settings handed to every tracer.
    pub trace: TraceOptions,
    /// Upper bound on submissions traced at the same time.
    pub max_concurrent_runs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            trace: TraceOptions::default(),
            max_concurrent_runs: 4,
        }
    }
}

impl ServerConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from `lookup`; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = ServerConfig::default();
        if let Some(host) = lookup("HURDLE_HOST") {
            config.host = host;
        }
        if let Some(port) = parsed(&lookup, "HURDLE_PORT")? {
            config.port = port;
        }

        let budget = &mut config.trace.budget;
        if let Some(steps) = positive(&lookup, "HURDLE_MAX_STEPS")? {
            budget.max_steps = steps;
        }
        if let Some(ms) = positive::<u64>(&lookup, "HURDLE_TIMEOUT_MS")? {
            budget.timeout = Duration::from_millis(ms);
        }
        if let Some(depth) = positive(&lookup, "HURDLE_MAX_RECURSION")? {
            budget.max_recursion_depth = depth;
        }
        if let Some(values) = positive(&lookup, "HURDLE_MAX_TRACE_VALUES")? {
            budget.max_trace_values = values;
        }
        if let Some(runs) = positive(&lookup, "HURDLE_MAX_CONCURRENT_RUNS")? {
            config.max_concurrent_runs = runs;
        }
        if let Some(mb) = positive::<usize>(&lookup, "HURDLE_WORKER_STACK_MB")? {
            config.trace.worker_stack_bytes = mb.saturating_mul(1024 * 1024);
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|err: T::Err| ConfigError::Invalid {
            var,
            reason: err.to_string(),
            value,
        })
}

fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    match parsed::<T>(lookup, var)? {
        Some(value) if value == T::default() => Err(ConfigError::Zero { var }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|var| env.get(var).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config(&[]).unwrap(), ServerConfig::default());
        assert_eq!(ServerConfig::default().addr(), "0.0.0.0:8000");
    }

    #[test]
    fn variables_override_defaults() {
        let config = config(&[
            ("HURDLE_HOST", "127.0.0.1"),
            ("HURDLE_PORT", "9000"),
            ("HURDLE_MAX_STEPS", "500"),
            ("HURDLE_TIMEOUT_MS", "250"),
            ("HURDLE_MAX_RECURSION", "64"),
            ("HURDLE_MAX_TRACE_VALUES", "1000"),
            ("HURDLE_MAX_CONCURRENT_RUNS", "2"),
            ("HURDLE_WORKER_STACK_MB", "16"),
        ])
        .unwrap();
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(config.trace.budget.max_steps, 500);
        assert_eq!(config.trace.budget.timeout, Duration::from_millis(250));
        assert_eq!(config.trace.budget.max_recursion_depth, 64);
        assert_eq!(config.trace.budget.max_trace_values, 1000);
        assert_eq!(config.max_concurrent_runs, 2);
        assert_eq!(config.trace.worker_stack_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = config(&[("HURDLE_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "HURDLE_PORT", .. }));
        assert!(err.to_string().starts_with("HURDLE_PORT: cannot parse \"eighty\""));
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert_eq!(
            config(&[("HURDLE_MAX_CONCURRENT_RUNS", "0")]).unwrap_err(),
            ConfigError::Zero {
                var: "HURDLE_MAX_CONCURRENT_RUNS"
            }
        );
    }
}
