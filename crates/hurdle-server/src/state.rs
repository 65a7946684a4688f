//! Application state shared by all handlers.

use std::sync::Arc;

use tokio::sync::Semaphore;

use hurdle_trace::TracerRegistry;

use crate::config::ServerConfig;

/// Shared application state for the HTTP server.
///
/// The registry is read-only after startup, so handlers share it without a
/// lock. The semaphore bounds how many submissions are traced at once.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TracerRegistry>,
    pub runs: Arc<Semaphore>,
}

impl AppState {
    /// Registers the default tracers with the configured budget.
    pub fn new(config: &ServerConfig) -> Self {
        let registry = TracerRegistry::with_defaults(config.trace.clone());
        AppState::with_registry(registry, config.max_concurrent_runs)
    }

    pub fn with_registry(registry: TracerRegistry, max_concurrent_runs: usize) -> Self {
        AppState {
            registry: Arc::new(registry),
            runs: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }
}
