//! Binary entrypoint for the Hurdle HTTP server.
//!
//! Configuration comes from `HURDLE_*` environment variables (see
//! [`hurdle_server::config`]); log filtering from `RUST_LOG`.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use hurdle_server::config::ServerConfig;
use hurdle_server::router::build_router;
use hurdle_server::state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("invalid configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let app = build_router(AppState::new(&config));

    let addr = config.addr();
    tracing::info!(
        max_steps = config.trace.budget.max_steps,
        max_concurrent_runs = config.max_concurrent_runs,
        "hurdle server starting on {}",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("cannot bind {}: {}", addr, err);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
