use std::sync::Arc;

use courier_handoff::api;
use courier_handoff::config::{Config, LogFormat};
use courier_handoff::engine;
use courier_handoff::error::AppError;
use courier_handoff::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;
    init_tracing(&config);

    tracing::info!(
        log_format = %config.log_format,
        ttl_secs = config.opportunity_ttl_secs,
        reassignment = ?config.reassignment_policy,
        multi_vendor = ?config.multi_vendor_policy,
        "configuration loaded"
    );

    let http_port = config.http_port;
    let (app_state, job_rx) = AppState::with_config(config);
    let shared_state = Arc::new(app_state);

    tokio::spawn(engine::assignment::run_assignment_worker(
        shared_state.clone(),
        job_rx,
    ));
    tokio::spawn(engine::sweeper::run_sweeper(shared_state.clone()));

    let app = api::rest::router(shared_state);

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::new(config.log_level.clone());
    match config.log_format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
