//! Server setup and routing.

use axum::{
    routing::{get, post},
    Router,
};
use spool_engine::ModelRuntime;
use spool_worker::WorkerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{handlers, runner, state::AppState, Result};

/// Create the queue API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(handlers::handle_run))
        .route("/stream/:job_id", get(handlers::handle_stream))
        .route("/status/:job_id", get(handlers::handle_status))
        .route("/cancel/:job_id", get(handlers::handle_cancel))
        .route("/health", get(handlers::handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the queue API on an already bound listener.
///
/// Spawns the worker loop next to the HTTP server. Tests bind an ephemeral
/// port themselves and pass the listener in.
pub async fn serve(
    listener: TcpListener,
    config: WorkerConfig,
    runtime: Arc<dyn ModelRuntime>,
) -> Result<()> {
    let (state, queue) = AppState::new(config, runtime);
    tokio::spawn(runner::run_jobs(state.clone(), queue));
    let app = create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Bind and run the queue API server.
pub async fn run_server(
    addr: SocketAddr,
    config: WorkerConfig,
    runtime: Arc<dyn ModelRuntime>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("queue API listening on {}", addr);
    serve(listener, config, runtime).await
}
