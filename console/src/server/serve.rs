//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ConsoleError;
use crate::server::handlers::{
    cache_servers_handler, cache_status_handler, deploy_replication_handler, health_handler,
    job_handler, remove_replication_handler, save_cache_server_handler, servers_handler,
    submit_job_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the console API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Jobs
        .route("/jobs", post(submit_job_handler))
        .route("/jobs/{id}", get(job_handler))
        // Records
        .route("/servers", get(servers_handler))
        .route(
            "/cache-servers",
            get(cache_servers_handler).post(save_cache_server_handler),
        )
        .route("/cache/status", get(cache_status_handler))
        // Replication
        .route("/replication/{id}/deploy", post(deploy_replication_handler))
        .route("/replication/{id}/remove", post(remove_replication_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ConsoleError>>, ConsoleError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ConsoleError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ConsoleError::ServerError(e.to_string()))
    });

    Ok(handle)
}
