//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::EngineError;
use crate::server::handlers::{
    apply_policy_handler, catalog_handler, catalog_install_all_handler, catalog_install_handler,
    destroy_problem_handler, get_task_handler, health_handler, list_problems_handler,
    list_tasks_handler, problem_action_handler, problem_address_handler, problem_status_handler,
    problem_tasks_handler, start_used_handler, stop_unused_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the API router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Problems
        .route("/problems", get(list_problems_handler))
        .route("/problems/{slug}", delete(destroy_problem_handler))
        .route("/problems/{slug}/status", get(problem_status_handler))
        .route("/problems/{slug}/address", get(problem_address_handler))
        .route("/problems/{slug}/tasks", get(problem_tasks_handler))
        .route(
            "/problems/{slug}/actions/{action}",
            post(problem_action_handler),
        )
        // Tasks
        .route("/tasks", get(list_tasks_handler))
        .route("/tasks/{id}", get(get_task_handler))
        // Catalog
        .route("/catalog", get(catalog_handler))
        .route("/catalog/install", post(catalog_install_handler))
        .route("/catalog/install-all", post(catalog_install_all_handler))
        // Policies
        .route("/policies/start-used", post(start_used_handler))
        .route("/policies/stop-unused", post(stop_unused_handler))
        .route("/policies/apply", post(apply_policy_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| EngineError::ServerError(e.to_string()))
    });

    Ok(handle)
}
