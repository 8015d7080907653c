//! HTTP router module
//!
//! JSON API over the orchestration subsystems: servers, tasks, uploads,
//! proxy control and auth. Every protected route carries the caller
//! identity resolved by the bearer middleware.

mod handlers;
mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::AuthService;
use crate::config::Configuration;
use crate::logstream::LogRegistry;
use crate::proxy::{ProxyServer, ProxyState};
use crate::reconciler::Reconciler;
use crate::scheduler::TaskScheduler;
use crate::store::Database;
use crate::upload::UploadManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub reconciler: Arc<Reconciler>,
    pub scheduler: Arc<TaskScheduler>,
    pub logs: Arc<LogRegistry>,
    pub uploads: Arc<UploadManager>,
    pub proxy_state: Arc<ProxyState>,
    pub proxy_server: Arc<ProxyServer>,
    pub auth: Arc<AuthService>,
    pub config: Arc<Configuration>,
}

/// Build the HTTP router with all routes
pub fn build_router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let protected = Router::new()
        .route("/system", get(handlers::system::system_info))
        // Server collection
        .route("/servers", get(handlers::servers::list_servers))
        .route("/servers", post(handlers::servers::create_server))
        // Individual servers
        .nest("/servers/:server_id", server_routes())
        // Tasks
        .route("/tasks", get(handlers::tasks::list_tasks))
        .route("/tasks", post(handlers::tasks::create_task))
        .route("/tasks/:task_id", get(handlers::tasks::get_task))
        .route("/tasks/:task_id", put(handlers::tasks::update_task))
        .route("/tasks/:task_id", delete(handlers::tasks::delete_task))
        .route("/tasks/:task_id/trigger", post(handlers::tasks::trigger_task))
        .route(
            "/tasks/:task_id/executions",
            get(handlers::tasks::list_executions),
        )
        .route(
            "/executions/:execution_id/cancel",
            post(handlers::tasks::cancel_execution),
        )
        // Proxy
        .route("/proxy/status", get(handlers::proxy::proxy_status))
        .route("/proxy/listeners", put(handlers::proxy::update_listeners))
        // Uploads
        .route("/uploads", post(handlers::uploads::init_upload))
        .route(
            "/uploads/:session_id/chunks/:index",
            put(handlers::uploads::write_chunk),
        )
        .route("/uploads/:session_id", get(handlers::uploads::upload_status))
        .route(
            "/uploads/:session_id",
            delete(handlers::uploads::cancel_upload),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let api = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Routes for individual server operations
fn server_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::servers::get_server))
        .route("/", put(handlers::servers::update_server))
        .route("/", delete(handlers::servers::delete_server))
        // Lifecycle
        .route("/start", post(handlers::servers::start_server))
        .route("/stop", post(handlers::servers::stop_server))
        .route("/restart", post(handlers::servers::restart_server))
        .route("/recreate", post(handlers::servers::recreate_server))
        // Console
        .route("/command", post(handlers::servers::send_command))
        .route("/logs", get(handlers::servers::get_logs))
        .route("/logs", delete(handlers::servers::clear_logs))
        // Settings
        .route("/config", get(handlers::servers::get_config))
        .route("/config", put(handlers::servers::put_config))
        // Files
        .route("/files", get(handlers::mods::list_files))
        // Mods
        .route("/mods", get(handlers::mods::list_mods))
        .route("/mods", post(handlers::mods::install_mod))
        .route("/mods/:filename", delete(handlers::mods::delete_mod))
}
