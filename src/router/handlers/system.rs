//! System info handler

use axum::{extract::State, Json};
use serde_json::json;

use crate::error::Result;
use crate::model::ServerStatus;
use crate::router::AppState;

pub async fn system_info(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let servers = state.db.list_servers().await?;
    let running = servers
        .iter()
        .filter(|s| s.status == ServerStatus::Running)
        .count();

    Ok(Json(json!({
        "name": "discopanel",
        "version": env!("CARGO_PKG_VERSION"),
        "servers": servers.len(),
        "running_servers": running,
        "live_executions": state.scheduler.live_executions(),
        "proxy": state.proxy_state.status(),
    })))
}
