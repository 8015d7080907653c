//! Server lifecycle and console handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::logstream::LogEntry;
use crate::minecraft;
use crate::model::{normalize_hostname, Server};
use crate::reconciler::CreateServerRequest;
use crate::router::AppState;
use crate::store::SettingRow;

pub async fn list_servers(State(state): State<AppState>) -> Result<Json<Vec<Server>>> {
    Ok(Json(state.db.list_servers().await?))
}

pub async fn create_server(
    State(state): State<AppState>,
    Json(request): Json<CreateServerRequest>,
) -> Result<Json<Server>> {
    Ok(Json(state.reconciler.create(request).await?))
}

async fn load_server(state: &AppState, id: &Uuid) -> Result<Server> {
    state
        .db
        .get_server(id)
        .await?
        .ok_or_else(|| Error::NotFound("server", id.to_string()))
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<Server>> {
    Ok(Json(load_server(&state, &server_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub memory_mb: Option<u32>,
    pub auto_start: Option<bool>,
    pub detached: Option<bool>,
    /// Empty string clears the hostname
    pub proxy_hostname: Option<String>,
}

pub async fn update_server(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
    Json(request): Json<UpdateServerRequest>,
) -> Result<Json<Server>> {
    let mut server = load_server(&state, &server_id).await?;

    if let Some(name) = request.name {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("server name must not be empty".into()));
        }
        server.name = name;
    }
    if let Some(description) = request.description {
        server.description = description;
    }
    if let Some(memory_mb) = request.memory_mb {
        if memory_mb < 256 {
            return Err(Error::InvalidArgument("memory_mb must be at least 256".into()));
        }
        server.memory_mb = memory_mb;
    }
    if let Some(auto_start) = request.auto_start {
        server.auto_start = auto_start;
    }
    if let Some(detached) = request.detached {
        server.detached = detached;
    }
    if let Some(hostname) = request.proxy_hostname {
        server.proxy_hostname = if hostname.trim().is_empty() {
            None
        } else {
            Some(normalize_hostname(&hostname))
        };
    }

    state.db.update_server(&server).await?;
    state.reconciler.publish_route(&server).await?;
    Ok(Json(server))
}

pub async fn delete_server(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    state.reconciler.delete(&server_id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn start_server(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<Server>> {
    Ok(Json(state.reconciler.start(&server_id).await?))
}

pub async fn stop_server(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<Server>> {
    Ok(Json(state.reconciler.stop(&server_id).await?))
}

pub async fn restart_server(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<Server>> {
    Ok(Json(state.reconciler.restart(&server_id).await?))
}

pub async fn recreate_server(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<Server>> {
    Ok(Json(state.reconciler.recreate(&server_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

pub async fn send_command(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<serde_json::Value>> {
    let (output, success) = state
        .reconciler
        .exec_command(&server_id, &request.command)
        .await?;

    Ok(Json(json!({
        "output": output,
        "success": success,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

pub async fn get_logs(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>> {
    let server = load_server(&state, &server_id).await?;
    let container_id = server
        .container_id
        .as_deref()
        .ok_or_else(|| Error::Precondition("server has no container".into()))?;

    Ok(Json(state.logs.read(container_id, query.limit)))
}

pub async fn clear_logs(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let server = load_server(&state, &server_id).await?;
    let container_id = server
        .container_id
        .as_deref()
        .ok_or_else(|| Error::Precondition("server has no container".into()))?;

    state.logs.clear(container_id);
    Ok(Json(json!({ "cleared": true })))
}

pub async fn get_config(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<Vec<SettingRow>>> {
    load_server(&state, &server_id).await?;
    Ok(Json(state.db.get_settings(&server_id).await?))
}

pub async fn put_config(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
    Json(rows): Json<Vec<SettingRow>>,
) -> Result<Json<Vec<SettingRow>>> {
    load_server(&state, &server_id).await?;

    for row in &rows {
        minecraft::validate_setting(&row.key, &row.value).map_err(Error::InvalidArgument)?;
    }

    state.db.put_settings(&server_id, &rows).await?;
    Ok(Json(state.db.get_settings(&server_id).await?))
}
