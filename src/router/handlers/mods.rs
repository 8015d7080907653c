//! Mod file handlers
//!
//! Mods arrive through the chunked upload manager and are moved into the
//! server's mods directory on install.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::files::{FileInfo, ServerFiles, MODS_DIR};
use crate::router::AppState;

async fn server_files(state: &AppState, server_id: &Uuid) -> Result<ServerFiles> {
    let server = state
        .db
        .get_server(server_id)
        .await?
        .ok_or_else(|| Error::NotFound("server", server_id.to_string()))?;
    Ok(ServerFiles::new(server.data_path))
}

fn ensure_enabled(state: &AppState) -> Result<()> {
    if state.config.module.enabled {
        Ok(())
    } else {
        Err(Error::Precondition("mod management is disabled".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    #[serde(default)]
    pub path: String,
}

/// Browse a server's data directory.
pub async fn list_files(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
    axum::extract::Query(query): axum::extract::Query<ListFilesQuery>,
) -> Result<Json<Vec<FileInfo>>> {
    let files = server_files(&state, &server_id).await?;
    Ok(Json(files.list(&query.path).await?))
}

pub async fn list_mods(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<Vec<FileInfo>>> {
    ensure_enabled(&state)?;
    let files = server_files(&state, &server_id).await?;
    Ok(Json(
        files
            .list_mods(&state.config.module.allowed_extensions)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct InstallModRequest {
    /// A completed upload session holding the mod file
    pub session_id: Uuid,
    pub filename: String,
}

pub async fn install_mod(
    State(state): State<AppState>,
    Path(server_id): Path<Uuid>,
    Json(request): Json<InstallModRequest>,
) -> Result<Json<serde_json::Value>> {
    ensure_enabled(&state)?;

    let allowed = &state.config.module.allowed_extensions;
    let name_lower = request.filename.to_lowercase();
    if !allowed.iter().any(|ext| name_lower.ends_with(&ext.to_lowercase())) {
        return Err(Error::InvalidArgument(format!(
            "file extension not allowed; accepted: {}",
            allowed.join(", ")
        )));
    }

    let files = server_files(&state, &server_id).await?;
    let temp_path = state.uploads.finish(&request.session_id).await?;
    let dest = files
        .import(&temp_path, &format!("{}/{}", MODS_DIR, request.filename))
        .await?;

    Ok(Json(json!({
        "installed": request.filename,
        "path": dest,
    })))
}

pub async fn delete_mod(
    State(state): State<AppState>,
    Path((server_id, filename)): Path<(Uuid, String)>,
) -> Result<Json<serde_json::Value>> {
    ensure_enabled(&state)?;
    let files = server_files(&state, &server_id).await?;
    files.delete(&format!("{}/{}", MODS_DIR, filename)).await?;
    Ok(Json(json!({ "deleted": filename })))
}
