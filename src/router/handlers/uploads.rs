//! Upload service handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::Result;
use crate::router::AppState;
use crate::upload::{ChunkResult, UploadStatus};

#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
}

pub async fn init_upload(
    State(state): State<AppState>,
    Json(request): Json<InitUploadRequest>,
) -> Result<Json<serde_json::Value>> {
    let session_id = state
        .uploads
        .init(&request.filename, request.total_size, request.chunk_size)
        .await?;

    let status = state.uploads.status(&session_id).await?;
    Ok(Json(json!({
        "session_id": session_id,
        "total_chunks": status.total_chunks,
    })))
}

pub async fn write_chunk(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(Uuid, u32)>,
    body: Bytes,
) -> Result<Json<ChunkResult>> {
    Ok(Json(
        state.uploads.write_chunk(&session_id, index, &body).await?,
    ))
}

pub async fn upload_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<UploadStatus>> {
    Ok(Json(state.uploads.status(&session_id).await?))
}

pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    state.uploads.cancel(&session_id).await?;
    Ok(Json(json!({ "cancelled": true })))
}
