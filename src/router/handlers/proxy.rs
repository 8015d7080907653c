//! Proxy service handlers

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::error::Result;
use crate::proxy::ProxyStatus;
use crate::router::AppState;

pub async fn proxy_status(State(state): State<AppState>) -> Result<Json<ProxyStatus>> {
    Ok(Json(state.proxy_state.status()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateListenersRequest {
    pub listeners: Vec<u16>,
}

/// Rebind the listener set; unchanged listeners keep serving.
pub async fn update_listeners(
    State(state): State<AppState>,
    Json(request): Json<UpdateListenersRequest>,
) -> Result<Json<ProxyStatus>> {
    state.proxy_server.update_listeners(request.listeners).await?;
    Ok(Json(state.proxy_state.status()))
}
