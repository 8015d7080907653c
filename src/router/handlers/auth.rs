//! Auth handlers

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub recovery_key: String,
}

/// Redeem the recovery key for a bearer token.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>> {
    let (token, user) = state
        .auth
        .login_with_recovery_key(&request.recovery_key)
        .await?;

    Ok(Json(json!({
        "token": token,
        "user": user,
    })))
}
