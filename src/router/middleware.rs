//! Bearer-token identity middleware

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::auth::Claims;
use crate::error::Error;

use super::AppState;

/// Resolve the caller identity from the Authorization header and stash the
/// claims in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Precondition("missing bearer token".into()))?;

    let claims: Claims = state.auth.verify(token)?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
