use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};

use crate::{
    crypto::tokens::{SessionClaims, StaffClaims, extract_bearer},
    error::{AppError, Result},
    state::AppState,
};

/// Extracts the bearer token from the request's `Authorization` header.
///
/// # Arguments
///
/// * `request` - The incoming request.
///
/// # Returns
///
/// The token, or `Unauthorized` if the header is missing or malformed.
fn bearer_token(request: &Request<Body>) -> Result<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer)
        .ok_or_else(|| {
            tracing::warn!("❌ No bearer token found");
            AppError::Unauthorized
        })
}

/// A middleware that requires a session token naming a live table session.
///
/// Each authenticated request counts as activity and slides the session's
/// expiry forward. On success the verified [`SessionClaims`] are inserted as
/// a request extension.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an `AppError`.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    tracing::debug!("🔐 Checking session token...");

    let claims: SessionClaims = state.tokens.verify(bearer_token(&request)?)?;

    if let Err(e) = state.sessions.touch(claims.session_id).await {
        if matches!(e, AppError::NotFound) {
            tracing::warn!(session_id = %claims.session_id, "❌ Session is no longer live");
        }
        return Err(e);
    }

    tracing::debug!(session_id = %claims.session_id, table_id = %claims.table_id, "✅ Session authenticated");

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// A middleware that requires an elevated staff token.
///
/// On success the verified [`StaffClaims`] are inserted as a request extension.
pub async fn require_staff(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let claims: StaffClaims = state.tokens.verify(bearer_token(&request)?)?;

    tracing::debug!(staff_id = %claims.sub, role = %claims.role, "✅ Staff authenticated");

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
