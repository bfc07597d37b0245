use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::tokens::{SessionClaims, StaffClaims, extract_bearer},
    error::{AppError, Result},
    models::session::{SessionId, TableId},
    models::staff::StaffRole,
    services::sessions::CodeAction,
    state::AppState,
};

/// The request payload for opening a table session.
#[derive(Deserialize, Debug, Default)]
pub struct OpenSessionRequest {
    #[serde(default)]
    pub device_id: Option<String>,
}

/// The response payload for an opened session.
#[derive(Serialize)]
pub struct OpenSessionResponse {
    pub session_id: SessionId,
    pub table_id: TableId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The response payload for session mutations.
#[derive(Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub message: String,
}

/// The request payload for issuing a security code.
#[derive(Deserialize, Debug)]
pub struct IssueCodeRequest {
    pub action: CodeAction,
}

/// The request payload for redeeming a security code.
#[derive(Deserialize)]
pub struct RedeemCodeRequest {
    pub action: CodeAction,
    pub code: String,
}

/// A staff role carried by an optional staff bearer on the open request.
fn acting_role(state: &AppState, headers: &HeaderMap) -> Option<StaffRole> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer)?;
    state
        .tokens
        .verify::<StaffClaims>(token)
        .ok()
        .map(|claims| claims.role)
}

/// Handles a QR scan: opens a fresh session for the table and returns its token.
///
/// A staff bearer, when present, makes the session token carry that staff role.
pub async fn open_session(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<impl IntoResponse> {
    let table_id = TableId::new(table_id.trim());
    if table_id.as_str().is_empty() {
        return Err(AppError::Validation("Table id cannot be empty".to_string()));
    }

    tracing::info!(table_id = %table_id, "📱 Session requested");

    let role = acting_role(&state, &headers);
    let session = state.sessions.open(table_id, payload.device_id).await?;

    let claims = state.tokens.session_claims(
        session.session_id,
        session.table_id.clone(),
        session.device_id.clone(),
        role,
    );
    let token = state.tokens.mint(&claims)?;

    Ok((
        StatusCode::CREATED,
        Json(OpenSessionResponse {
            session_id: session.session_id,
            table_id: session.table_id,
            token,
            expires_at: session.expires_at,
        }),
    ))
}

/// Handles session activity refreshes.
pub async fn touch_session(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse> {
    state.sessions.touch(claims.session_id).await?;

    Ok(Json(SessionResponse {
        success: true,
        message: "Session refreshed".to_string(),
    }))
}

/// Handles a customer leaving the table.
pub async fn close_session(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse> {
    state.sessions.close(claims.session_id).await?;

    Ok(Json(SessionResponse {
        success: true,
        message: "Session closed".to_string(),
    }))
}

/// Handles a staff member issuing a security code for a table session.
pub async fn issue_security_code(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffClaims>,
    Path(session_id): Path<String>,
    Json(payload): Json<IssueCodeRequest>,
) -> Result<impl IntoResponse> {
    let session_id: SessionId = session_id.parse()?;

    tracing::info!(staff_id = %staff.sub, session_id = %session_id, action = ?payload.action, "🔑 Security code requested");

    let issued = state
        .sessions
        .issue_security_code(session_id, payload.action)
        .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// Handles a customer redeeming a staff-issued code.
///
/// Redeeming a `close_session` code also ends the session.
pub async fn redeem_security_code(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(payload): Json<RedeemCodeRequest>,
) -> Result<impl IntoResponse> {
    state
        .sessions
        .redeem_security_code(claims.session_id, payload.action, &payload.code)
        .await?;

    if payload.action == CodeAction::CloseSession {
        state.sessions.close(claims.session_id).await?;
    }

    Ok(Json(SessionResponse {
        success: true,
        message: "Security code accepted".to_string(),
    }))
}
