use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::{handlers, middleware_layer, state::AppState};

/// Builds every route of the service. Transport layers (tracing, CORS, rate
/// limiting) are added by the binary.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route(
            "/api/tables/{table_id}/sessions",
            post(handlers::sessions::open_session),
        )
        .route(
            "/api/webhooks/{gateway}",
            post(handlers::webhooks::payment_callback),
        )
        .route("/ws", get(handlers::realtime::connect))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route(
            "/api/sessions/current/touch",
            post(handlers::sessions::touch_session),
        )
        .route(
            "/api/sessions/current/close",
            post(handlers::sessions::close_session),
        )
        .route(
            "/api/sessions/current/security-codes/redeem",
            post(handlers::sessions::redeem_security_code),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_session,
        ))
        .with_state(state.clone());

    let staff_routes = Router::new()
        .route(
            "/api/sessions/{session_id}/security-codes",
            post(handlers::sessions::issue_security_code),
        )
        .route("/api/events", post(handlers::events::emit_event))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_staff,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(staff_routes)
}
