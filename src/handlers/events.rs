use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::{
    crypto::tokens::StaffClaims,
    error::{AppError, Result},
    models::events::DomainEvent,
    state::AppState,
};

#[derive(Serialize)]
pub struct EmitResponse {
    pub event: &'static str,
    pub delivered: usize,
}

/// Handles a domain mutation reported by the order/table back office.
///
/// Payment and session events have their own sources and are refused here.
pub async fn emit_event(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffClaims>,
    Json(event): Json<DomainEvent>,
) -> Result<impl IntoResponse> {
    if matches!(
        event,
        DomainEvent::PaymentSettled { .. } | DomainEvent::SessionEnded { .. }
    ) {
        return Err(AppError::Validation(format!(
            "{} events cannot be submitted",
            event.name()
        )));
    }

    state.orders.observe(&event);
    let delivered = state.router.emit(&event);

    tracing::info!(staff_id = %staff.sub, event = event.name(), delivered, "📣 Domain event emitted");

    Ok(Json(EmitResponse {
        event: event.name(),
        delivered,
    }))
}
