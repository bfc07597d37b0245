use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Serialize;

use crate::{
    crypto::webhook::Gateway,
    error::{AppError, Result},
    models::events::DomainEvent,
    state::AppState,
};

#[derive(Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

/// Handles a payment gateway callback.
///
/// Nothing is read from the payload, and nothing is emitted, until its
/// signature checks out.
pub async fn payment_callback(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let gateway: Gateway = gateway.parse()?;
    let verifier = state.webhooks.for_gateway(gateway);

    let authentic = verifier
        .supplied_signature(&headers, &body)
        .is_some_and(|signature| verifier.verify(&body, &signature));
    if !authentic {
        tracing::warn!(%gateway, "❌ Webhook signature rejected");
        return Err(AppError::SignatureMismatch(gateway));
    }

    let settlement = verifier.settlement(&body)?;
    let table_id = state.orders.table_for(&settlement.order_id);
    if table_id.is_none() {
        tracing::warn!(%gateway, order_id = %settlement.order_id, "Payment for an order with no known table");
    }

    tracing::info!(
        %gateway,
        order_id = %settlement.order_id,
        status = ?settlement.status,
        "💳 Payment callback verified"
    );

    state.router.emit(&DomainEvent::PaymentSettled {
        order_id: settlement.order_id,
        table_id,
        gateway,
        transaction_id: settlement.transaction_id,
        status: settlement.status,
    });

    Ok(Json(WebhookResponse { received: true }))
}
