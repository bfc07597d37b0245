use http::HeaderMap;
use zeroize::Zeroizing;

use super::{
    Gateway, Settlement, SignatureVerifier, configured, digests_match, hmac_sha256_hex,
    payload_object, scalar_text,
};
use crate::error::{AppError, Result};
use crate::models::events::PaymentStatus;

/// Signed fields, in signing order.
const SIGNED_FIELDS: [&str; 5] = ["transactionId", "orderId", "amount", "status", "timestamp"];
const SIGNATURE_FIELD: &str = "signature";
const SIGNATURE_HEADER: &str = "x-signature";

/// HMAC-SHA256 over `transactionId|orderId|amount|status|timestamp`, lowercase hex.
#[derive(Clone)]
pub struct FieldTupleVerifier {
    secret: Option<Zeroizing<String>>,
}

impl FieldTupleVerifier {
    pub fn new(secret: Option<Zeroizing<String>>) -> Self {
        Self { secret }
    }

    /// The pipe-joined string the gateway signs. Absent fields sign as empty.
    pub fn canonical_string(payload: &serde_json::Map<String, serde_json::Value>) -> String {
        SIGNED_FIELDS
            .iter()
            .map(|field| payload.get(*field).map(scalar_text).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl SignatureVerifier for FieldTupleVerifier {
    fn gateway(&self) -> Gateway {
        Gateway::Easypaisa
    }

    fn supplied_signature(&self, headers: &HeaderMap, payload: &[u8]) -> Option<String> {
        if let Some(value) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
            return Some(value.to_string());
        }
        payload_object(payload)?
            .get(SIGNATURE_FIELD)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    fn verify(&self, payload: &[u8], supplied_signature: &str) -> bool {
        let Some(secret) = configured(self.gateway(), &self.secret) else {
            return false;
        };
        let Some(fields) = payload_object(payload) else {
            tracing::warn!(gateway = %self.gateway(), "Callback body is not a JSON object");
            return false;
        };

        let canonical = Self::canonical_string(&fields);
        let Some(expected) = hmac_sha256_hex(secret, canonical.as_bytes()) else {
            return false;
        };

        digests_match(expected.as_bytes(), supplied_signature.trim().as_bytes())
    }

    fn settlement(&self, payload: &[u8]) -> Result<Settlement> {
        let fields = payload_object(payload)
            .ok_or_else(|| AppError::Validation("Callback body is not a JSON object".to_string()))?;
        let text = |name: &str| fields.get(name).map(scalar_text).unwrap_or_default();

        let order_id = text("orderId");
        if order_id.is_empty() {
            return Err(AppError::Validation("Callback carries no orderId".to_string()));
        }

        let status = match text("status").to_ascii_uppercase().as_str() {
            "PAID" | "SUCCESS" | "COMPLETED" => PaymentStatus::Paid,
            "PENDING" => PaymentStatus::Pending,
            "FAILED" | "DECLINED" => PaymentStatus::Failed,
            "REFUNDED" => PaymentStatus::Refunded,
            _ => PaymentStatus::Unknown,
        };

        Ok(Settlement {
            order_id,
            transaction_id: text("transactionId"),
            status,
        })
    }
}
