use chrono::{DateTime, Duration, Utc};
use http::HeaderMap;
use zeroize::Zeroizing;

use super::{
    Gateway, Settlement, SignatureVerifier, configured, digests_match, hmac_sha256_hex,
    payload_object,
};
use crate::error::{AppError, Result};
use crate::models::events::PaymentStatus;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Parsed `t=<unix-seconds>,v1=<hex>` header. Several `v1` entries may be
/// present while the gateway rotates secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

/// Returns `None` unless both a timestamp and at least one `v1` signature are present.
pub fn parse_signature_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" if !value.is_empty() => signatures.push(value.to_string()),
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(timestamp), false) => Some(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => None,
    }
}

/// HMAC-SHA256 over `"<t>.<raw body>"` with a replay window on `t`.
#[derive(Clone)]
pub struct TimestampedVerifier {
    secret: Option<Zeroizing<String>>,
    replay_window: Duration,
}

impl TimestampedVerifier {
    pub fn new(secret: Option<Zeroizing<String>>, replay_window: Duration) -> Self {
        Self {
            secret,
            replay_window,
        }
    }

    /// Signs `payload` as the gateway would at `timestamp`. Used to build test fixtures.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Option<String> {
        let secret = configured(self.gateway(), &self.secret)?;
        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        hmac_sha256_hex(secret, &signed)
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> bool {
        let Some(parsed) = parse_signature_header(header) else {
            tracing::warn!(gateway = %self.gateway(), "Malformed signature header");
            return false;
        };

        let Some(age) = now.timestamp().checked_sub(parsed.timestamp) else {
            tracing::warn!(gateway = %self.gateway(), "Signature timestamp out of range");
            return false;
        };
        if age.unsigned_abs() > self.replay_window.num_seconds().unsigned_abs() {
            tracing::warn!(gateway = %self.gateway(), age, "Signature timestamp outside replay window");
            return false;
        }

        let Some(expected) = self.sign(payload, parsed.timestamp) else {
            return false;
        };

        parsed
            .signatures
            .iter()
            .any(|candidate| digests_match(expected.as_bytes(), candidate.as_bytes()))
    }
}

impl SignatureVerifier for TimestampedVerifier {
    fn gateway(&self) -> Gateway {
        Gateway::Stripe
    }

    fn supplied_signature(&self, headers: &HeaderMap, _payload: &[u8]) -> Option<String> {
        headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn verify(&self, payload: &[u8], supplied_signature: &str) -> bool {
        self.verify_at(payload, supplied_signature, Utc::now())
    }

    fn settlement(&self, payload: &[u8]) -> Result<Settlement> {
        let event = payload_object(payload)
            .ok_or_else(|| AppError::Validation("Callback body is not a JSON object".to_string()))?;

        let object = event
            .get("data")
            .and_then(|data| data.get("object"))
            .ok_or_else(|| AppError::Validation("Event carries no data.object".to_string()))?;

        let order_id = object
            .get("metadata")
            .and_then(|metadata| metadata.get("order_id"))
            .or_else(|| object.get("client_reference_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::Validation("Event carries no order reference".to_string()))?
            .to_string();

        let transaction_id = object
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let status = match event.get("type").and_then(|v| v.as_str()) {
            Some("payment_intent.succeeded") | Some("checkout.session.completed") => {
                PaymentStatus::Paid
            }
            Some("payment_intent.processing") => PaymentStatus::Pending,
            Some("payment_intent.payment_failed") | Some("checkout.session.expired") => {
                PaymentStatus::Failed
            }
            Some("charge.refunded") => PaymentStatus::Refunded,
            _ => PaymentStatus::Unknown,
        };

        Ok(Settlement {
            order_id,
            transaction_id,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_needs_both_components() {
        assert!(parse_signature_header("t=1700000000").is_none());
        assert!(parse_signature_header("v1=abcd").is_none());
        assert!(parse_signature_header("t=abc,v1=abcd").is_none());
        assert!(parse_signature_header("").is_none());

        let parsed = parse_signature_header("t=1700000000, v1=aa,v0=bb,v1=cc").unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.signatures, vec!["aa".to_string(), "cc".to_string()]);
    }
}
