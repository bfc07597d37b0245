//! Inbound payment-callback authentication.
//!
//! Every gateway signs its callbacks differently, so each one gets its own
//! verifier. They share one contract: [`SignatureVerifier::verify`] is a
//! pure `bool`, compares digests in constant time, and fails closed when the
//! gateway's secret is not configured.

mod field_tuple;
mod sorted_params;
mod timestamped;

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub use field_tuple::FieldTupleVerifier;
pub use sorted_params::{SECURE_HASH_FIELD, SortedParamsVerifier};
pub use timestamped::{SIGNATURE_HEADER, TimestampedVerifier, parse_signature_header};

use crate::config::GatewaySecrets;
use crate::error::{AppError, Result};
use crate::models::events::PaymentStatus;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Easypaisa,
    JazzCash,
    Stripe,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Easypaisa => "easypaisa",
            Gateway::JazzCash => "jazzcash",
            Gateway::Stripe => "stripe",
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gateway {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easypaisa" => Ok(Gateway::Easypaisa),
            "jazzcash" => Ok(Gateway::JazzCash),
            "stripe" => Ok(Gateway::Stripe),
            _ => Err(AppError::NotFound),
        }
    }
}

/// What a verified callback says happened to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub order_id: String,
    pub transaction_id: String,
    pub status: PaymentStatus,
}

/// Authenticates one gateway's callbacks.
pub trait SignatureVerifier: Send + Sync {
    fn gateway(&self) -> Gateway;

    /// Pulls the gateway-supplied signature out of the request.
    fn supplied_signature(&self, headers: &HeaderMap, payload: &[u8]) -> Option<String>;

    /// `true` only for an authentic payload. Never errors.
    fn verify(&self, payload: &[u8], supplied_signature: &str) -> bool;

    /// Reads the order outcome from a payload that has already been verified.
    fn settlement(&self, payload: &[u8]) -> Result<Settlement>;
}

/// The verifier set, one per gateway.
#[derive(Clone)]
pub struct WebhookVerifiers {
    easypaisa: FieldTupleVerifier,
    jazzcash: SortedParamsVerifier,
    stripe: TimestampedVerifier,
}

impl WebhookVerifiers {
    pub fn new(secrets: &GatewaySecrets, replay_window: chrono::Duration) -> Self {
        Self {
            easypaisa: FieldTupleVerifier::new(secrets.easypaisa.clone()),
            jazzcash: SortedParamsVerifier::new(secrets.jazzcash.clone()),
            stripe: TimestampedVerifier::new(secrets.stripe.clone(), replay_window),
        }
    }

    pub fn for_gateway(&self, gateway: Gateway) -> &dyn SignatureVerifier {
        match gateway {
            Gateway::Easypaisa => &self.easypaisa,
            Gateway::JazzCash => &self.jazzcash,
            Gateway::Stripe => &self.stripe,
        }
    }
}

/// Returns the configured secret, or logs and returns `None`.
fn configured(gateway: Gateway, secret: &Option<Zeroizing<String>>) -> Option<&[u8]> {
    match secret.as_deref() {
        Some(secret) => Some(secret.as_bytes()),
        None => {
            tracing::error!(%gateway, "❌ Webhook secret not configured, rejecting callback");
            None
        }
    }
}

fn hmac_sha256_hex(secret: &[u8], data: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(data);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time equality. Digest lengths are public, so an early length check leaks nothing.
fn digests_match(expected: &[u8], supplied: &[u8]) -> bool {
    expected.len() == supplied.len() && bool::from(expected.ct_eq(supplied))
}

/// Renders a JSON scalar the way it appears in a signed string.
fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn payload_object(payload: &[u8]) -> Option<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_match_requires_equal_length_and_content() {
        assert!(digests_match(b"abcdef", b"abcdef"));
        assert!(!digests_match(b"abcdef", b"abcdeF"));
        assert!(!digests_match(b"abcdef", b"abcde"));
        assert!(!digests_match(b"", b"a"));
    }

    #[test]
    fn gateway_names_parse_case_insensitively() {
        assert_eq!("JazzCash".parse::<Gateway>().unwrap(), Gateway::JazzCash);
        assert_eq!("stripe".parse::<Gateway>().unwrap(), Gateway::Stripe);
        assert!("paypal".parse::<Gateway>().is_err());
    }
}
