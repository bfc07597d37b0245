use std::collections::BTreeMap;

use http::HeaderMap;
use zeroize::Zeroizing;

use super::{
    Gateway, Settlement, SignatureVerifier, configured, digests_match, hmac_sha256_hex,
    payload_object, scalar_text,
};
use crate::error::{AppError, Result};
use crate::models::events::PaymentStatus;

pub const SECURE_HASH_FIELD: &str = "pp_SecureHash";
const SUCCESS_RESPONSE_CODE: &str = "000";

/// HMAC-SHA256 over the non-empty parameter values joined with `&` in key
/// order, compared as uppercase hex.
#[derive(Clone)]
pub struct SortedParamsVerifier {
    secret: Option<Zeroizing<String>>,
}

impl SortedParamsVerifier {
    pub fn new(secret: Option<Zeroizing<String>>) -> Self {
        Self { secret }
    }

    pub fn canonical_string(params: &BTreeMap<String, String>) -> String {
        params
            .iter()
            .filter(|(key, value)| key.as_str() != SECURE_HASH_FIELD && !value.is_empty())
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Computes the hash a genuine callback carrying `params` would have.
    pub fn expected_hash(&self, params: &BTreeMap<String, String>) -> Option<String> {
        let secret = configured(self.gateway(), &self.secret)?;
        hmac_sha256_hex(secret, Self::canonical_string(params).as_bytes())
            .map(|hash| hash.to_ascii_uppercase())
    }

    pub fn verify_params(&self, params: &BTreeMap<String, String>, supplied_hash: &str) -> bool {
        let Some(expected) = self.expected_hash(params) else {
            return false;
        };
        let supplied = supplied_hash.trim().to_ascii_uppercase();
        digests_match(expected.as_bytes(), supplied.as_bytes())
    }
}

fn params_from(payload: &[u8]) -> Option<BTreeMap<String, String>> {
    let object = payload_object(payload)?;
    Some(
        object
            .iter()
            .map(|(key, value)| (key.clone(), scalar_text(value)))
            .collect(),
    )
}

impl SignatureVerifier for SortedParamsVerifier {
    fn gateway(&self) -> Gateway {
        Gateway::JazzCash
    }

    fn supplied_signature(&self, _headers: &HeaderMap, payload: &[u8]) -> Option<String> {
        params_from(payload)?
            .remove(SECURE_HASH_FIELD)
            .filter(|hash| !hash.is_empty())
    }

    fn verify(&self, payload: &[u8], supplied_signature: &str) -> bool {
        match params_from(payload) {
            Some(params) => self.verify_params(&params, supplied_signature),
            None => {
                tracing::warn!(gateway = %self.gateway(), "Callback body is not a JSON object");
                false
            }
        }
    }

    fn settlement(&self, payload: &[u8]) -> Result<Settlement> {
        let params = params_from(payload)
            .ok_or_else(|| AppError::Validation("Callback body is not a JSON object".to_string()))?;
        let field = |name: &str| params.get(name).cloned().unwrap_or_default();

        let transaction_id = field("pp_TxnRefNo");
        let order_id = Some(field("pp_BillReference"))
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| transaction_id.clone());
        if order_id.is_empty() {
            return Err(AppError::Validation("Callback carries no order reference".to_string()));
        }

        let status = match params.get("pp_ResponseCode").map(String::as_str) {
            Some(SUCCESS_RESPONSE_CODE) => PaymentStatus::Paid,
            Some("124") | Some("157") => PaymentStatus::Pending,
            Some(_) => PaymentStatus::Failed,
            None => PaymentStatus::Unknown,
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
    fn canonical_string_skips_hash_and_empty_values() {
        let params: BTreeMap<String, String> = [
            ("pp_TxnRefNo", "TXN1"),
            ("pp_Amount", "100"),
            ("pp_SecureHash", "ABC"),
            ("pp_Description", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(SortedParamsVerifier::canonical_string(&params), "100&TXN1");
    }
}
