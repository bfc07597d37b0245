use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderValue};
use serde_json::json;
use sha2::Sha256;
use tableside::config::GatewaySecrets;
use tableside::crypto::webhook::{
    Gateway, SIGNATURE_HEADER, SignatureVerifier, SortedParamsVerifier,
    TimestampedVerifier, WebhookVerifiers,
};
use tableside::models::events::PaymentStatus;
use zeroize::Zeroizing;

const EASYPAISA_SECRET: &str = "ep-secret";
const JAZZCASH_SECRET: &str = "jc-secret";
const STRIPE_SECRET: &str = "whsec_test";

fn hmac_hex(secret: &str, data: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verifiers() -> WebhookVerifiers {
    WebhookVerifiers::new(
        &GatewaySecrets {
            easypaisa: Some(Zeroizing::new(EASYPAISA_SECRET.to_string())),
            jazzcash: Some(Zeroizing::new(JAZZCASH_SECRET.to_string())),
            stripe: Some(Zeroizing::new(STRIPE_SECRET.to_string())),
        },
        Duration::seconds(300),
    )
}

fn body(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

// Field tuple gateway.

fn easypaisa_payload() -> serde_json::Value {
    json!({
        "transactionId": "EP-TX-1",
        "orderId": "ORD-1",
        "amount": "1500.00",
        "status": "PAID",
        "timestamp": "1700000000"
    })
}

#[test]
fn field_tuple_signature_in_header_verifies() {
    let verifiers = verifiers();
    let verifier = verifiers.for_gateway(Gateway::Easypaisa);
    let payload = body(easypaisa_payload());
    let signature = hmac_hex(EASYPAISA_SECRET, "EP-TX-1|ORD-1|1500.00|PAID|1700000000");

    let mut headers = HeaderMap::new();
    headers.insert("x-signature", HeaderValue::from_str(&signature).unwrap());

    let supplied = verifier.supplied_signature(&headers, &payload).unwrap();
    assert!(verifier.verify(&payload, &supplied));

    let settlement = verifier.settlement(&payload).unwrap();
    assert_eq!(settlement.order_id, "ORD-1");
    assert_eq!(settlement.transaction_id, "EP-TX-1");
    assert_eq!(settlement.status, PaymentStatus::Paid);
}

#[test]
fn field_tuple_signature_in_body_verifies() {
    let verifiers = verifiers();
    let verifier = verifiers.for_gateway(Gateway::Easypaisa);
    let mut payload = easypaisa_payload();
    payload["signature"] = json!(hmac_hex(
        EASYPAISA_SECRET,
        "EP-TX-1|ORD-1|1500.00|PAID|1700000000"
    ));
    let payload = body(payload);

    let supplied = verifier.supplied_signature(&HeaderMap::new(), &payload).unwrap();
    assert!(verifier.verify(&payload, &supplied));
}

#[test]
fn field_tuple_rejects_altered_amount() {
    let verifiers = verifiers();
    let verifier = verifiers.for_gateway(Gateway::Easypaisa);
    let signature = hmac_hex(EASYPAISA_SECRET, "EP-TX-1|ORD-1|1500.00|PAID|1700000000");

    let mut altered = easypaisa_payload();
    altered["amount"] = json!("1.00");

    assert!(!verifier.verify(&body(altered), &signature));
}

// Sorted params gateway.

fn jazzcash_params(hash: &str) -> serde_json::Value {
    json!({
        "pp_Amount": "100",
        "pp_TxnRefNo": "TXN1",
        "pp_SecureHash": hash,
    })
}

#[test]
fn sorted_params_payload_verifies_and_any_flip_breaks_it() {
    let verifiers = verifiers();
    let verifier = verifiers.for_gateway(Gateway::JazzCash);
    let hash = hmac_hex(JAZZCASH_SECRET, "100&TXN1").to_ascii_uppercase();

    let payload = body(jazzcash_params(&hash));
    let supplied = verifier.supplied_signature(&HeaderMap::new(), &payload).unwrap();
    assert!(verifier.verify(&payload, &supplied));

    // Lowercase supplied hashes are accepted.
    assert!(verifier.verify(&payload, &hash.to_ascii_lowercase()));

    for (field, value) in [("pp_Amount", "101"), ("pp_TxnRefNo", "TXN2")] {
        let mut flipped = jazzcash_params(&hash);
        flipped[field] = json!(value);
        assert!(!verifier.verify(&body(flipped), &hash), "{field} flip accepted");
    }
}

#[test]
fn sorted_params_ignore_empty_values() {
    let verifier = SortedParamsVerifier::new(Some(Zeroizing::new(JAZZCASH_SECRET.to_string())));
    let hash = hmac_hex(JAZZCASH_SECRET, "100&TXN1").to_ascii_uppercase();

    let mut payload = jazzcash_params(&hash);
    payload["pp_Description"] = json!("");

    assert!(verifier.verify(&body(payload), &hash));
}

#[test]
fn sorted_params_settlement_maps_response_codes() {
    let verifiers = verifiers();
    let verifier = verifiers.for_gateway(Gateway::JazzCash);

    let paid = body(json!({"pp_TxnRefNo": "TXN1", "pp_BillReference": "ORD-7", "pp_ResponseCode": "000"}));
    let settlement = verifier.settlement(&paid).unwrap();
    assert_eq!(settlement.order_id, "ORD-7");
    assert_eq!(settlement.status, PaymentStatus::Paid);

    let failed = body(json!({"pp_TxnRefNo": "TXN2", "pp_ResponseCode": "199"}));
    let settlement = verifier.settlement(&failed).unwrap();
    assert_eq!(settlement.order_id, "TXN2");
    assert_eq!(settlement.status, PaymentStatus::Failed);
}

// Timestamped gateway.

fn stripe_verifier() -> TimestampedVerifier {
    TimestampedVerifier::new(
        Some(Zeroizing::new(STRIPE_SECRET.to_string())),
        Duration::seconds(300),
    )
}

#[test]
fn timestamped_signature_honours_replay_window() {
    let verifier = stripe_verifier();
    let payload = br#"{"type":"payment_intent.succeeded"}"#;
    let now = Utc::now();

    let fresh = now.timestamp() - 299;
    let header = format!("t={},v1={}", fresh, verifier.sign(payload, fresh).unwrap());
    assert!(verifier.verify_at(payload, &header, now));

    let stale = now.timestamp() - 301;
    let header = format!("t={},v1={}", stale, verifier.sign(payload, stale).unwrap());
    assert!(!verifier.verify_at(payload, &header, now));
}

#[test]
fn timestamped_signature_matches_manual_hmac() {
    let verifier = stripe_verifier();
    let payload = br#"{"id":"evt_1"}"#;
    let t = 1_700_000_000;

    let expected = hmac_hex(STRIPE_SECRET, &format!("{t}.{}", std::str::from_utf8(payload).unwrap()));
    assert_eq!(verifier.sign(payload, t).unwrap(), expected);
}

#[test]
fn timestamped_accepts_any_matching_v1_entry() {
    let verifier = stripe_verifier();
    let payload = br#"{"type":"charge.refunded"}"#;
    let now = Utc::now();
    let t = now.timestamp();
    let good = verifier.sign(payload, t).unwrap();

    let header = format!("t={t},v1={},v1={good}", "0".repeat(64));
    assert!(verifier.verify_at(payload, &header, now));

    let header = format!("t={t},v1={}", "0".repeat(64));
    assert!(!verifier.verify_at(payload, &header, now));
}

#[test]
fn timestamped_rejects_tampered_body_and_bad_header() {
    let verifier = stripe_verifier();
    let now = Utc::now();
    let t = now.timestamp();
    let signature = verifier.sign(br#"{"amount":100}"#, t).unwrap();

    let header = format!("t={t},v1={signature}");
    assert!(!verifier.verify_at(br#"{"amount":999}"#, &header, now));
    assert!(!verifier.verify_at(br#"{"amount":100}"#, &format!("v1={signature}"), now));
}

#[test]
fn timestamped_reads_header_and_settlement() {
    let verifiers = verifiers();
    let verifier = verifiers.for_gateway(Gateway::Stripe);
    let payload = body(json!({
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": "pi_1", "metadata": {"order_id": "ORD-3"}}}
    }));

    let t = Utc::now().timestamp();
    let header = format!("t={t},v1={}", stripe_verifier().sign(&payload, t).unwrap());
    let mut headers = HeaderMap::new();
    headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&header).unwrap());

    let supplied = verifier.supplied_signature(&headers, &payload).unwrap();
    assert!(verifier.verify(&payload, &supplied));

    let settlement = verifier.settlement(&payload).unwrap();
    assert_eq!(settlement.order_id, "ORD-3");
    assert_eq!(settlement.transaction_id, "pi_1");
    assert_eq!(settlement.status, PaymentStatus::Paid);
}

#[test]
fn missing_secrets_fail_closed() {
    let unconfigured = WebhookVerifiers::new(&GatewaySecrets::default(), Duration::seconds(300));

    let ep_payload = body(easypaisa_payload());
    let ep_signature = hmac_hex("", "EP-TX-1|ORD-1|1500.00|PAID|1700000000");
    assert!(!unconfigured.for_gateway(Gateway::Easypaisa).verify(&ep_payload, &ep_signature));

    let jc_hash = hmac_hex("", "100&TXN1").to_ascii_uppercase();
    let jc_payload = body(jazzcash_params(&jc_hash));
    assert!(!unconfigured.for_gateway(Gateway::JazzCash).verify(&jc_payload, &jc_hash));

    let t = Utc::now().timestamp();
    let header = format!("t={t},v1={}", hmac_hex("", &format!("{t}.{{}}")));
    assert!(!unconfigured.for_gateway(Gateway::Stripe).verify(b"{}", &header));
}

#[test]
fn timestamped_rejects_extreme_timestamps_without_panicking() {
    let verifier = stripe_verifier();
    let now = Utc::now();

    for t in [i64::MIN, i64::MAX, i64::MIN + 1] {
        let header = format!("t={t},v1={}", "0".repeat(64));
        assert!(!verifier.verify_at(b"{}", &header, now), "t={t} accepted");
    }
}
