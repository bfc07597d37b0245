use chrono::{Duration, Utc};
use tableside::AppError;
use tableside::crypto::tokens::{SessionClaims, StaffClaims, TokenCodec, extract_bearer};
use tableside::models::session::{SessionId, TableId};
use tableside::models::staff::StaffRole;
use zeroize::Zeroizing;

fn codec_with(secret: &str) -> TokenCodec {
    TokenCodec::new(
        Some(Zeroizing::new(secret.to_string())),
        Duration::hours(24),
        Duration::days(7),
    )
}

fn codec() -> TokenCodec {
    codec_with("table-token-secret")
}

#[test]
fn session_token_round_trips_its_claims() {
    let codec = codec();
    let session_id = SessionId::new();
    let claims = codec.session_claims(session_id, TableId::from("T07"), Some("phone-a".into()), None);

    let token = codec.mint(&claims).unwrap();
    let verified: SessionClaims = codec.verify(&token).unwrap();

    assert_eq!(verified, claims);
    assert_eq!(verified.exp - verified.iat, Duration::hours(24).num_seconds());
}

#[test]
fn staff_tokens_default_to_the_longer_lifetime() {
    let codec = codec();
    let claims = codec.staff_claims("staff-1", StaffRole::Kitchen);
    let verified: StaffClaims = codec.verify(&codec.mint(&claims).unwrap()).unwrap();

    assert_eq!(verified.role, StaffRole::Kitchen);
    assert_eq!(verified.exp - verified.iat, Duration::days(7).num_seconds());
}

#[test]
fn expired_token_is_reported_as_expired() {
    let codec = codec();
    let mut claims = codec.session_claims(SessionId::new(), TableId::from("T07"), None, None);
    let now = Utc::now().timestamp();
    claims.iat = now - 7200;
    claims.exp = now - 60;

    let token = codec.mint(&claims).unwrap();
    let result = codec.verify::<SessionClaims>(&token);
    assert!(matches!(result, Err(AppError::ExpiredToken)));
}

#[test]
fn swapped_payload_fails_signature_check() {
    let codec = codec();
    let a = codec
        .mint(&codec.session_claims(SessionId::new(), TableId::from("T07"), None, None))
        .unwrap();
    let b = codec
        .mint(&codec.session_claims(SessionId::new(), TableId::from("T08"), None, None))
        .unwrap();

    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();
    let forged = format!("{}.{}.{}", a_parts[0], b_parts[1], a_parts[2]);

    let result = codec.verify::<SessionClaims>(&forged);
    assert!(matches!(result, Err(AppError::InvalidToken(_))));
}

#[test]
fn token_from_another_secret_is_invalid() {
    let token = codec_with("other-secret")
        .mint(&codec().session_claims(SessionId::new(), TableId::from("T07"), None, None))
        .unwrap();

    let result = codec().verify::<SessionClaims>(&token);
    assert!(matches!(result, Err(AppError::InvalidToken(_))));
}

#[test]
fn unsigned_token_is_invalid() {
    let codec = codec();
    let real = codec
        .mint(&codec.session_claims(SessionId::new(), TableId::from("T07"), None, None))
        .unwrap();
    let payload = real.split('.').nth(1).unwrap();
    // {"alg":"none","typ":"JWT"}
    let unsigned = format!("eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.{payload}.");

    let result = codec.verify::<SessionClaims>(&unsigned);
    assert!(matches!(result, Err(AppError::InvalidToken(_))));
}

#[test]
fn token_classes_are_not_interchangeable() {
    let codec = codec();
    let staff = codec
        .mint(&codec.staff_claims("staff-1", StaffRole::Admin))
        .unwrap();
    let session = codec
        .mint(&codec.session_claims(SessionId::new(), TableId::from("T07"), None, None))
        .unwrap();

    assert!(matches!(
        codec.verify::<SessionClaims>(&staff),
        Err(AppError::InvalidToken(_))
    ));
    assert!(matches!(
        codec.verify::<StaffClaims>(&session),
        Err(AppError::InvalidToken(_))
    ));
}

#[test]
fn missing_secret_is_a_configuration_error() {
    let unconfigured = TokenCodec::new(None, Duration::hours(24), Duration::days(7));
    let claims = unconfigured.session_claims(SessionId::new(), TableId::from("T07"), None, None);

    assert!(matches!(
        unconfigured.mint(&claims),
        Err(AppError::Configuration(_))
    ));

    let token = codec().mint(&claims).unwrap();
    assert!(matches!(
        unconfigured.verify::<SessionClaims>(&token),
        Err(AppError::Configuration(_))
    ));
}

#[test]
fn bearer_prefix_is_required() {
    assert_eq!(extract_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
    assert_eq!(extract_bearer("Bearer "), None);
    assert_eq!(extract_bearer("Basic abc"), None);
    assert_eq!(extract_bearer("abc.def.ghi"), None);
}
