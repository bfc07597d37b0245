//! Session and staff bearer tokens.
//!
//! Both token classes are HS256 JWTs signed with one secret. They differ in
//! claim shape and default lifetime, and carry a `kind` claim so that one
//! class can never be accepted where the other is expected.
//!
//! Verification only answers "is this token authentic and unexpired". Whether
//! the session it names is still live is a separate question for the
//! [session store](crate::services::sessions::TableSessionStore).

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{AppError, Result};
use crate::models::session::{SessionId, TableId};
use crate::models::staff::StaffRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Session,
    Staff,
}

/// Claims that can be minted and verified by [`TokenCodec`].
pub trait TokenClaims: Serialize + DeserializeOwned {
    const KIND: TokenKind;

    fn kind(&self) -> TokenKind;
}

/// Customer credential bound to one table session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub kind: TokenKind,
    #[serde(rename = "sid")]
    pub session_id: SessionId,
    #[serde(rename = "tid")]
    pub table_id: TableId,
    #[serde(rename = "did", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Set when a staff member operates the table session on a customer's behalf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<StaffRole>,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

impl TokenClaims for SessionClaims {
    const KIND: TokenKind = TokenKind::Session;

    fn kind(&self) -> TokenKind {
        self.kind
    }
}

/// Elevated dashboard credential. Not bound to any table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffClaims {
    pub kind: TokenKind,
    /// Staff member id.
    pub sub: String,
    pub role: StaffRole,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims for StaffClaims {
    const KIND: TokenKind = TokenKind::Staff;

    fn kind(&self) -> TokenKind {
        self.kind
    }
}

/// Mints and verifies bearer tokens. Stateless apart from its configuration.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Option<Zeroizing<String>>,
    session_ttl: Duration,
    staff_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: Option<Zeroizing<String>>, session_ttl: Duration, staff_ttl: Duration) -> Self {
        Self {
            secret,
            session_ttl,
            staff_ttl,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Builds customer claims issued now and expiring after the session TTL.
    pub fn session_claims(
        &self,
        session_id: SessionId,
        table_id: TableId,
        device_id: Option<String>,
        role: Option<StaffRole>,
    ) -> SessionClaims {
        let now = Utc::now();
        SessionClaims {
            kind: TokenKind::Session,
            session_id,
            table_id,
            device_id,
            role,
            iat: now.timestamp(),
            exp: (now + self.session_ttl).timestamp(),
        }
    }

    /// Builds staff claims issued now and expiring after the staff TTL.
    pub fn staff_claims(&self, staff_id: impl Into<String>, role: StaffRole) -> StaffClaims {
        let now = Utc::now();
        StaffClaims {
            kind: TokenKind::Staff,
            sub: staff_id.into(),
            role,
            iat: now.timestamp(),
            exp: (now + self.staff_ttl).timestamp(),
        }
    }

    pub fn mint<C: TokenClaims>(&self, claims: &C) -> Result<String> {
        let secret = self.secret()?;
        if claims.kind() != C::KIND {
            return Err(AppError::Validation("Token kind does not match claims".to_string()));
        }
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token encoding failed: {}", e)))
    }

    pub fn verify<C: TokenClaims>(&self, token: &str) -> Result<C> {
        let secret = self.secret()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        let data = decode::<C>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken(e.to_string()),
            })?;

        if data.claims.kind() != C::KIND {
            return Err(AppError::InvalidToken("Wrong token class".to_string()));
        }

        Ok(data.claims)
    }

    fn secret(&self) -> Result<&str> {
        self.secret
            .as_deref()
            .map(String::as_str)
            .ok_or_else(|| AppError::Configuration("SESSION_TOKEN_SECRET is not set".to_string()))
    }
}

/// Extracts the token from an `Authorization: Bearer …` header value.
pub fn extract_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}
