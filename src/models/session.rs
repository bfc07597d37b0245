use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Opaque identifier of one table occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| AppError::Validation("Malformed session id".to_string()))
    }
}

/// Identifier of a physical table, as printed in its QR code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(String);

impl TableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle state of a [`TableSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Expired,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Expired => "EXPIRED",
            SessionStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "EXPIRED" => Ok(SessionStatus::Expired),
            "CLOSED" => Ok(SessionStatus::Closed),
            other => Err(AppError::Internal(format!("Unknown session status {}", other))),
        }
    }
}

/// One customer occupancy of a physical table.
///
/// At most one session per `table_id` is `Active` at any instant. The
/// record of truth lives behind a
/// [`SessionRepository`](crate::repositories::session::SessionRepository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSession {
    pub session_id: SessionId,
    pub table_id: TableId,
    /// Fingerprint of the browser/device that scanned the QR code.
    pub device_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// When the session left `Active`. Drives the purge grace period.
    pub retired_at: Option<DateTime<Utc>>,
}

impl TableSession {
    pub fn open(
        table_id: TableId,
        device_id: Option<String>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            session_id: SessionId::new(),
            table_id,
            device_id,
            status: SessionStatus::Active,
            created_at: now,
            last_activity_at: now,
            expires_at: now + ttl,
            retired_at: None,
        }
    }

    /// True iff the session is `Active` and `now` has not passed its expiry.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && now <= self.expires_at
    }
}

/// Published by the session store whenever a session leaves `Active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRetired {
    pub session_id: SessionId,
    pub table_id: TableId,
    pub status: SessionStatus,
}
