//! Table session lifecycle.
//!
//! The store is the single source of truth for session liveness. Writes that
//! can change which session is active for a table (open, close) are
//! serialized per table; everything else relies on the repository's
//! conditional updates.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, broadcast};
use zeroize::Zeroizing;

use crate::crypto::security_code;
use crate::error::{AppError, Result};
use crate::models::session::{SessionId, SessionRetired, SessionStatus, TableId, TableSession};
use crate::repositories::session::SessionRepository;

/// Capacity of the retirement notice channel.
const RETIREMENT_CHANNEL_CAPACITY: usize = 256;
/// Wrong guesses allowed before a pending code is burned.
const MAX_CODE_ATTEMPTS: u8 = 5;

/// In-person actions that need a staff-issued security code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeAction {
    ConfirmCashPayment,
    Escalation,
    CloseSession,
}

/// A freshly issued code. The raw value is handed out exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCode {
    pub code: String,
    pub masked: String,
    pub action: CodeAction,
    pub expires_at: DateTime<Utc>,
}

struct PendingCode {
    code: Zeroizing<String>,
    action: CodeAction,
    expires_at: DateTime<Utc>,
    failed_attempts: u8,
}

pub struct TableSessionStore {
    repo: Arc<dyn SessionRepository>,
    ttl: Duration,
    code_ttl: Duration,
    table_locks: DashMap<TableId, Arc<Mutex<()>>>,
    codes: DashMap<SessionId, PendingCode>,
    retired_tx: broadcast::Sender<SessionRetired>,
}

impl TableSessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>, ttl: Duration, code_ttl: Duration) -> Self {
        let (retired_tx, _) = broadcast::channel(RETIREMENT_CHANNEL_CAPACITY);
        Self {
            repo,
            ttl,
            code_ttl,
            table_locks: DashMap::new(),
            codes: DashMap::new(),
            retired_tx,
        }
    }

    /// Notices for every session that leaves `Active`, in commit order.
    pub fn subscribe_retirements(&self) -> broadcast::Receiver<SessionRetired> {
        self.retired_tx.subscribe()
    }

    fn table_lock(&self, table_id: &TableId) -> Arc<Mutex<()>> {
        self.table_locks
            .entry(table_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn retired(&self, session: &TableSession, status: SessionStatus) {
        self.codes.remove(&session.session_id);
        // No receivers just means nobody is listening yet.
        let _ = self.retired_tx.send(SessionRetired {
            session_id: session.session_id,
            table_id: session.table_id.clone(),
            status,
        });
    }

    /// Opens a new session for `table_id`, closing the table's current one first.
    pub async fn open(&self, table_id: TableId, device_id: Option<String>) -> Result<TableSession> {
        let lock = self.table_lock(&table_id);
        let _guard = lock.lock().await;
        let now = Utc::now();

        if let Some(previous) = self.repo.active_for_table(&table_id).await? {
            if self
                .repo
                .transition(previous.session_id, SessionStatus::Active, SessionStatus::Closed, now)
                .await?
            {
                tracing::info!(
                    table_id = %table_id,
                    session_id = %previous.session_id,
                    "🔒 Closed previous session on rescan"
                );
                self.retired(&previous, SessionStatus::Closed);
            }
        }

        let session = TableSession::open(table_id, device_id, now, self.ttl);
        self.repo.insert_active(&session).await?;

        tracing::info!(
            table_id = %session.table_id,
            session_id = %session.session_id,
            "✅ Table session opened"
        );
        Ok(session)
    }

    /// Records activity and slides the expiry forward. `NotFound` unless the session is live.
    pub async fn touch(&self, session_id: SessionId) -> Result<()> {
        let now = Utc::now();
        if self.repo.touch(session_id, now, now + self.ttl).await? {
            tracing::debug!(session_id = %session_id, "Session activity refreshed");
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }

    /// Ends a session. Closing an already-ended session is a no-op.
    pub async fn close(&self, session_id: SessionId) -> Result<()> {
        let session = self.repo.get(session_id).await?.ok_or(AppError::NotFound)?;

        let lock = self.table_lock(&session.table_id);
        let _guard = lock.lock().await;

        if self
            .repo
            .transition(session_id, SessionStatus::Active, SessionStatus::Closed, Utc::now())
            .await?
        {
            tracing::info!(
                table_id = %session.table_id,
                session_id = %session_id,
                "🔒 Table session closed"
            );
            self.retired(&session, SessionStatus::Closed);
        }
        Ok(())
    }

    pub async fn get(&self, session_id: SessionId) -> Result<Option<TableSession>> {
        self.repo.get(session_id).await
    }

    /// True iff the session is `Active` and not past its expiry.
    pub async fn is_live(&self, session_id: SessionId) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .repo
            .get(session_id)
            .await?
            .is_some_and(|session| session.is_live_at(now)))
    }

    /// Marks every active session past its expiry as `Expired`. Returns how many changed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let candidates = self.repo.expired_active(now).await?;

        let mut expired = 0;
        for session in candidates {
            if self.repo.expire_due(session.session_id, now).await? {
                tracing::debug!(
                    table_id = %session.table_id,
                    session_id = %session.session_id,
                    "⌛ Session expired"
                );
                self.retired(&session, SessionStatus::Expired);
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Hard-deletes sessions that were retired more than `grace` ago.
    pub async fn purge_retired(&self, grace: Duration) -> Result<u64> {
        self.repo.purge_retired(Utc::now() - grace).await
    }

    /// Issues a single-use code for a staff-assisted action on a live session.
    /// Replaces any code already pending for that session.
    pub async fn issue_security_code(
        &self,
        session_id: SessionId,
        action: CodeAction,
    ) -> Result<IssuedCode> {
        if !self.is_live(session_id).await? {
            return Err(AppError::NotFound);
        }

        let (code, expires_at) = security_code::generate(self.code_ttl);
        let masked = security_code::mask(&code);
        self.codes.insert(
            session_id,
            PendingCode {
                code: Zeroizing::new(code.clone()),
                action,
                expires_at,
                failed_attempts: 0,
            },
        );

        tracing::info!(session_id = %session_id, code = %masked, ?action, "🔑 Security code issued");
        Ok(IssuedCode {
            code,
            masked,
            action,
            expires_at,
        })
    }

    /// Checks and consumes the pending code for `session_id`.
    pub async fn redeem_security_code(
        &self,
        session_id: SessionId,
        action: CodeAction,
        code: &str,
    ) -> Result<()> {
        if !security_code::validate(code) {
            return Err(AppError::Validation("Security code must be 6 digits".to_string()));
        }
        if !self.is_live(session_id).await? {
            self.codes.remove(&session_id);
            return Err(AppError::NotFound);
        }

        let now = Utc::now();
        let consumed = self.codes.remove_if(&session_id, |_, pending| {
            now <= pending.expires_at
                && pending.action == action
                && bool::from(pending.code.as_bytes().ct_eq(code.as_bytes()))
        });

        if consumed.is_none() {
            let burned = match self.codes.get_mut(&session_id) {
                None => return Err(AppError::Unauthorized),
                Some(mut pending) if now <= pending.expires_at => {
                    pending.failed_attempts += 1;
                    pending.failed_attempts >= MAX_CODE_ATTEMPTS
                }
                Some(_) => true,
            };
            if burned {
                self.codes.remove(&session_id);
            }
            tracing::warn!(
                session_id = %session_id,
                code = %security_code::mask(code),
                burned,
                "❌ Security code rejected"
            );
            return Err(AppError::Unauthorized);
        }

        tracing::info!(session_id = %session_id, ?action, "✅ Security code redeemed");
        Ok(())
    }
}
