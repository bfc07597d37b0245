use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::models::session::{SessionId, SessionStatus, TableId, TableSession};

/// Durable storage for table sessions.
///
/// Every mutation is a conditional update on the current status, so the
/// caller never needs a read-then-write to change a session's state.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Stores a new `Active` session. Fails if the table already has an active one.
    async fn insert_active(&self, session: &TableSession) -> Result<()>;

    async fn get(&self, session_id: SessionId) -> Result<Option<TableSession>>;

    async fn active_for_table(&self, table_id: &TableId) -> Result<Option<TableSession>>;

    /// Compare-and-set on status. Returns `false` when the current status is not `from`.
    async fn transition(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// `Active` → `Expired`, only if the session's expiry is still strictly before `now`.
    async fn expire_due(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<bool>;

    /// Updates activity and expiry, only while the session is `Active` and unexpired at `at`.
    async fn touch(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Active sessions whose expiry is strictly before `now`.
    async fn expired_active(&self, now: DateTime<Utc>) -> Result<Vec<TableSession>>;

    /// Hard-deletes non-active sessions retired before `cutoff`. Returns how many went.
    async fn purge_retired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, TableSession>,
    active_by_table: HashMap<TableId, SessionId>,
}

/// Process-local repository. Each operation holds one write lock, which is
/// what makes its conditional updates atomic.
#[derive(Default)]
pub struct InMemorySessionRepository {
    inner: RwLock<Tables>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert_active(&self, session: &TableSession) -> Result<()> {
        let mut tables = self.inner.write().await;

        if let Some(existing) = tables.active_by_table.get(&session.table_id) {
            return Err(AppError::Internal(format!(
                "Table {} already has active session {}",
                session.table_id, existing
            )));
        }

        tables
            .active_by_table
            .insert(session.table_id.clone(), session.session_id);
        tables.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<TableSession>> {
        Ok(self.inner.read().await.sessions.get(&session_id).cloned())
    }

    async fn active_for_table(&self, table_id: &TableId) -> Result<Option<TableSession>> {
        let tables = self.inner.read().await;
        Ok(tables
            .active_by_table
            .get(table_id)
            .and_then(|id| tables.sessions.get(id))
            .cloned())
    }

    async fn transition(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut guard = self.inner.write().await;
        let tables = &mut *guard;

        let Some(session) = tables.sessions.get_mut(&session_id) else {
            return Ok(false);
        };
        if session.status != from {
            return Ok(false);
        }

        session.status = to;
        if to != SessionStatus::Active {
            session.retired_at = Some(at);
            if tables.active_by_table.get(&session.table_id) == Some(&session_id) {
                tables.active_by_table.remove(&session.table_id);
            }
        }
        Ok(true)
    }

    async fn expire_due(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<bool> {
        let mut guard = self.inner.write().await;
        let tables = &mut *guard;

        match tables.sessions.get_mut(&session_id) {
            Some(session) if session.status == SessionStatus::Active && session.expires_at < now => {
                session.status = SessionStatus::Expired;
                session.retired_at = Some(now);
                if tables.active_by_table.get(&session.table_id) == Some(&session_id) {
                    tables.active_by_table.remove(&session.table_id);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.inner.write().await;
        match tables.sessions.get_mut(&session_id) {
            Some(session) if session.is_live_at(at) => {
                session.last_activity_at = at;
                session.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expired_active(&self, now: DateTime<Utc>) -> Result<Vec<TableSession>> {
        let tables = self.inner.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active && s.expires_at < now)
            .cloned()
            .collect())
    }

    async fn purge_retired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.inner.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| {
            s.status == SessionStatus::Active || s.retired_at.is_none_or(|at| at >= cutoff)
        });
        Ok((before - tables.sessions.len()) as u64)
    }
}
