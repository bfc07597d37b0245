//! Realtime event fan-out.
//!
//! ```text
//!  token ──▶ connect() ──▶ verify + is_live ──▶ Connection { tx, cancel }
//!                                                   │
//!  emit(event) ──▶ event.channels() ──▶ ChannelState.members ──▶ tx.try_send
//!                                                   │
//!  store retirements ──▶ evict_session() ──▶ Closed frame + cancel
//! ```
//!
//! The router holds only derived state. Losing it costs nothing but a
//! reconnect: every subscription is rebuilt from a token on connect.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::crypto::tokens::{SessionClaims, StaffClaims, TokenCodec};
use crate::error::{AppError, Result};
use crate::models::events::{Channel, DomainEvent};
use crate::models::session::{SessionId, SessionRetired, SessionStatus};
use crate::services::sessions::TableSessionStore;

pub type ConnectionId = u64;

/// What a connecting client presents.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    Session(&'a str),
    Staff(&'a str),
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Welcome {
        connection_id: ConnectionId,
        channels: Vec<Channel>,
    },
    Event {
        channel: Channel,
        seq: u64,
        event: &'static str,
        message: &'static str,
        payload: DomainEvent,
    },
    Pong,
    Touched,
    Error {
        message: String,
    },
    Closed {
        reason: String,
        message: String,
    },
}

/// Client → server frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Touch,
}

/// The transport's end of a live subscription.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub session_id: Option<SessionId>,
    pub frames: mpsc::Receiver<Frame>,
    /// Fires on eviction, overflow or router shutdown.
    pub cancel: CancellationToken,
    /// When the presented token stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// Disconnects its connection on drop. See [`EventRouter::guard`].
pub struct ConnectionGuard {
    router: Arc<EventRouter>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.router.disconnect(self.id);
    }
}

struct Connection {
    session_id: Option<SessionId>,
    channels: Vec<Channel>,
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ChannelState {
    seq: u64,
    members: HashSet<ConnectionId>,
}

pub struct EventRouter {
    tokens: TokenCodec,
    sessions: Arc<TableSessionStore>,
    connections: DashMap<ConnectionId, Connection>,
    channels: DashMap<Channel, ChannelState>,
    by_session: DashMap<SessionId, HashSet<ConnectionId>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    shutdown: CancellationToken,
}

impl EventRouter {
    pub fn new(tokens: TokenCodec, sessions: Arc<TableSessionStore>, queue_capacity: usize) -> Self {
        Self {
            tokens,
            sessions,
            connections: DashMap::new(),
            channels: DashMap::new(),
            by_session: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Authenticates a new connection and subscribes it. On any failure
    /// nothing is left registered.
    pub async fn connect(&self, credential: Credential<'_>) -> Result<ConnectionHandle> {
        let (session_id, channels, exp) = match credential {
            Credential::Session(token) => {
                let claims: SessionClaims = self.tokens.verify(token)?;
                if !self.sessions.is_live(claims.session_id).await? {
                    return Err(AppError::InvalidToken("Session is no longer live".to_string()));
                }
                let mut channels = vec![Channel::Table(claims.table_id.clone())];
                if let Some(role) = claims.role {
                    channels.extend(role.listens_to().iter().copied().map(Channel::Role));
                }
                (Some(claims.session_id), channels, claims.exp)
            }
            Credential::Staff(token) => {
                let claims: StaffClaims = self.tokens.verify(token)?;
                let channels = claims
                    .role
                    .listens_to()
                    .iter()
                    .copied()
                    .map(Channel::Role)
                    .collect();
                (None, channels, claims.exp)
            }
        };

        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| AppError::InvalidToken("Bad expiry".to_string()))?;

        let handle = self.register(session_id, channels, expires_at);

        // A close that committed while we were registering would have found
        // nothing to evict; check again now that we are visible.
        if let Some(session_id) = session_id {
            let live = self.sessions.is_live(session_id).await;
            if !matches!(live, Ok(true)) {
                self.disconnect(handle.id);
                return match live {
                    Err(e) => Err(e),
                    _ => Err(AppError::InvalidToken("Session is no longer live".to_string())),
                };
            }
        }

        Ok(handle)
    }

    /// Accepts either token class: a session token first, then a staff token.
    pub async fn connect_token(&self, token: &str) -> Result<ConnectionHandle> {
        match self.connect(Credential::Session(token)).await {
            Err(AppError::InvalidToken(reason)) => match self.connect(Credential::Staff(token)).await {
                Err(AppError::InvalidToken(_)) => Err(AppError::InvalidToken(reason)),
                other => other,
            },
            other => other,
        }
    }

    fn register(
        &self,
        session_id: Option<SessionId>,
        channels: Vec<Channel>,
        expires_at: DateTime<Utc>,
    ) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, frames) = mpsc::channel(self.queue_capacity);
        let cancel = self.shutdown.child_token();

        // The queue is empty, so the welcome frame always fits.
        let _ = tx.try_send(Frame::Welcome {
            connection_id: id,
            channels: channels.clone(),
        });

        self.connections.insert(
            id,
            Connection {
                session_id,
                channels: channels.clone(),
                tx,
                cancel: cancel.clone(),
            },
        );
        if let Some(session_id) = session_id {
            self.by_session.entry(session_id).or_default().insert(id);
        }
        for channel in &channels {
            self.channels.entry(channel.clone()).or_default().members.insert(id);
        }

        tracing::info!(
            connection_id = id,
            session_id = ?session_id,
            channels = ?channels,
            "🔌 Realtime connection subscribed"
        );

        ConnectionHandle {
            id,
            session_id,
            frames,
            cancel,
            expires_at,
        }
    }

    /// Delivers `event` to one channel. Returns how many connections got it.
    pub fn publish(&self, channel: &Channel, event: &DomainEvent) -> usize {
        self.publish_once(channel, event, &mut HashSet::new())
    }

    /// Delivers `event` to every channel it belongs on, at most once per connection.
    pub fn emit(&self, event: &DomainEvent) -> usize {
        let mut reached = HashSet::new();
        event
            .channels()
            .iter()
            .map(|channel| self.publish_once(channel, event, &mut reached))
            .sum()
    }

    fn publish_once(
        &self,
        channel: &Channel,
        event: &DomainEvent,
        reached: &mut HashSet<ConnectionId>,
    ) -> usize {
        let mut overflowed = Vec::new();
        let mut delivered = 0;

        // The channel entry stays locked for the whole fan-out, so concurrent
        // publishers to one channel are delivered in sequence order.
        if let Some(mut state) = self.channels.get_mut(channel) {
            state.seq += 1;
            let frame = Frame::Event {
                channel: channel.clone(),
                seq: state.seq,
                event: event.name(),
                message: event.message(),
                payload: event.clone(),
            };

            for id in state.members.iter() {
                if !reached.insert(*id) {
                    continue;
                }
                let Some(connection) = self.connections.get(id) else {
                    continue;
                };
                match connection.tx.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => overflowed.push(*id),
                }
            }
        }

        for id in overflowed {
            tracing::warn!(connection_id = id, channel = %channel, "Send queue full, disconnecting");
            self.disconnect(id);
        }

        tracing::debug!(channel = %channel, event = event.name(), delivered, "📣 Event published");
        delivered
    }

    /// Answers one inbound client frame. Problems stay on this connection.
    pub async fn handle_client_frame(&self, id: ConnectionId, raw: &str) -> Frame {
        let parsed: ClientFrame = match sonic_rs::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection_id = id, "Malformed client frame: {}", e);
                return Frame::Error {
                    message: "Malformed frame".to_string(),
                };
            }
        };

        match parsed {
            ClientFrame::Ping => Frame::Pong,
            ClientFrame::Touch => {
                let session_id = self.connections.get(&id).and_then(|c| c.session_id);
                let Some(session_id) = session_id else {
                    return Frame::Error {
                        message: "Connection is not bound to a session".to_string(),
                    };
                };
                match self.sessions.touch(session_id).await {
                    Ok(()) => Frame::Touched,
                    Err(AppError::NotFound) => {
                        self.evict_session(session_id, SessionStatus::Expired);
                        Frame::Error {
                            message: "Session is no longer live".to_string(),
                        }
                    }
                    Err(e) => {
                        tracing::error!(connection_id = id, "Touch failed: {}", e);
                        Frame::Error {
                            message: "Internal error".to_string(),
                        }
                    }
                }
            }
        }
    }

    /// Drops a connection and all of its subscriptions.
    pub fn disconnect(&self, id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&id) else {
            return;
        };

        for channel in &connection.channels {
            if let Some(mut state) = self.channels.get_mut(channel) {
                state.members.remove(&id);
            }
        }
        if let Some(session_id) = connection.session_id {
            if let Some(mut ids) = self.by_session.get_mut(&session_id) {
                ids.remove(&id);
            }
            self.by_session.remove_if(&session_id, |_, ids| ids.is_empty());
        }
        connection.cancel.cancel();

        tracing::debug!(connection_id = id, "🔌 Realtime connection removed");
    }

    /// Ties `id` to the returned guard: the connection is dropped from the
    /// router when the guard is, whether or not it was ever served.
    pub fn guard(self: &Arc<Self>, id: ConnectionId) -> ConnectionGuard {
        ConnectionGuard {
            router: Arc::clone(self),
            id,
        }
    }

    /// Forcibly closes every connection bound to `session_id`.
    pub fn evict_session(&self, session_id: SessionId, status: SessionStatus) -> usize {
        let Some((_, ids)) = self.by_session.remove(&session_id) else {
            return 0;
        };

        let notice = match status {
            SessionStatus::Expired => "Your session has expired. Please scan the table QR code again",
            _ => "Your session has ended",
        };
        for id in &ids {
            if let Some(connection) = self.connections.get(id) {
                let _ = connection.tx.try_send(Frame::Closed {
                    reason: status.as_str().to_ascii_lowercase(),
                    message: notice.to_string(),
                });
            }
            self.disconnect(*id);
        }

        tracing::info!(session_id = %session_id, evicted = ids.len(), "🚪 Evicted session connections");
        ids.len()
    }

    /// Evicts every session-bound connection whose session is no longer live.
    pub async fn evict_stale(&self) -> usize {
        let bound: Vec<SessionId> = self.by_session.iter().map(|entry| *entry.key()).collect();
        let mut evicted = 0;
        for session_id in bound {
            match self.sessions.is_live(session_id).await {
                Ok(true) => {}
                Ok(false) => evicted += self.evict_session(session_id, SessionStatus::Expired),
                Err(e) => tracing::warn!(session_id = %session_id, "Liveness check failed: {}", e),
            }
        }
        evicted
    }

    /// Follows store retirements until shutdown, evicting as they arrive.
    pub fn spawn_eviction_listener(
        self: &Arc<Self>,
        mut retirements: broadcast::Receiver<SessionRetired>,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    _ = router.shutdown.cancelled() => break,
                    notice = retirements.recv() => notice,
                };

                match notice {
                    Ok(SessionRetired {
                        session_id,
                        table_id,
                        status,
                    }) => {
                        router.evict_session(session_id, status);
                        router.emit(&DomainEvent::SessionEnded {
                            session_id,
                            table_id,
                            status,
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Retirement notices lagged, reconciling");
                        router.evict_stale().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Eviction listener stopped");
        })
    }

    /// Cancels every connection. Subscriptions are gone afterwards.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.connections.clear();
        self.by_session.clear();
        for mut state in self.channels.iter_mut() {
            state.members.clear();
        }
        tracing::info!("🛑 Realtime router shut down");
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.channels
            .get(channel)
            .map(|state| state.members.len())
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, id: ConnectionId, channel: &Channel) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|state| state.members.contains(&id))
    }

}
