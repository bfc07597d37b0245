use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tableside::AppError;
use tableside::models::events::DomainEvent;
use tableside::models::session::{SessionId, SessionStatus, TableId, TableSession};
use tableside::repositories::session::{InMemorySessionRepository, SessionRepository};
use tableside::services::janitor::SessionJanitor;
use tableside::services::orders::OrderTableIndex;
use tableside::services::sessions::TableSessionStore;
use tokio_util::sync::CancellationToken;

fn short_lived_store() -> Arc<TableSessionStore> {
    Arc::new(TableSessionStore::new(
        Arc::new(InMemorySessionRepository::new()),
        Duration::milliseconds(20),
        Duration::minutes(10),
    ))
}

#[tokio::test]
async fn first_sweep_runs_on_start() {
    let store = short_lived_store();
    let session = store.open(TableId::from("T07"), None).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(60)).await;

    let handle = SessionJanitor::new(
        Arc::clone(&store),
        StdDuration::from_secs(3600),
        Duration::minutes(60),
        CancellationToken::new(),
    )
    .spawn();

    tokio::time::sleep(StdDuration::from_millis(100)).await;
    handle.stop().await;

    let swept = store.get(session.session_id).await.unwrap().unwrap();
    assert_eq!(swept.status, SessionStatus::Expired);
}

#[tokio::test]
async fn sweeps_repeat_on_the_interval() {
    let store = short_lived_store();
    let handle = SessionJanitor::new(
        Arc::clone(&store),
        StdDuration::from_millis(50),
        Duration::minutes(60),
        CancellationToken::new(),
    )
    .spawn();

    // Opened after the first sweep already ran.
    tokio::time::sleep(StdDuration::from_millis(10)).await;
    let session = store.open(TableId::from("T07"), None).await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(200)).await;
    handle.stop().await;

    let swept = store.get(session.session_id).await.unwrap().unwrap();
    assert_eq!(swept.status, SessionStatus::Expired);
}

#[tokio::test]
async fn sweep_purges_after_grace() {
    let store = short_lived_store();
    let closed = store.open(TableId::from("T07"), None).await.unwrap();
    store.close(closed.session_id).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(5)).await;

    let janitor = SessionJanitor::new(
        Arc::clone(&store),
        StdDuration::from_secs(3600),
        Duration::zero(),
        CancellationToken::new(),
    );
    janitor.sweep_once().await;

    assert!(store.get(closed.session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn stop_returns_promptly_and_parent_cancel_stops_too() {
    let store = short_lived_store();
    let handle = SessionJanitor::new(
        Arc::clone(&store),
        StdDuration::from_secs(3600),
        Duration::minutes(60),
        CancellationToken::new(),
    )
    .spawn();

    tokio::time::timeout(StdDuration::from_secs(1), handle.stop())
        .await
        .expect("janitor did not stop");

    let parent = CancellationToken::new();
    let handle = SessionJanitor::new(
        store,
        StdDuration::from_secs(3600),
        Duration::minutes(60),
        parent.child_token(),
    )
    .spawn();
    parent.cancel();
    tokio::time::timeout(StdDuration::from_secs(1), handle.stop())
        .await
        .expect("janitor ignored parent shutdown");
}

#[tokio::test]
async fn sweep_forgets_stale_order_pairings() {
    let orders = Arc::new(OrderTableIndex::new());
    orders.observe_at(
        &DomainEvent::OrderPlaced {
            order_id: "ORD-old".into(),
            table_id: TableId::from("T01"),
        },
        Utc::now() - Duration::hours(48),
    );
    orders.observe(&DomainEvent::OrderPlaced {
        order_id: "ORD-new".into(),
        table_id: TableId::from("T02"),
    });

    let janitor = SessionJanitor::new(
        short_lived_store(),
        StdDuration::from_secs(3600),
        Duration::minutes(60),
        CancellationToken::new(),
    )
    .with_order_index(Arc::clone(&orders), Duration::hours(24));
    janitor.sweep_once().await;

    assert_eq!(orders.table_for("ORD-old"), None);
    assert_eq!(orders.table_for("ORD-new"), Some(TableId::from("T02")));
}

/// Fails the first scan for expired sessions, then behaves normally.
#[derive(Default)]
struct FailsFirstScan {
    inner: InMemorySessionRepository,
    scans: AtomicUsize,
}

#[async_trait]
impl SessionRepository for FailsFirstScan {
    async fn insert_active(&self, session: &TableSession) -> tableside::Result<()> {
        self.inner.insert_active(session).await
    }

    async fn get(&self, session_id: SessionId) -> tableside::Result<Option<TableSession>> {
        self.inner.get(session_id).await
    }

    async fn active_for_table(&self, table_id: &TableId) -> tableside::Result<Option<TableSession>> {
        self.inner.active_for_table(table_id).await
    }

    async fn transition(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> tableside::Result<bool> {
        self.inner.transition(session_id, from, to, at).await
    }

    async fn expire_due(&self, session_id: SessionId, now: DateTime<Utc>) -> tableside::Result<bool> {
        self.inner.expire_due(session_id, now).await
    }

    async fn touch(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> tableside::Result<bool> {
        self.inner.touch(session_id, at, expires_at).await
    }

    async fn expired_active(&self, now: DateTime<Utc>) -> tableside::Result<Vec<TableSession>> {
        if self.scans.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(AppError::Internal("storage unavailable".to_string()));
        }
        self.inner.expired_active(now).await
    }

    async fn purge_retired(&self, cutoff: DateTime<Utc>) -> tableside::Result<u64> {
        self.inner.purge_retired(cutoff).await
    }
}

#[tokio::test]
async fn failed_sweep_is_survived_and_the_next_tick_expires() {
    let repo = Arc::new(FailsFirstScan::default());
    let store = Arc::new(TableSessionStore::new(
        Arc::clone(&repo) as Arc<dyn SessionRepository>,
        Duration::milliseconds(20),
        Duration::minutes(10),
    ));
    let session = store.open(TableId::from("T07"), None).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(40)).await;

    let handle = SessionJanitor::new(
        Arc::clone(&store),
        StdDuration::from_millis(50),
        Duration::minutes(60),
        CancellationToken::new(),
    )
    .spawn();

    // The immediate sweep fails; the session is still active afterwards.
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert!(handle.is_running());
    assert_eq!(
        store.get(session.session_id).await.unwrap().unwrap().status,
        SessionStatus::Active
    );

    tokio::time::sleep(StdDuration::from_millis(150)).await;
    assert!(handle.is_running());
    assert!(repo.scans.load(Ordering::SeqCst) >= 2);
    handle.stop().await;

    let swept = store.get(session.session_id).await.unwrap().unwrap();
    assert_eq!(swept.status, SessionStatus::Expired);
}
