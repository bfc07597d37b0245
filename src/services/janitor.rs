use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::services::orders::OrderTableIndex;
use crate::services::sessions::TableSessionStore;

/// Background reclamation of expired table sessions.
///
/// Sweeps once on start, then every `interval` until stopped. A failed sweep
/// is logged and the schedule carries on.
pub struct SessionJanitor {
    store: Arc<TableSessionStore>,
    interval: Duration,
    purge_grace: chrono::Duration,
    orders: Option<(Arc<OrderTableIndex>, chrono::Duration)>,
    shutdown: CancellationToken,
}

/// Stops the janitor. Dropping it leaves the janitor running.
pub struct JanitorHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancels the schedule and waits for an in-flight sweep to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("❌ Session janitor task ended abnormally: {}", e);
        }
    }
}

impl SessionJanitor {
    pub fn new(
        store: Arc<TableSessionStore>,
        interval: Duration,
        purge_grace: chrono::Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            interval,
            purge_grace,
            orders: None,
            shutdown,
        }
    }

    /// Also forgets order→table pairings not seen for `retention` on each sweep.
    pub fn with_order_index(mut self, orders: Arc<OrderTableIndex>, retention: chrono::Duration) -> Self {
        self.orders = Some((orders, retention));
        self
    }

    pub fn spawn(self) -> JanitorHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());
        JanitorHandle { shutdown, task }
    }

    async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "✅ Session janitor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // The first tick completes immediately.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Not raced against shutdown: a started sweep always completes.
            self.sweep_once().await;
        }

        tracing::info!("🛑 Session janitor stopped");
    }

    /// One sweep. Never fails; errors become log lines.
    pub async fn sweep_once(&self) {
        tracing::debug!("🧹 Sweeping expired table sessions...");

        match self.store.sweep_expired().await {
            Ok(0) => tracing::debug!("No expired sessions"),
            Ok(count) => tracing::info!(count, "🧹 Expired table sessions reclaimed"),
            Err(e) => {
                let failure = AppError::SweepFailure(e.to_string());
                tracing::error!("❌ {}", failure);
            }
        }

        match self.store.purge_retired(self.purge_grace).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "🗑️ Retired sessions purged"),
            Err(e) => tracing::error!("❌ Purge of retired sessions failed: {}", e),
        }

        if let Some((orders, retention)) = &self.orders {
            let pruned = orders.prune_before(chrono::Utc::now() - *retention);
            if pruned > 0 {
                tracing::info!(pruned, "🗑️ Stale order pairings forgotten");
            }
        }
    }
}
