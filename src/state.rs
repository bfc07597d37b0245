use std::sync::Arc;

use crate::config::Config;
use crate::crypto::tokens::TokenCodec;
use crate::crypto::webhook::WebhookVerifiers;
use crate::error::Result;
use crate::repositories::redis_session::RedisSessionRepository;
use crate::repositories::session::{InMemorySessionRepository, SessionRepository};
use crate::services::orders::OrderTableIndex;
use crate::services::realtime::EventRouter;
use crate::services::sessions::TableSessionStore;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Mints and verifies session and staff tokens.
    pub tokens: TokenCodec,
    /// The table session store.
    pub sessions: Arc<TableSessionStore>,
    /// The realtime event router.
    pub router: Arc<EventRouter>,
    /// Order → table pairings for payment fan-out.
    pub orders: Arc<OrderTableIndex>,
    /// Payment callback verifiers.
    pub webhooks: WebhookVerifiers,
}

impl AppState {
    /// Creates a new `AppState`, backed by Redis when `REDIS_URL` is set.
    pub async fn new(config: &Config) -> Result<Self> {
        let repo: Arc<dyn SessionRepository> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisSessionRepository::connect(url).await?),
            None => {
                tracing::warn!("⚠️  REDIS_URL not set: table sessions are kept in memory");
                Arc::new(InMemorySessionRepository::new())
            }
        };
        Ok(Self::with_repository(config, repo))
    }

    /// Builds the state around an existing repository.
    pub fn with_repository(config: &Config, repo: Arc<dyn SessionRepository>) -> Self {
        let tokens = TokenCodec::new(
            config.token_secret.clone(),
            config.session_ttl,
            config.staff_token_ttl,
        );
        let sessions = Arc::new(TableSessionStore::new(
            repo,
            config.session_ttl,
            config.security_code_ttl,
        ));
        let router = Arc::new(EventRouter::new(
            tokens.clone(),
            Arc::clone(&sessions),
            config.realtime_queue_capacity,
        ));
        tracing::info!("✅ Session store and realtime router initialized");

        Self {
            config: config.clone(),
            tokens,
            sessions,
            router,
            orders: Arc::new(OrderTableIndex::new()),
            webhooks: WebhookVerifiers::new(&config.gateway_secrets, config.replay_window),
        }
    }
}
