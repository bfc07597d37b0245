use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Duration;
use zeroize::Zeroizing;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The address the HTTP server listens on.
    pub bind_addr: SocketAddr,
    /// The URL of the Redis server. Sessions are kept in memory when unset.
    pub redis_url: Option<String>,
    /// The HS256 secret used for session and staff tokens.
    pub token_secret: Option<Zeroizing<String>>,
    /// Shared secrets, one per payment gateway.
    pub gateway_secrets: GatewaySecrets,
    /// Lifetime of a customer session and its token.
    pub session_ttl: Duration,
    /// Lifetime of an elevated staff token.
    pub staff_token_ttl: Duration,
    /// Lifetime of a security code.
    pub security_code_ttl: Duration,
    /// Period of the expired-session sweep.
    pub sweep_interval: std::time::Duration,
    /// How long a retired session is kept before it is hard-deleted.
    pub purge_grace: Duration,
    /// How long an order→table pairing is kept after its last order event.
    pub order_index_retention: Duration,
    /// Maximum accepted age of a timestamped webhook signature.
    pub replay_window: Duration,
    /// Bounded size of each realtime connection's send queue.
    pub realtime_queue_capacity: usize,
}

/// Per-gateway webhook secrets. Any of them may be absent.
#[derive(Clone, Default)]
pub struct GatewaySecrets {
    pub easypaisa: Option<Zeroizing<String>>,
    pub jazzcash: Option<Zeroizing<String>>,
    pub stripe: Option<Zeroizing<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: None,
            token_secret: None,
            gateway_secrets: GatewaySecrets::default(),
            session_ttl: Duration::hours(24),
            staff_token_ttl: Duration::days(7),
            security_code_ttl: Duration::minutes(10),
            sweep_interval: std::time::Duration::from_secs(15 * 60),
            purge_grace: Duration::minutes(60),
            order_index_retention: Duration::hours(24),
            replay_window: Duration::seconds(300),
            realtime_queue_capacity: 64,
        }
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// Secrets are optional here. Whatever needs a missing secret reports it
    /// when it is used.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", defaults.bind_addr)?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            token_secret: secret("SESSION_TOKEN_SECRET"),
            gateway_secrets: GatewaySecrets {
                easypaisa: secret("PAYMENT_EASYPAISA_SECRET"),
                jazzcash: secret("PAYMENT_JAZZCASH_SECRET"),
                stripe: secret("PAYMENT_STRIPE_SECRET"),
            },
            session_ttl: Duration::hours(parse_or("SESSION_TTL_HOURS", 24)?),
            staff_token_ttl: Duration::days(parse_or("STAFF_TOKEN_TTL_DAYS", 7)?),
            security_code_ttl: Duration::minutes(parse_or("SECURITY_CODE_TTL_MINUTES", 10)?),
            sweep_interval: std::time::Duration::from_secs(
                60 * parse_or::<u64>("SWEEP_INTERVAL_MINUTES", 15)?,
            ),
            purge_grace: Duration::minutes(parse_or("SESSION_PURGE_GRACE_MINUTES", 60)?),
            order_index_retention: Duration::hours(parse_or("ORDER_INDEX_RETENTION_HOURS", 24)?),
            replay_window: Duration::seconds(parse_or("WEBHOOK_REPLAY_WINDOW_SECS", 300)?),
            realtime_queue_capacity: parse_or("REALTIME_QUEUE_CAPACITY", 64)?,
        })
    }

    /// Logs a warning for every secret that is not configured.
    pub fn warn_missing_secrets(&self) {
        if self.token_secret.is_none() {
            tracing::warn!("⚠️  SESSION_TOKEN_SECRET not set: sessions cannot be opened");
        }
        let gateways = [
            ("PAYMENT_EASYPAISA_SECRET", &self.gateway_secrets.easypaisa),
            ("PAYMENT_JAZZCASH_SECRET", &self.gateway_secrets.jazzcash),
            ("PAYMENT_STRIPE_SECRET", &self.gateway_secrets.stripe),
        ];
        for (var, value) in gateways {
            if value.is_none() {
                tracing::warn!("⚠️  {} not set: callbacks from that gateway will be rejected", var);
            }
        }
    }
}

fn secret(var: &str) -> Option<Zeroizing<String>> {
    env::var(var)
        .ok()
        .filter(|value| !value.is_empty())
        .map(Zeroizing::new)
}

fn parse_or<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(var) {
        Ok(raw) => raw.parse().with_context(|| format!("Invalid {}", var)),
        Err(_) => Ok(default),
    }
}
