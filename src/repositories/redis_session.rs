use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::error::{AppError, Result};
use crate::models::session::{SessionId, SessionStatus, TableId, TableSession};
use crate::repositories::session::SessionRepository;

const SESSION_PREFIX: &str = "table_session:";
const ACTIVE_PREFIX: &str = "table_session:active:";
const EXPIRY_INDEX: &str = "table_session:expiry";
const RETIRED_INDEX: &str = "table_session:retired";

const INSERT_ACTIVE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('HSET', KEYS[2], 'session_id', ARGV[1], 'table_id', ARGV[2], 'device_id', ARGV[3],
  'status', 'ACTIVE', 'created_at', ARGV[4], 'last_activity_at', ARGV[5], 'expires_at', ARGV[6])
redis.call('SET', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[6], ARGV[1])
return 1
"#;

const TRANSITION: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= ARGV[1] then return 0 end
if ARGV[6] ~= '' and tonumber(redis.call('HGET', KEYS[1], 'expires_at')) >= tonumber(ARGV[6]) then return 0 end
redis.call('HSET', KEYS[1], 'status', ARGV[2])
if ARGV[2] ~= 'ACTIVE' then
  redis.call('HSET', KEYS[1], 'retired_at', ARGV[3])
  redis.call('ZREM', KEYS[2], ARGV[5])
  redis.call('ZADD', KEYS[3], ARGV[3], ARGV[5])
  local pointer = ARGV[4] .. redis.call('HGET', KEYS[1], 'table_id')
  if redis.call('GET', pointer) == ARGV[5] then redis.call('DEL', pointer) end
end
return 1
"#;

const TOUCH: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'ACTIVE' then return 0 end
if tonumber(redis.call('HGET', KEYS[1], 'expires_at')) < tonumber(ARGV[1]) then return 0 end
redis.call('HSET', KEYS[1], 'last_activity_at', ARGV[1], 'expires_at', ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
return 1
"#;

const PURGE: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
for _, id in ipairs(ids) do redis.call('DEL', ARGV[2] .. id) end
if #ids > 0 then redis.call('ZREM', KEYS[1], unpack(ids)) end
return #ids
"#;

fn session_key(session_id: SessionId) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

fn active_key(table_id: &TableId) -> String {
    format!("{}{}", ACTIVE_PREFIX, table_id)
}

fn millis_to_datetime(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| AppError::Internal(format!("Corrupt session field {}", field)))
}

/// A helper function to map a Redis hash to a `TableSession`.
fn hash_to_session(mut hash: HashMap<String, String>) -> Result<TableSession> {
    let mut take = |field: &str| {
        hash.remove(field)
            .ok_or_else(|| AppError::Internal(format!("Missing session field {}", field)))
    };

    let session_id = take("session_id")?.parse()?;
    let table_id = TableId::new(take("table_id")?);
    let device_id = Some(take("device_id")?).filter(|d| !d.is_empty());
    let status = take("status")?.parse()?;
    let created_at = millis_to_datetime("created_at", &take("created_at")?)?;
    let last_activity_at = millis_to_datetime("last_activity_at", &take("last_activity_at")?)?;
    let expires_at = millis_to_datetime("expires_at", &take("expires_at")?)?;
    let retired_at = match take("retired_at") {
        Ok(raw) => Some(millis_to_datetime("retired_at", &raw)?),
        Err(_) => None,
    };

    Ok(TableSession {
        session_id,
        table_id,
        device_id,
        status,
        created_at,
        last_activity_at,
        expires_at,
        retired_at,
    })
}

/// Sessions stored in Redis. Conditional updates run as Lua scripts so each
/// one is atomic on the server.
#[derive(Clone)]
pub struct RedisSessionRepository {
    redis: ConnectionManager,
}

impl RedisSessionRepository {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let redis = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis Connection Manager initialized for table sessions");
        Ok(Self { redis })
    }

    async fn load(&self, key: String) -> Result<Option<TableSession>> {
        let hash: HashMap<String, String> = self.redis.clone().hgetall(key).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        hash_to_session(hash).map(Some)
    }

    async fn run_transition(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
        due_before: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let due_before = due_before
            .map(|due| due.timestamp_millis().to_string())
            .unwrap_or_default();

        let changed: i32 = Script::new(TRANSITION)
            .key(session_key(session_id))
            .key(EXPIRY_INDEX)
            .key(RETIRED_INDEX)
            .arg(from.as_str())
            .arg(to.as_str())
            .arg(at.timestamp_millis())
            .arg(ACTIVE_PREFIX)
            .arg(session_id.to_string())
            .arg(due_before)
            .invoke_async(&mut self.redis.clone())
            .await?;
        Ok(changed == 1)
    }
}

#[async_trait]
impl SessionRepository for RedisSessionRepository {
    async fn insert_active(&self, session: &TableSession) -> Result<()> {
        let inserted: i32 = Script::new(INSERT_ACTIVE)
            .key(active_key(&session.table_id))
            .key(session_key(session.session_id))
            .key(EXPIRY_INDEX)
            .arg(session.session_id.to_string())
            .arg(session.table_id.as_str())
            .arg(session.device_id.as_deref().unwrap_or(""))
            .arg(session.created_at.timestamp_millis())
            .arg(session.last_activity_at.timestamp_millis())
            .arg(session.expires_at.timestamp_millis())
            .invoke_async(&mut self.redis.clone())
            .await?;

        if inserted == 0 {
            return Err(AppError::Internal(format!(
                "Table {} already has an active session",
                session.table_id
            )));
        }
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<TableSession>> {
        self.load(session_key(session_id)).await
    }

    async fn active_for_table(&self, table_id: &TableId) -> Result<Option<TableSession>> {
        let pointer: Option<String> = self.redis.clone().get(active_key(table_id)).await?;
        match pointer {
            Some(id) => self.get(id.parse()?).await,
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.run_transition(session_id, from, to, at, None).await
    }

    async fn expire_due(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<bool> {
        self.run_transition(
            session_id,
            SessionStatus::Active,
            SessionStatus::Expired,
            now,
            Some(now),
        )
        .await
    }

    async fn touch(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let touched: i32 = Script::new(TOUCH)
            .key(session_key(session_id))
            .key(EXPIRY_INDEX)
            .arg(at.timestamp_millis())
            .arg(expires_at.timestamp_millis())
            .arg(session_id.to_string())
            .invoke_async(&mut self.redis.clone())
            .await?;
        Ok(touched == 1)
    }

    async fn expired_active(&self, now: DateTime<Utc>) -> Result<Vec<TableSession>> {
        let ids: Vec<String> = self
            .redis
            .clone()
            .zrangebyscore(EXPIRY_INDEX, "-inf", format!("({}", now.timestamp_millis()))
            .await?;

        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = self.get(id.parse()?).await? {
                if session.status == SessionStatus::Active {
                    expired.push(session);
                }
            }
        }
        Ok(expired)
    }

    async fn purge_retired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let purged: u64 = Script::new(PURGE)
            .key(RETIRED_INDEX)
            .arg(cutoff.timestamp_millis())
            .arg(SESSION_PREFIX)
            .invoke_async(&mut self.redis.clone())
            .await?;
        Ok(purged)
    }
}
