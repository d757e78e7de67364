//! Redis-backed lease store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::{LeaseError, LeaseStore};

/// KEYS[1] = lease key, ARGV[1] = holder, ARGV[2] = ttl in milliseconds.
const ACQUIRE_OR_EXTEND_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if not current then
    redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2])
    return 1
elseif current == ARGV[1] then
    redis.call("PEXPIRE", KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// KEYS[1] = lease key, ARGV[1] = holder.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// [`LeaseStore`] running both lease primitives as server-side Lua scripts.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: ConnectionManager,
    acquire: Script,
    release: Script,
}

impl RedisLeaseStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, LeaseError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(conn))
    }

    /// Use an existing connection.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            acquire: Script::new(ACQUIRE_OR_EXTEND_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

/// TTL as a PX argument. PX rejects 0 and anything past `i64::MAX`.
fn ttl_millis(ttl: Duration) -> Result<i64, LeaseError> {
    i64::try_from(ttl.as_millis())
        .map(|millis| millis.max(1))
        .map_err(|_| LeaseError::TtlOutOfRange(ttl))
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire_or_extend(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, LeaseError> {
        let ttl_ms = ttl_millis(ttl)?;
        let mut conn = self.conn.clone();
        let granted: i64 = self
            .acquire
            .key(key)
            .arg(holder)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(granted == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool, LeaseError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn holder(&self, key: &str) -> Result<Option<String>, LeaseError> {
        let mut conn = self.conn.clone();
        let holder: Option<String> = conn.get(key).await?;
        Ok(holder)
    }
}
