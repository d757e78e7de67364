//! Redis-backed reliable work queue.
//!
//! Layout under the queue name `q`:
//! - `q:waiting` list of ready jobs (LPUSH in, RPOPLPUSH out)
//! - `q:processing:<consumer>` list of jobs reserved by one consumer
//! - `q:delayed` sorted set of retries scored by ready time (ms)
//! - `q:dead` list of dead letters

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::time::{Instant, sleep};
use tracing::{error, info};
use uuid::Uuid;

use crate::{DeadLetter, QueueError, QueueStats, QueuedJob, TriggerEvent, WorkQueue};

/// Pause between polls of an empty waiting list.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Retries promoted per reserve call.
const PROMOTE_BATCH: usize = 100;

/// KEYS[1] = delayed zset, KEYS[2] = waiting list, ARGV[1] = now (ms), ARGV[2] = batch.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, ARGV[2])
for _, payload in ipairs(due) do
    redis.call("ZREM", KEYS[1], payload)
    redis.call("LPUSH", KEYS[2], payload)
end
return #due
"#;

/// [`WorkQueue`] on Redis lists with per-consumer processing lists.
#[derive(Clone)]
pub struct RedisWorkQueue {
    conn: ConnectionManager,
    waiting: String,
    processing: String,
    delayed: String,
    dead: String,
    promote: Script,
}

impl RedisWorkQueue {
    /// Connect to Redis and address the queue `name` as consumer `consumer`.
    ///
    /// Producers may use any consumer name; it only matters for reserving.
    pub async fn connect(url: &str, name: &str, consumer: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(conn, name, consumer))
    }

    pub fn with_connection(conn: ConnectionManager, name: &str, consumer: &str) -> Self {
        Self {
            conn,
            waiting: format!("{name}:waiting"),
            processing: format!("{name}:processing:{consumer}"),
            delayed: format!("{name}:delayed"),
            dead: format!("{name}:dead"),
            promote: Script::new(PROMOTE_SCRIPT),
        }
    }

    async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let promoted: usize = self
            .promote
            .key(&self.delayed)
            .key(&self.waiting)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }

    /// Decode a reserved payload. Undecodable payloads are moved to the
    /// dead-letter list as-is so they cannot block the queue.
    async fn decode(&self, payload: String) -> Result<Option<QueuedJob>, QueueError> {
        match serde_json::from_str::<QueuedJob>(&payload) {
            Ok(mut job) => {
                job.receipt = Some(payload);
                Ok(Some(job))
            }
            Err(e) => {
                error!(error = %e, "dropping undecodable job payload to dead letters");
                let mut conn = self.conn.clone();
                let (): () = redis::pipe()
                    .atomic()
                    .lrem(&self.processing, 1, &payload)
                    .ignore()
                    .lpush(&self.dead, &payload)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    fn receipt(job: &QueuedJob) -> Result<&str, QueueError> {
        job.receipt
            .as_deref()
            .ok_or(QueueError::NotReserved(job.id))
    }
}

/// Delayed-set score for a retry due `delay` after `now_ms`.
fn ready_at_millis(now_ms: i64, delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_add(delay_ms)
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, event: TriggerEvent) -> Result<Uuid, QueueError> {
        let job = QueuedJob::new(event);
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.waiting, payload).await?;
        Ok(job.id)
    }

    async fn reserve(&self, wait: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            self.promote_due().await?;

            let mut conn = self.conn.clone();
            let payload: Option<String> = conn.rpoplpush(&self.waiting, &self.processing).await?;
            if let Some(payload) = payload {
                if let Some(job) = self.decode(payload).await? {
                    return Ok(Some(job));
                }
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let receipt = Self::receipt(job)?;
        let mut conn = self.conn.clone();
        let removed: usize = conn.lrem(&self.processing, 1, receipt).await?;
        if removed == 0 {
            return Err(QueueError::NotReserved(job.id));
        }
        Ok(())
    }

    async fn retry(&self, job: QueuedJob, delay: Duration) -> Result<(), QueueError> {
        let receipt = Self::receipt(&job)?.to_string();
        let payload = serde_json::to_string(&job)?;
        let ready_at = ready_at_millis(Utc::now().timestamp_millis(), delay);

        let mut conn = self.conn.clone();
        let (): () = redis::pipe()
            .atomic()
            .lrem(&self.processing, 1, receipt)
            .ignore()
            .zadd(&self.delayed, payload, ready_at)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, job: QueuedJob, reason: &str) -> Result<(), QueueError> {
        let receipt = Self::receipt(&job)?.to_string();
        let letter = DeadLetter {
            job,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        let payload = serde_json::to_string(&letter)?;

        let mut conn = self.conn.clone();
        let (): () = redis::pipe()
            .atomic()
            .lrem(&self.processing, 1, receipt)
            .ignore()
            .lpush(&self.dead, payload)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover_reserved(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn.rpoplpush(&self.processing, &self.waiting).await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, list = %self.processing, "returned reserved jobs to the queue");
        }
        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn.clone();
        let (waiting, delayed, reserved, dead): (usize, usize, usize, usize) = redis::pipe()
            .llen(&self.waiting)
            .zcard(&self.delayed)
            .llen(&self.processing)
            .llen(&self.dead)
            .query_async(&mut conn)
            .await?;
        Ok(QueueStats {
            waiting,
            delayed,
            reserved,
            dead,
        })
    }
}
