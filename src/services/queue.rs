use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobType;

const QUEUE_KEY: &str = "wardrobe:jobs";
const INFLIGHT_KEY: &str = "wardrobe:jobs:inflight";
const LEASES_KEY: &str = "wardrobe:jobs:leases";
const DELAYED_KEY: &str = "wardrobe:jobs:delayed";
const DEAD_KEY: &str = "wardrobe:jobs:dead";

/// Job payload serialized onto the queue. Carries identity only; the
/// store row is authoritative for everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedPayload {
    pub job_id: Uuid,
    pub job_type: JobType,
}

/// A worker's temporary exclusive claim on a delivered job.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    /// Lease token; identifies the claim, not the job.
    pub token: String,
    pub payload: QueuedPayload,
    /// Raw serialized payload as it sits in the broker.
    pub raw: String,
}

/// Ordered, at-least-once delivery channel for job identifiers. Leased but
/// uncompleted jobs become visible again after their visibility timeout.
/// The broker is never authoritative for job state.
#[async_trait]
pub trait JobBroker: Send + Sync {
    async fn enqueue(&self, payload: &QueuedPayload) -> Result<(), QueueError>;

    /// Claim the next available job, if any, for `visibility` from now.
    async fn lease(
        &self,
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<LeasedJob>, QueueError>;

    /// Drop a finished delivery; no further redelivery.
    async fn complete(&self, lease: &LeasedJob) -> Result<(), QueueError>;

    /// Return a delivery to the queue, visible again after `delay`.
    async fn release(&self, lease: &LeasedJob, delay: Duration) -> Result<(), QueueError>;

    /// Park a poisoned delivery with no further automatic redelivery.
    async fn deadletter(&self, lease: &LeasedJob) -> Result<(), QueueError>;

    /// Number of jobs currently ready for delivery.
    async fn queue_depth(&self) -> Result<u64, QueueError>;

    /// Broker connectivity check (for health routes).
    async fn health_check(&self) -> Result<(), QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Redis-backed job broker with visibility-timeout leases and delayed
/// redelivery for retry backoff.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Move due delayed payloads and expired leases back onto the ready
    /// list. Run opportunistically at every lease call.
    async fn redeliver_due(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<(), QueueError> {
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, i64::MIN, now, 0, 16)
            .await?;
        for raw in due {
            // ZREM returning 1 means this caller won the promotion race.
            let removed: i64 = conn.zrem(DELAYED_KEY, &raw).await?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(QUEUE_KEY, &raw).await?;
            }
        }

        let expired: Vec<String> = conn
            .zrangebyscore_limit(LEASES_KEY, i64::MIN, now, 0, 16)
            .await?;
        for token in expired {
            let removed: i64 = conn.zrem(LEASES_KEY, &token).await?;
            if removed != 1 {
                continue;
            }
            let raw: Option<String> = conn.hget(INFLIGHT_KEY, &token).await?;
            conn.hdel::<_, _, ()>(INFLIGHT_KEY, &token).await?;
            if let Some(raw) = raw {
                tracing::warn!(lease_token = %token, "Lease expired, redelivering job");
                conn.lpush::<_, _, ()>(QUEUE_KEY, &raw).await?;
            }
        }

        Ok(())
    }

    async fn drop_lease(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        lease: &LeasedJob,
    ) -> Result<(), QueueError> {
        conn.hdel::<_, _, ()>(INFLIGHT_KEY, &lease.token).await?;
        conn.zrem::<_, _, ()>(LEASES_KEY, &lease.token).await?;
        Ok(())
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn enqueue(&self, payload: &QueuedPayload) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let raw = serde_json::to_string(payload)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &raw).await?;
        Ok(())
    }

    async fn lease(
        &self,
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<LeasedJob>, QueueError> {
        let mut conn = self.conn().await?;
        self.redeliver_due(&mut conn).await?;

        loop {
            let raw: Option<String> = conn.rpop(QUEUE_KEY, None).await?;
            let Some(raw) = raw else {
                return Ok(None);
            };

            let payload: QueuedPayload = match serde_json::from_str(&raw) {
                Ok(p) => p,
                Err(e) => {
                    // Poison payload; park it rather than looping on it.
                    tracing::error!(error = %e, %raw, "Undeliverable queue payload, dead-lettering");
                    conn.lpush::<_, _, ()>(DEAD_KEY, &raw).await?;
                    continue;
                }
            };

            let token = Uuid::new_v4().to_string();
            let deadline = Utc::now().timestamp_millis() + visibility.as_millis() as i64;
            conn.hset::<_, _, _, ()>(INFLIGHT_KEY, &token, &raw).await?;
            conn.zadd::<_, _, _, ()>(LEASES_KEY, &token, deadline).await?;

            tracing::debug!(
                %worker_id,
                job_id = %payload.job_id,
                lease_token = %token,
                "Leased job"
            );

            return Ok(Some(LeasedJob {
                token,
                payload,
                raw,
            }));
        }
    }

    async fn complete(&self, lease: &LeasedJob) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        self.drop_lease(&mut conn, lease).await
    }

    async fn release(&self, lease: &LeasedJob, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        self.drop_lease(&mut conn, lease).await?;

        if delay.is_zero() {
            conn.lpush::<_, _, ()>(QUEUE_KEY, &lease.raw).await?;
        } else {
            let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            conn.zadd::<_, _, _, ()>(DELAYED_KEY, &lease.raw, ready_at).await?;
        }
        Ok(())
    }

    async fn deadletter(&self, lease: &LeasedJob) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        self.drop_lease(&mut conn, lease).await?;
        conn.lpush::<_, _, ()>(DEAD_KEY, &lease.raw).await?;
        Ok(())
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}
