//! Job queue over Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::QueuedRequest;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Max delivery attempts before DLQ
    pub max_retries: u32,
    /// Idle time before a pending message may be claimed from a dead worker
    pub claim_idle: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "fswap:jobs".to_string(),
            consumer_group: "fswap:workers".to_string(),
            dlq_stream_name: "fswap:dlq".to_string(),
            max_retries: 3,
            claim_idle: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            claim_idle: Duration::from_secs(
                std::env::var("QUEUE_CLAIM_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    "Consumer group already exists: {}",
                    self.config.consumer_group
                );
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a request. Returns the stream message id.
    pub async fn enqueue(&self, request: &QueuedRequest) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(request)?;

        // Requests carrying a caller job id are deduplicated for an hour.
        if let Some(key) = request.idempotency_key() {
            let dedup_key = format!("fswap:dedup:{key}");
            let exists: bool = conn.exists(&dedup_key).await?;
            if exists {
                warn!("Duplicate request rejected: {}", key);
                return Err(QueueError::Duplicate(key.to_string()));
            }
            conn.set_ex::<_, _, ()>(&dedup_key, "1", 3600).await?;
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("request")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!(
            "Enqueued request {} with message ID {}",
            request.describe(),
            message_id
        );

        Ok(message_id)
    }

    /// Drop the dedup key for a finished or dead-lettered request so the
    /// same job id can be submitted again.
    pub async fn clear_dedup(&self, request: &QueuedRequest) -> QueueResult<()> {
        if let Some(key) = request.idempotency_key() {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            conn.del::<_, ()>(format!("fswap:dedup:{key}")).await?;
        }
        Ok(())
    }

    /// Read new requests for this consumer, blocking up to `block_ms`.
    ///
    /// Unparseable payloads are acked away so they cannot wedge the group.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueuedRequest)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut requests = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(request) = self.parse_entry(&entry).await {
                    requests.push((entry.id.clone(), request));
                }
            }
        }
        Ok(requests)
    }

    /// Claim requests stuck pending on a dead consumer.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, QueuedRequest)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamAutoClaimReply = self
            .autoclaim_cmd(consumer_name, count)
            .query_async(&mut conn)
            .await?;

        let mut requests = Vec::new();
        for entry in result.claimed {
            if let Some(request) = self.parse_entry(&entry).await {
                info!("Claimed pending request from message {}", entry.id);
                requests.push((entry.id.clone(), request));
            }
        }
        Ok(requests)
    }

    /// XAUTOCLAIM scans the group's pending entries from `0-0` and takes
    /// ownership of any idle for at least `claim_idle`.
    fn autoclaim_cmd(&self, consumer_name: &str, count: usize) -> redis::Cmd {
        let mut cmd = redis::cmd("XAUTOCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(self.config.claim_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count);
        cmd
    }

    async fn parse_entry(&self, entry: &redis::streams::StreamId) -> Option<QueuedRequest> {
        if let Some(redis::Value::BulkString(payload)) = entry.map.get("request") {
            let payload_str = String::from_utf8_lossy(payload);
            match serde_json::from_str::<QueuedRequest>(&payload_str) {
                Ok(request) => return Some(request),
                Err(e) => {
                    warn!("Failed to parse request payload: {}", e);
                    self.ack(&entry.id).await.ok();
                }
            }
        }
        None
    }

    /// Acknowledge and delete a message.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Park a request on the dead-letter stream with its final error.
    pub async fn dlq(
        &self,
        message_id: &str,
        request: &QueuedRequest,
        error: &str,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(request)?;
        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("request")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;
        warn!("Moved request {} to DLQ: {}", request.describe(), error);
        Ok(())
    }

    /// Current stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Current dead-letter stream length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Record a failed attempt. The counter expires after a day.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("fswap:retry:{message_id}");
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    /// Max delivery attempts from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "fswap:jobs");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn bad_redis_url_rejected() {
        let config = QueueConfig {
            redis_url: "not-a-url".to_string(),
            ..QueueConfig::default()
        };
        assert!(JobQueue::new(config).is_err());
    }

    #[test]
    fn claim_uses_autoclaim_syntax() {
        // XCLAIM has no COUNT option; claiming must go through XAUTOCLAIM
        // with a 0-0 scan cursor.
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        let packed = queue.autoclaim_cmd("worker-1", 5).get_packed_command();
        let text = String::from_utf8_lossy(&packed);
        assert!(text.contains("XAUTOCLAIM"));
        assert!(text.contains("fswap:jobs"));
        assert!(text.contains("fswap:workers"));
        assert!(text.contains("worker-1"));
        assert!(text.contains("600000"));
        assert!(text.contains("0-0"));
        assert!(text.contains("COUNT"));
    }
}
