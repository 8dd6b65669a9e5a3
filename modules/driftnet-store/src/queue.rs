// At-least-once work queue. The Postgres implementation leans on
// `FOR UPDATE SKIP LOCKED` so competing workers never hand out the same
// message inside one visibility window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::time::Instant;

use driftnet_common::{CrawlMessage, IngestError, Result};

/// How long a received message stays invisible before redelivery.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Messages received more times than this are dropped as poison.
pub const DEFAULT_DEAD_LETTER_THRESHOLD: u32 = 5;

/// Pause between polls while waiting for messages.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A received message plus the handle needed to delete it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub handle: String,
    pub payload: CrawlMessage,
    pub receive_count: u32,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, message: &CrawlMessage) -> Result<()>;

    /// Receive up to `max_messages`, waiting up to `wait` for the first
    /// one. Received messages become invisible for the visibility window;
    /// they reappear unless deleted.
    async fn receive(&self, max_messages: u32, wait: Duration) -> Result<Vec<QueueMessage>>;

    async fn delete(&self, handle: &str) -> Result<()>;
}

// --- Postgres ---

pub struct PostgresQueue {
    pool: PgPool,
    queue_name: String,
    visibility_timeout: Duration,
    dead_letter_threshold: u32,
}

impl PostgresQueue {
    pub fn new(pool: PgPool, queue_name: &str) -> Self {
        Self {
            pool,
            queue_name: queue_name.to_string(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            dead_letter_threshold: DEFAULT_DEAD_LETTER_THRESHOLD,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    async fn receive_once(&self, max_messages: u32) -> Result<Vec<QueueMessage>> {
        let rows = sqlx::query_as::<_, (i64, serde_json::Value, i32)>(
            r#"
            WITH next AS (
                SELECT id FROM queue_messages
                WHERE queue_name = $1 AND visible_at <= now()
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_messages m
            SET visible_at = now() + make_interval(secs => $3),
                receive_count = m.receive_count + 1
            FROM next
            WHERE m.id = next.id
            RETURNING m.id, m.payload, m.receive_count
            "#,
        )
        .bind(&self.queue_name)
        .bind(max_messages as i64)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, payload, receive_count) in rows {
            let receive_count = receive_count as u32;
            if receive_count > self.dead_letter_threshold {
                tracing::warn!(
                    message_id = id,
                    receive_count,
                    "Dropping poison message past dead-letter threshold"
                );
                self.delete(&id.to_string()).await?;
                continue;
            }
            match serde_json::from_value::<CrawlMessage>(payload) {
                Ok(payload) => messages.push(QueueMessage {
                    handle: id.to_string(),
                    payload,
                    receive_count,
                }),
                Err(e) => {
                    tracing::warn!(message_id = id, error = %e, "Dropping undecodable message");
                    self.delete(&id.to_string()).await?;
                }
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl WorkQueue for PostgresQueue {
    async fn enqueue(&self, message: &CrawlMessage) -> Result<()> {
        let payload =
            serde_json::to_value(message).map_err(|e| anyhow::anyhow!("payload encode: {e}"))?;
        sqlx::query(r#"INSERT INTO queue_messages (queue_name, payload) VALUES ($1, $2)"#)
            .bind(&self.queue_name)
            .bind(&payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn receive(&self, max_messages: u32, wait: Duration) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let messages = self.receive_once(max_messages).await?;
            if !messages.is_empty() || Instant::now() >= deadline {
                return Ok(messages);
            }
            tokio::time::sleep(RECEIVE_POLL_INTERVAL.min(wait)).await;
        }
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        let id: i64 = handle
            .parse()
            .map_err(|_| IngestError::Validation(format!("bad queue handle: {handle}")))?;
        sqlx::query(r#"DELETE FROM queue_messages WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// --- In-memory ---

/// In-memory queue with real visibility-timeout semantics, for tests and
/// local runs.
pub struct MemoryQueue {
    messages: Mutex<VecDeque<PendingMessage>>,
    next_id: AtomicU64,
    visibility_timeout: Duration,
    dead_letter_threshold: u32,
}

struct PendingMessage {
    id: u64,
    payload: CrawlMessage,
    visible_at: Instant,
    receive_count: u32,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            dead_letter_threshold: DEFAULT_DEAD_LETTER_THRESHOLD,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.messages.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, message: &CrawlMessage) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.messages
            .lock()
            .expect("lock poisoned")
            .push_back(PendingMessage {
                id,
                payload: message.clone(),
                visible_at: Instant::now(),
                receive_count: 0,
            });
        Ok(())
    }

    async fn receive(&self, max_messages: u32, wait: Duration) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let mut received = Vec::new();
            {
                let mut messages = self.messages.lock().expect("lock poisoned");
                let now = Instant::now();
                let mut poison = Vec::new();
                for message in messages.iter_mut() {
                    if received.len() as u32 >= max_messages {
                        break;
                    }
                    if message.visible_at > now {
                        continue;
                    }
                    message.receive_count += 1;
                    message.visible_at = now + self.visibility_timeout;
                    if message.receive_count > self.dead_letter_threshold {
                        poison.push(message.id);
                        continue;
                    }
                    received.push(QueueMessage {
                        handle: message.id.to_string(),
                        payload: message.payload.clone(),
                        receive_count: message.receive_count,
                    });
                }
                messages.retain(|m| !poison.contains(&m.id));
            }
            if !received.is_empty() || Instant::now() >= deadline {
                return Ok(received);
            }
            tokio::time::sleep(Duration::from_millis(10).min(wait)).await;
        }
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        let id: u64 = handle
            .parse()
            .map_err(|_| IngestError::Validation(format!("bad queue handle: {handle}")))?;
        self.messages
            .lock()
            .expect("lock poisoned")
            .retain(|m| m.id != id);
        Ok(())
    }
}
