//! Durable [`EventChannel`] on top of the shared SQLite database.
//!
//! The API process and the worker share only the database file, so the
//! channel lives there too:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `event_log` | Append-only messages, dense offsets per `(topic, part)` |
//! | `consumer_offsets` | Next offset to deliver per `(group_id, topic, part)` |
//! | `partition_leases` | Which consumer owns a partition, and until when |
//!
//! A consumer scans partitions round-robin, renewing its lease on each one
//! before reading from it, and renews it again while a message is being
//! handled. Leases expire after `lease_ttl`, so a crashed worker's
//! partitions are picked up by the next live consumer. Commits are only
//! accepted from the current lease owner.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use personal_os_core::channel::{partition_for_key, EventChannel, Message, Subscription};

pub struct SqliteEventChannel {
    pool: SqlitePool,
    partitions: u32,
    lease_ttl: Duration,
    /// consumer id → next partition to scan.
    cursors: Mutex<HashMap<String, u32>>,
}

impl SqliteEventChannel {
    pub fn new(pool: SqlitePool, partitions: u32, lease_ttl: Duration) -> Self {
        Self {
            pool,
            partitions: partitions.max(1),
            lease_ttl,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Messages published to `topic` that `group` has not committed yet.
    pub async fn backlog(&self, topic: &str, group: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM event_log e
            WHERE e.topic = ?
              AND e.msg_offset >= COALESCE(
                  (SELECT o.next_offset FROM consumer_offsets o
                   WHERE o.group_id = ? AND o.topic = e.topic AND o.part = e.part), 0)
            "#,
        )
        .bind(topic)
        .bind(group)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    fn cursor(&self, consumer_id: &str) -> Result<u32> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|_| anyhow!("channel cursor lock poisoned"))?;
        Ok(cursors.get(consumer_id).copied().unwrap_or(0))
    }

    fn set_cursor(&self, consumer_id: &str, next: Option<u32>) -> Result<()> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| anyhow!("channel cursor lock poisoned"))?;
        match next {
            Some(p) => cursors.insert(consumer_id.to_string(), p),
            None => cursors.remove(consumer_id),
        };
        Ok(())
    }

    /// Take or renew the lease on a partition. Returns false while another
    /// consumer's lease is live.
    async fn acquire(&self, sub: &Subscription, partition: u32) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let expires_at = now + self.lease_ttl.as_millis() as i64;

        let result = sqlx::query(
            r#"
            INSERT INTO partition_leases (group_id, topic, part, owner, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(group_id, topic, part) DO UPDATE SET
                owner = excluded.owner,
                expires_at = excluded.expires_at
            WHERE partition_leases.owner = excluded.owner
               OR partition_leases.expires_at < ?
            "#,
        )
        .bind(&sub.group)
        .bind(&sub.topic)
        .bind(partition as i64)
        .bind(&sub.consumer_id)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn next_message(&self, sub: &Subscription, partition: u32) -> Result<Option<Message>> {
        let row = sqlx::query(
            r#"
            SELECT e.topic, e.part, e.msg_offset, e.msg_key, e.payload, e.published_at
            FROM event_log e
            WHERE e.topic = ? AND e.part = ?
              AND e.msg_offset >= COALESCE(
                  (SELECT next_offset FROM consumer_offsets
                   WHERE group_id = ? AND topic = ? AND part = ?), 0)
            ORDER BY e.msg_offset ASC
            LIMIT 1
            "#,
        )
        .bind(&sub.topic)
        .bind(partition as i64)
        .bind(&sub.group)
        .bind(&sub.topic)
        .bind(partition as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let part: i64 = row.get("part");
            let offset: i64 = row.get("msg_offset");
            Message {
                topic: row.get("topic"),
                partition: part as u32,
                offset: offset as u64,
                key: row.get("msg_key"),
                payload: row.get("payload"),
                published_at: row.get("published_at"),
            }
        }))
    }
}

#[async_trait]
impl EventChannel for SqliteEventChannel {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let partition = partition_for_key(key, self.partitions) as i64;
        let now = chrono::Utc::now().timestamp_millis();

        // Single write statement: the offset is assigned under the write lock.
        sqlx::query(
            r#"
            INSERT INTO event_log (topic, part, msg_offset, msg_key, payload, published_at)
            SELECT ?, ?, COALESCE(MAX(msg_offset) + 1, 0), ?, ?, ?
            FROM event_log WHERE topic = ? AND part = ?
            "#,
        )
        .bind(topic)
        .bind(partition)
        .bind(key)
        .bind(payload)
        .bind(now)
        .bind(topic)
        .bind(partition)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, sub: &Subscription) -> Result<Option<Message>> {
        let start = self.cursor(&sub.consumer_id)?;

        for step in 0..self.partitions {
            let partition = (start + step) % self.partitions;
            if !self.acquire(sub, partition).await? {
                continue;
            }
            if let Some(message) = self.next_message(sub, partition).await? {
                self.set_cursor(&sub.consumer_id, Some((partition + 1) % self.partitions))?;
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    async fn commit(&self, sub: &Subscription, message: &Message) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO consumer_offsets (group_id, topic, part, next_offset, updated_at)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM partition_leases
                WHERE group_id = ? AND topic = ? AND part = ? AND owner = ?)
            ON CONFLICT(group_id, topic, part) DO UPDATE SET
                next_offset = MAX(consumer_offsets.next_offset, excluded.next_offset),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&sub.group)
        .bind(&message.topic)
        .bind(message.partition as i64)
        .bind(message.offset as i64 + 1)
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(&sub.group)
        .bind(&message.topic)
        .bind(message.partition as i64)
        .bind(&sub.consumer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn renew(&self, sub: &Subscription, partition: u32) -> Result<bool> {
        let expires_at = chrono::Utc::now().timestamp_millis() + self.lease_ttl.as_millis() as i64;
        let result = sqlx::query(
            "UPDATE partition_leases SET expires_at = ? \
             WHERE group_id = ? AND topic = ? AND part = ? AND owner = ?",
        )
        .bind(expires_at)
        .bind(&sub.group)
        .bind(&sub.topic)
        .bind(partition as i64)
        .bind(&sub.consumer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, sub: &Subscription) -> Result<()> {
        sqlx::query("DELETE FROM partition_leases WHERE group_id = ? AND topic = ? AND owner = ?")
            .bind(&sub.group)
            .bind(&sub.topic)
            .bind(&sub.consumer_id)
            .execute(&self.pool)
            .await?;
        self.set_cursor(&sub.consumer_id, None)
    }
}
