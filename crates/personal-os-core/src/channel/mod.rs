//! Event channel abstraction.
//!
//! The [`EventChannel`] trait is the only broker capability the pipeline
//! needs: publish a keyed payload to a topic, fetch the next message for
//! a consumer group, and commit a processed message. Implementations must
//! provide:
//!
//! - **Per-key ordering**: messages with the same key go to the same
//!   partition and are fetched in publish order.
//! - **At-least-once delivery**: [`fetch`](EventChannel::fetch) returns
//!   the first message after the group's committed offset, so a message
//!   that was fetched but never committed is fetched again.
//! - **Exclusive partitions**: within one group, a partition is served to
//!   at most one live consumer at a time (lease-based). A consumer keeps
//!   its lease alive with [`renew`](EventChannel::renew) while it works, and
//!   a commit from a consumer that lost the lease is refused.
//!
//! `fetch` never blocks; the worker loop owns waiting and cancellation.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A message read from a topic partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    /// Publish time, milliseconds since the Unix epoch.
    pub published_at: i64,
}

/// Identity of one consumer within a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub group: String,
    /// Unique per consumer loop; owns partition leases.
    pub consumer_id: String,
}

impl Subscription {
    pub fn new(topic: &str, group: &str) -> Self {
        Self {
            topic: topic.to_string(),
            group: group.to_string(),
            consumer_id: format!("{}-{}", group, Uuid::new_v4()),
        }
    }
}

/// Durable, partitioned, ordered-per-key publish/subscribe capability.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`publish`](EventChannel::publish) | Append a keyed payload to a topic |
/// | [`fetch`](EventChannel::fetch) | Next uncommitted message on a held partition |
/// | [`commit`](EventChannel::commit) | Advance the group's offset past a message |
/// | [`renew`](EventChannel::renew) | Extend the lease on a held partition |
/// | [`release`](EventChannel::release) | Give up all partition leases |
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;

    /// Return the next message for this consumer, or `None` if every held
    /// partition is caught up.
    async fn fetch(&self, sub: &Subscription) -> Result<Option<Message>>;

    /// Commit `message` for the subscription's group. Commits never move
    /// an offset backwards. Returns `false`, committing nothing, when this
    /// consumer no longer holds the message's partition.
    async fn commit(&self, sub: &Subscription, message: &Message) -> Result<bool>;

    /// Extend this consumer's lease on `partition` by a full TTL. Returns
    /// `false` when the lease was released or passed to another consumer.
    async fn renew(&self, sub: &Subscription, partition: u32) -> Result<bool>;

    /// Release the consumer's partition leases so another consumer can
    /// take over immediately.
    async fn release(&self, sub: &Subscription) -> Result<()>;
}

/// Stable partition for a key: first four bytes of SHA-256, modulo the
/// partition count. Identical across processes and restarts.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable_and_in_range() {
        for i in 0..100 {
            let key = format!("key-{}", i);
            let p = partition_for_key(&key, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for_key(&key, 4));
        }
        assert_eq!(partition_for_key("anything", 1), 0);
        assert_eq!(partition_for_key("anything", 0), 0);
    }

    #[test]
    fn test_partitions_spread_keys() {
        let mut seen = [false; 4];
        for i in 0..64 {
            seen[partition_for_key(&Uuid::new_v4().to_string(), 4) as usize] = true;
            if i > 32 && seen.iter().all(|s| *s) {
                break;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_consumer_ids_are_unique() {
        let a = Subscription::new("post.events", "g");
        let b = Subscription::new("post.events", "g");
        assert_ne!(a.consumer_id, b.consumer_id);
        assert!(a.consumer_id.starts_with("g-"));
    }
}
