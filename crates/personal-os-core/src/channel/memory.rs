//! In-memory [`EventChannel`] implementation for tests.
//!
//! Partition logs, committed offsets and leases live in one `HashMap`-backed
//! state behind a `std::sync::Mutex`. Semantics match the SQLite channel:
//! per-key partitions, dense offsets, monotonic commits, lease-based
//! partition ownership and round-robin scanning.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{partition_for_key, EventChannel, Message, Subscription};

struct Lease {
    owner: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    /// (topic, partition) → messages, index == offset.
    logs: HashMap<(String, u32), Vec<Message>>,
    /// (group, topic, partition) → next offset to deliver.
    committed: HashMap<(String, String, u32), u64>,
    leases: HashMap<(String, String, u32), Lease>,
    /// consumer id → next partition to scan.
    cursors: HashMap<String, u32>,
}

/// In-memory event channel for tests.
pub struct InMemoryEventChannel {
    partitions: u32,
    lease_ttl: Duration,
    state: Mutex<State>,
}

impl InMemoryEventChannel {
    pub fn new(partitions: u32) -> Self {
        Self::with_lease_ttl(partitions, Duration::from_secs(30))
    }

    pub fn with_lease_ttl(partitions: u32, lease_ttl: Duration) -> Self {
        Self {
            partitions: partitions.max(1),
            lease_ttl,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("event channel state lock poisoned"))
    }

    /// Every message published to `topic`, ordered by partition then offset.
    pub fn messages(&self, topic: &str) -> Result<Vec<Message>> {
        let state = self.lock()?;
        let mut out = Vec::new();
        for partition in 0..self.partitions {
            if let Some(log) = state.logs.get(&(topic.to_string(), partition)) {
                out.extend(log.iter().cloned());
            }
        }
        Ok(out)
    }

    /// Next offset the group will be served on a partition.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Result<u64> {
        let state = self.lock()?;
        Ok(state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0))
    }
}

impl State {
    fn owns(&self, key: &(String, String, u32), consumer_id: &str) -> bool {
        self.leases
            .get(key)
            .is_some_and(|lease| lease.owner == consumer_id)
    }

    /// Take or renew the lease; false when another live consumer holds it.
    fn acquire(&mut self, sub: &Subscription, partition: u32, ttl: Duration) -> bool {
        let now = Instant::now();
        let key = (sub.group.clone(), sub.topic.clone(), partition);
        match self.leases.get_mut(&key) {
            Some(lease) if lease.owner != sub.consumer_id && lease.expires_at > now => false,
            Some(lease) => {
                lease.owner = sub.consumer_id.clone();
                lease.expires_at = now + ttl;
                true
            }
            None => {
                self.leases.insert(
                    key,
                    Lease {
                        owner: sub.consumer_id.clone(),
                        expires_at: now + ttl,
                    },
                );
                true
            }
        }
    }
}

#[async_trait]
impl EventChannel for InMemoryEventChannel {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let partition = partition_for_key(key, self.partitions);
        let mut state = self.lock()?;
        let log = state.logs.entry((topic.to_string(), partition)).or_default();
        let offset = log.len() as u64;
        log.push(Message {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload: payload.to_vec(),
            published_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    async fn fetch(&self, sub: &Subscription) -> Result<Option<Message>> {
        let mut state = self.lock()?;
        let start = state.cursors.get(&sub.consumer_id).copied().unwrap_or(0);

        for step in 0..self.partitions {
            let partition = (start + step) % self.partitions;
            if !state.acquire(sub, partition, self.lease_ttl) {
                continue;
            }
            let next = state
                .committed
                .get(&(sub.group.clone(), sub.topic.clone(), partition))
                .copied()
                .unwrap_or(0);
            let message = state
                .logs
                .get(&(sub.topic.clone(), partition))
                .and_then(|log| log.get(next as usize))
                .cloned();
            if let Some(message) = message {
                state
                    .cursors
                    .insert(sub.consumer_id.clone(), (partition + 1) % self.partitions);
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    async fn commit(&self, sub: &Subscription, message: &Message) -> Result<bool> {
        let mut state = self.lock()?;
        let key = (sub.group.clone(), message.topic.clone(), message.partition);
        if !state.owns(&key, &sub.consumer_id) {
            return Ok(false);
        }
        let entry = state.committed.entry(key).or_insert(0);
        *entry = (*entry).max(message.offset + 1);
        Ok(true)
    }

    async fn renew(&self, sub: &Subscription, partition: u32) -> Result<bool> {
        let mut state = self.lock()?;
        let key = (sub.group.clone(), sub.topic.clone(), partition);
        match state.leases.get_mut(&key) {
            Some(lease) if lease.owner == sub.consumer_id => {
                lease.expires_at = Instant::now() + self.lease_ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, sub: &Subscription) -> Result<()> {
        let mut state = self.lock()?;
        state.leases.retain(|(group, topic, _), lease| {
            !(group == &sub.group && topic == &sub.topic && lease.owner == sub.consumer_id)
        });
        state.cursors.remove(&sub.consumer_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "post.events";
    const GROUP: &str = "post-processor-group";

    #[tokio::test]
    async fn test_same_key_is_delivered_in_order() {
        let channel = InMemoryEventChannel::new(4);
        for i in 0..5 {
            channel
                .publish(TOPIC, "post-1", format!("m{}", i).as_bytes())
                .await
                .unwrap();
        }

        let sub = Subscription::new(TOPIC, GROUP);
        let mut seen = Vec::new();
        while let Some(msg) = channel.fetch(&sub).await.unwrap() {
            seen.push(String::from_utf8(msg.payload.clone()).unwrap());
            channel.commit(&sub, &msg).await.unwrap();
        }
        assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_uncommitted_message_is_redelivered() {
        let channel = InMemoryEventChannel::new(1);
        channel.publish(TOPIC, "k", b"a").await.unwrap();
        channel.publish(TOPIC, "k", b"b").await.unwrap();

        let sub = Subscription::new(TOPIC, GROUP);
        let first = channel.fetch(&sub).await.unwrap().unwrap();
        let again = channel.fetch(&sub).await.unwrap().unwrap();
        assert_eq!(first, again);

        channel.commit(&sub, &first).await.unwrap();
        let second = channel.fetch(&sub).await.unwrap().unwrap();
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn test_commit_never_moves_backwards() {
        let channel = InMemoryEventChannel::new(1);
        channel.publish(TOPIC, "k", b"a").await.unwrap();
        channel.publish(TOPIC, "k", b"b").await.unwrap();

        let sub = Subscription::new(TOPIC, GROUP);
        let a = channel.fetch(&sub).await.unwrap().unwrap();
        channel.commit(&sub, &a).await.unwrap();
        let b = channel.fetch(&sub).await.unwrap().unwrap();
        channel.commit(&sub, &b).await.unwrap();
        channel.commit(&sub, &a).await.unwrap();

        assert_eq!(channel.committed_offset(GROUP, TOPIC, 0).unwrap(), 2);
        assert!(channel.fetch(&sub).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_groups_consume_independently() {
        let channel = InMemoryEventChannel::new(2);
        channel.publish(TOPIC, "k", b"a").await.unwrap();

        let one = Subscription::new(TOPIC, "one");
        let two = Subscription::new(TOPIC, "two");
        let msg = channel.fetch(&one).await.unwrap().unwrap();
        channel.commit(&one, &msg).await.unwrap();

        assert!(channel.fetch(&one).await.unwrap().is_none());
        assert!(channel.fetch(&two).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_leased_partition_is_exclusive_until_released() {
        let channel = InMemoryEventChannel::new(1);
        channel.publish(TOPIC, "k", b"a").await.unwrap();

        let first = Subscription::new(TOPIC, GROUP);
        let second = Subscription::new(TOPIC, GROUP);
        assert!(channel.fetch(&first).await.unwrap().is_some());
        assert!(channel.fetch(&second).await.unwrap().is_none());

        channel.release(&first).await.unwrap();
        assert!(channel.fetch(&second).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let channel = InMemoryEventChannel::with_lease_ttl(1, Duration::from_millis(0));
        channel.publish(TOPIC, "k", b"a").await.unwrap();

        let first = Subscription::new(TOPIC, GROUP);
        let second = Subscription::new(TOPIC, GROUP);
        assert!(channel.fetch(&first).await.unwrap().is_some());
        assert!(channel.fetch(&second).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_round_robin_does_not_starve_partitions() {
        let channel = InMemoryEventChannel::new(4);
        let keys: Vec<String> = (0..40).map(|i| format!("key-{}", i)).collect();
        for key in &keys {
            channel.publish(TOPIC, key, key.as_bytes()).await.unwrap();
        }
        let used: std::collections::HashSet<u32> =
            keys.iter().map(|k| partition_for_key(k, 4)).collect();

        // Never committing: each fetch should still visit a different partition.
        let sub = Subscription::new(TOPIC, GROUP);
        let mut visited = std::collections::HashSet::new();
        for _ in 0..used.len() {
            let msg = channel.fetch(&sub).await.unwrap().unwrap();
            visited.insert(msg.partition);
        }
        assert_eq!(visited, used);
    }

    #[tokio::test]
    async fn test_renewed_lease_survives_its_ttl() {
        let channel = InMemoryEventChannel::with_lease_ttl(1, Duration::from_millis(100));
        channel.publish(TOPIC, "k", b"a").await.unwrap();

        let busy = Subscription::new(TOPIC, GROUP);
        let rival = Subscription::new(TOPIC, GROUP);
        let msg = channel.fetch(&busy).await.unwrap().unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert!(channel.renew(&busy, msg.partition).await.unwrap());
            assert!(channel.fetch(&rival).await.unwrap().is_none());
        }
        assert!(channel.commit(&busy, &msg).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_after_takeover_is_refused() {
        let channel = InMemoryEventChannel::with_lease_ttl(1, Duration::from_millis(20));
        channel.publish(TOPIC, "k", b"a").await.unwrap();

        let slow = Subscription::new(TOPIC, GROUP);
        let rival = Subscription::new(TOPIC, GROUP);
        let msg = channel.fetch(&slow).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let taken = channel.fetch(&rival).await.unwrap().unwrap();
        assert_eq!(taken.offset, msg.offset);
        assert!(!channel.renew(&slow, msg.partition).await.unwrap());
        assert!(!channel.commit(&slow, &msg).await.unwrap());
        assert_eq!(channel.committed_offset(GROUP, TOPIC, 0).unwrap(), 0);

        assert!(channel.commit(&rival, &taken).await.unwrap());
        assert_eq!(channel.committed_offset(GROUP, TOPIC, 0).unwrap(), 1);
    }
}
