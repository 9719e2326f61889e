//! SQLite event channel: per-key ordering, commit semantics, consumer
//! groups, and partition leases across channel instances sharing one
//! database file.

mod common;

use std::sync::Arc;
use std::time::Duration;

use personal_os::db;
use personal_os::sqlite_channel::SqliteEventChannel;
use personal_os_core::channel::{partition_for_key, EventChannel, Message, Subscription};

const TOPIC: &str = "post.events";
const GROUP: &str = "post-processor-group";

async fn drain_all(channel: &dyn EventChannel, sub: &Subscription) -> Vec<Message> {
    let mut seen = Vec::new();
    while let Some(message) = channel.fetch(sub).await.unwrap() {
        channel.commit(sub, &message).await.unwrap();
        seen.push(message);
    }
    seen
}

#[tokio::test]
async fn test_messages_for_one_key_arrive_in_order() {
    let env = common::setup().await;
    for i in 0..5 {
        env.channel
            .publish(TOPIC, "post-1", format!("m{}", i).as_bytes())
            .await
            .unwrap();
    }
    env.channel.publish(TOPIC, "post-2", b"other").await.unwrap();

    let sub = Subscription::new(TOPIC, GROUP);
    let seen = drain_all(env.channel.as_ref(), &sub).await;
    assert_eq!(seen.len(), 6);

    let for_key: Vec<_> = seen
        .iter()
        .filter(|m| m.key == "post-1")
        .map(|m| String::from_utf8(m.payload.clone()).unwrap())
        .collect();
    assert_eq!(for_key, vec!["m0", "m1", "m2", "m3", "m4"]);

    let partition = partition_for_key("post-1", env.config.channel.partitions);
    let offsets: Vec<u64> = seen
        .iter()
        .filter(|m| m.key == "post-1")
        .map(|m| {
            assert_eq!(m.partition, partition);
            m.offset
        })
        .collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(env.channel.backlog(TOPIC, GROUP).await.unwrap(), 0);
}

#[tokio::test]
async fn test_uncommitted_message_is_redelivered() {
    let env = common::setup().await;
    env.channel.publish(TOPIC, "k", b"one").await.unwrap();
    env.channel.publish(TOPIC, "k", b"two").await.unwrap();

    let sub = Subscription::new(TOPIC, GROUP);
    let first = env.channel.fetch(&sub).await.unwrap().unwrap();
    let again = env.channel.fetch(&sub).await.unwrap().unwrap();
    assert_eq!(first.offset, again.offset);
    assert_eq!(again.payload, b"one");

    env.channel.commit(&sub, &again).await.unwrap();
    let next = env.channel.fetch(&sub).await.unwrap().unwrap();
    assert_eq!(next.payload, b"two");
    assert_eq!(env.channel.backlog(TOPIC, GROUP).await.unwrap(), 1);
}

#[tokio::test]
async fn test_commit_never_moves_backwards() {
    let env = common::setup().await;
    env.channel.publish(TOPIC, "k", b"one").await.unwrap();
    env.channel.publish(TOPIC, "k", b"two").await.unwrap();

    let sub = Subscription::new(TOPIC, GROUP);
    let first = env.channel.fetch(&sub).await.unwrap().unwrap();
    env.channel.commit(&sub, &first).await.unwrap();
    let second = env.channel.fetch(&sub).await.unwrap().unwrap();
    env.channel.commit(&sub, &second).await.unwrap();

    // A late duplicate commit of the first message.
    env.channel.commit(&sub, &first).await.unwrap();
    assert!(env.channel.fetch(&sub).await.unwrap().is_none());
}

#[tokio::test]
async fn test_groups_consume_independently() {
    let env = common::setup().await;
    env.channel.publish(TOPIC, "k", b"x").await.unwrap();

    let a = Subscription::new(TOPIC, "group-a");
    let b = Subscription::new(TOPIC, "group-b");
    assert_eq!(drain_all(env.channel.as_ref(), &a).await.len(), 1);
    assert_eq!(drain_all(env.channel.as_ref(), &b).await.len(), 1);
    assert_eq!(env.channel.backlog(TOPIC, "group-c").await.unwrap(), 1);
}

#[tokio::test]
async fn test_topics_are_separate() {
    let env = common::setup().await;
    env.channel.publish(TOPIC, "k", b"post").await.unwrap();
    env.channel.publish("media.events", "k", b"media").await.unwrap();

    let sub = Subscription::new("media.events", "media-processor-group");
    let seen = drain_all(env.channel.as_ref(), &sub).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload, b"media");
}

#[tokio::test]
async fn test_lease_excludes_second_consumer_until_released() {
    let env = common::setup().await;
    // A second process opening the same database.
    let other: Arc<SqliteEventChannel> = Arc::new(SqliteEventChannel::new(
        db::connect(&env.config).await.unwrap(),
        env.config.channel.partitions,
        Duration::from_secs(30),
    ));
    env.channel.publish(TOPIC, "k", b"x").await.unwrap();

    let first = Subscription::new(TOPIC, GROUP);
    let second = Subscription::new(TOPIC, GROUP);
    assert!(env.channel.fetch(&first).await.unwrap().is_some());
    assert!(other.fetch(&second).await.unwrap().is_none());

    env.channel.release(&first).await.unwrap();
    let message = other.fetch(&second).await.unwrap().unwrap();
    assert_eq!(message.payload, b"x");
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let env = common::setup().await;
    let short = SqliteEventChannel::new(
        db::connect(&env.config).await.unwrap(),
        1,
        Duration::from_millis(50),
    );
    short.publish(TOPIC, "k", b"x").await.unwrap();

    let crashed = Subscription::new(TOPIC, GROUP);
    let survivor = Subscription::new(TOPIC, GROUP);
    assert!(short.fetch(&crashed).await.unwrap().is_some());
    assert!(short.fetch(&survivor).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(short.fetch(&survivor).await.unwrap().is_some());
}

#[tokio::test]
async fn test_renewed_lease_outlives_its_ttl() {
    let env = common::setup().await;
    let short = SqliteEventChannel::new(
        db::connect(&env.config).await.unwrap(),
        1,
        Duration::from_millis(200),
    );
    short.publish(TOPIC, "k", b"x").await.unwrap();

    let busy = Subscription::new(TOPIC, GROUP);
    let rival = Subscription::new(TOPIC, GROUP);
    let message = short.fetch(&busy).await.unwrap().unwrap();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(short.renew(&busy, message.partition).await.unwrap());
        assert!(short.fetch(&rival).await.unwrap().is_none());
    }
    assert!(short.commit(&busy, &message).await.unwrap());
    assert_eq!(short.backlog(TOPIC, GROUP).await.unwrap(), 0);
}

#[tokio::test]
async fn test_commit_from_previous_owner_is_refused() {
    let env = common::setup().await;
    let short = SqliteEventChannel::new(
        db::connect(&env.config).await.unwrap(),
        1,
        Duration::from_millis(50),
    );
    short.publish(TOPIC, "k", b"x").await.unwrap();

    let slow = Subscription::new(TOPIC, GROUP);
    let rival = Subscription::new(TOPIC, GROUP);
    let message = short.fetch(&slow).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let taken = short.fetch(&rival).await.unwrap().unwrap();
    assert_eq!(taken.offset, message.offset);
    assert!(!short.renew(&slow, message.partition).await.unwrap());
    assert!(!short.commit(&slow, &message).await.unwrap());
    assert_eq!(short.backlog(TOPIC, GROUP).await.unwrap(), 1);

    assert!(short.commit(&rival, &taken).await.unwrap());
    assert_eq!(short.backlog(TOPIC, GROUP).await.unwrap(), 0);
}

#[tokio::test]
async fn test_commit_after_release_is_refused() {
    let env = common::setup().await;
    env.channel.publish(TOPIC, "k", b"x").await.unwrap();

    let sub = Subscription::new(TOPIC, GROUP);
    let message = env.channel.fetch(&sub).await.unwrap().unwrap();
    env.channel.release(&sub).await.unwrap();
    assert!(!env.channel.commit(&sub, &message).await.unwrap());
    assert_eq!(env.channel.backlog(TOPIC, GROUP).await.unwrap(), 1);
}
