//! Enrichment worker runtime.
//!
//! One consumption loop per topic, each on its own task:
//!
//! ```text
//! fetch ──▶ decode ──▶ handle ──▶ commit
//!   │          │          │
//!   │ none     │ bad      │ error
//!   ▼          ▼          ▼
//! idle wait  commit     no commit, pause, refetch (redelivery)
//! ```
//!
//! Within a loop messages are handled one at a time, so events for one
//! resource key are applied in publish order. While a handler runs, the
//! loop renews the lease on the message's partition every
//! `heartbeat_interval`, so a slow embedding never hands the partition to
//! another worker. The two loops run concurrently. Shutdown is a `watch`
//! broadcast: each loop finishes the message in hand, releases its
//! partition leases, and returns; the worker waits for every loop before
//! returning, and a loop that panics stops the others the same way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use personal_os_core::channel::{EventChannel, Message, Subscription};
use personal_os_core::enrich::{EventHandler, MediaEnricher, PostEnricher};
use personal_os_core::events::{LifecycleEvent, MediaEvent, PostEvent};

use crate::app::App;
use crate::assets::create_asset_store;
use crate::config::Config;
use crate::embedding::create_embedder;

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// Wait after an empty fetch.
    pub poll_interval: Duration,
    /// Wait after a failed handler or fetch before trying again.
    pub failure_pause: Duration,
    /// Lease renewal period while a handler runs.
    pub heartbeat_interval: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.channel.poll_interval(),
            failure_pause: config.channel.failure_pause(),
            heartbeat_interval: config.channel.lease_ttl() / 3,
        }
    }
}

/// Per-loop counters, returned when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Handled successfully and committed.
    pub handled: u64,
    /// Undecodable payloads, committed without handling.
    pub malformed: u64,
    /// Handler errors; left uncommitted for redelivery.
    pub failed: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub posts: ConsumerStats,
    pub media: ConsumerStats,
}

/// Sleep for `duration` unless shutdown is signalled first. Returns true
/// on shutdown.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn commit_logged(channel: &dyn EventChannel, sub: &Subscription, message: &Message) {
    match channel.commit(sub, message).await {
        Ok(true) => {}
        Ok(false) => warn!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "partition lease lost; commit left to the new owner"
        ),
        // The message will be redelivered; handlers tolerate that.
        Err(e) => error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            error = %e,
            "commit failed"
        ),
    }
}

/// Drive `work` to completion, renewing the lease on `partition` every
/// `every` in the meantime.
async fn with_heartbeat<F: Future>(
    channel: &dyn EventChannel,
    sub: &Subscription,
    partition: u32,
    every: Duration,
    work: F,
) -> F::Output {
    tokio::pin!(work);
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = ticker.tick() => match channel.renew(sub, partition).await {
                Ok(true) => debug!(topic = %sub.topic, partition, "lease renewed"),
                Ok(false) => warn!(topic = %sub.topic, partition, "partition lease lost while handling"),
                Err(e) => warn!(topic = %sub.topic, partition, error = %e, "lease renewal failed"),
            },
        }
    }
}

/// Consume `H::Event::TOPIC` as a member of `H::Event::GROUP` until
/// shutdown.
pub async fn run_consumer<H>(
    channel: Arc<dyn EventChannel>,
    handler: Arc<H>,
    settings: ConsumerSettings,
    mut shutdown: watch::Receiver<bool>,
) -> ConsumerStats
where
    H: EventHandler + 'static,
{
    let topic = <H::Event as LifecycleEvent>::TOPIC;
    let group = <H::Event as LifecycleEvent>::GROUP;
    let sub = Subscription::new(topic, group);
    let mut stats = ConsumerStats::default();
    info!(topic, group, consumer = %sub.consumer_id, "consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let message = match channel.fetch(&sub).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                if wait_or_shutdown(&mut shutdown, settings.poll_interval).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                error!(topic, error = %e, "fetch failed");
                if wait_or_shutdown(&mut shutdown, settings.failure_pause).await {
                    break;
                }
                continue;
            }
        };

        let event = match H::Event::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.key,
                    error = %e,
                    "malformed event payload, skipping"
                );
                stats.malformed += 1;
                commit_logged(channel.as_ref(), &sub, &message).await;
                continue;
            }
        };

        let handled = with_heartbeat(
            channel.as_ref(),
            &sub,
            message.partition,
            settings.heartbeat_interval,
            handler.handle(&event),
        )
        .await;

        match handled {
            Ok(outcome) => {
                debug!(
                    topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.key,
                    event_type = event.name(),
                    outcome = %outcome,
                    "event handled"
                );
                stats.handled += 1;
                commit_logged(channel.as_ref(), &sub, &message).await;
            }
            Err(e) => {
                error!(
                    topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.key,
                    event_type = event.name(),
                    error = %e,
                    "handler failed; message will be redelivered"
                );
                stats.failed += 1;
                if wait_or_shutdown(&mut shutdown, settings.failure_pause).await {
                    break;
                }
            }
        }
    }

    if let Err(e) = channel.release(&sub).await {
        warn!(topic, error = %e, "failed to release partition leases");
    }
    info!(
        topic,
        handled = stats.handled,
        malformed = stats.malformed,
        failed = stats.failed,
        "consumer stopped"
    );
    stats
}

/// The post and media consumption loops over one channel.
pub struct Worker {
    channel: Arc<dyn EventChannel>,
    posts: Arc<PostEnricher>,
    media: Arc<MediaEnricher>,
    settings: ConsumerSettings,
}

enum LoopResult {
    Posts(ConsumerStats),
    Media(ConsumerStats),
}

impl Worker {
    pub fn new(
        channel: Arc<dyn EventChannel>,
        posts: PostEnricher,
        media: MediaEnricher,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            channel,
            posts: Arc::new(posts),
            media: Arc::new(media),
            settings,
        }
    }

    /// Run both loops until `shutdown` flips to true, then wait for both.
    ///
    /// If a loop panics the remaining loops are stopped and drained, and
    /// the panic is reported once all of them have returned.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<WorkerStats> {
        let (stop_tx, stop_rx) = watch::channel(*shutdown.borrow());
        let mut loops = JoinSet::new();

        let (channel, handler, settings, rx) = (
            self.channel.clone(),
            self.posts.clone(),
            self.settings,
            stop_rx.clone(),
        );
        loops.spawn(async move {
            LoopResult::Posts(run_consumer(channel, handler, settings, rx).await)
        });

        let (channel, handler, settings, rx) =
            (self.channel.clone(), self.media.clone(), self.settings, stop_rx);
        loops.spawn(async move {
            LoopResult::Media(run_consumer(channel, handler, settings, rx).await)
        });

        let mut stats = WorkerStats::default();
        let mut failures = Vec::new();
        let mut watching = true;
        while !loops.is_empty() {
            tokio::select! {
                changed = shutdown.changed(), if watching => {
                    if changed.is_err() || *shutdown.borrow() {
                        watching = false;
                        let _ = stop_tx.send(true);
                    }
                }
                Some(joined) = loops.join_next() => match joined {
                    Ok(LoopResult::Posts(s)) => stats.posts = s,
                    Ok(LoopResult::Media(s)) => stats.media = s,
                    Err(e) => {
                        error!(error = %e, "consumer loop failed, stopping the others");
                        failures.push(e.to_string());
                        let _ = stop_tx.send(true);
                    }
                },
            }
        }

        if !failures.is_empty() {
            bail!("{} consumer loop(s) failed: {}", failures.len(), failures.join("; "));
        }
        Ok(stats)
    }
}

/// Resolve on SIGTERM or SIGINT.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C, shutting down");
    }

    Ok(())
}

/// `pos worker`: build the worker from config and run it until a signal.
pub async fn run_worker(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("The worker needs an embedding provider. Set [embedding] provider in the config.");
    }

    let app = App::connect(config).await?;
    let assets = create_asset_store(&config.assets)?;
    let embedder = create_embedder(&config.embedding)?;

    for (topic, group) in [
        (PostEvent::TOPIC, PostEvent::GROUP),
        (MediaEvent::TOPIC, MediaEvent::GROUP),
    ] {
        let backlog = app.channel.backlog(topic, group).await?;
        info!(topic, group, backlog, "uncommitted messages at startup");
    }

    let worker = Worker::new(
        app.channel.clone(),
        PostEnricher::new(app.store.clone(), assets.clone(), embedder),
        MediaEnricher::new(app.store.clone(), assets),
        ConsumerSettings::from_config(config),
    );

    let (tx, rx) = watch::channel(false);
    let signals = tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "failed to listen for shutdown signals");
        }
        let _ = tx.send(true);
    });

    let stats = worker.run(rx).await?;
    signals.abort();
    println!(
        "Worker stopped: {} post events, {} media events handled ({} malformed, {} failed)",
        stats.posts.handled,
        stats.media.handled,
        stats.posts.malformed + stats.media.malformed,
        stats.posts.failed + stats.media.failed
    );
    Ok(())
}
