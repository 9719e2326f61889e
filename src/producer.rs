//! Event publication from the write path.
//!
//! Publishing happens after the record is persisted, on a detached task,
//! so the caller never waits on the channel. Failures are logged and not
//! retried, and the rest of that batch is dropped; the record stays
//! `pending` until `pos reconcile` re-publishes it.
//!
//! Background tasks are tracked so a short-lived process (the CLI) can
//! [`flush`](Producer::flush) them before exiting.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use personal_os_core::assets::AssetStore;
use personal_os_core::channel::EventChannel;
use personal_os_core::events::LifecycleEvent;

#[derive(Clone)]
pub struct Producer {
    channel: Arc<dyn EventChannel>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Producer {
    pub fn new(channel: Arc<dyn EventChannel>) -> Self {
        Self {
            channel,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Encode and publish one event, keyed by its resource ID.
    pub async fn publish<E: LifecycleEvent>(&self, event: &E) -> Result<()> {
        let payload = event.encode()?;
        self.channel
            .publish(E::TOPIC, &event.key(), &payload)
            .await?;
        debug!(topic = E::TOPIC, key = %event.key(), event_type = event.name(), "event published");
        Ok(())
    }

    /// Publish `events` in order on a background task, stopping at the
    /// first failure so a later event never overtakes a lost one.
    pub fn publish_in_background<E: LifecycleEvent>(&self, events: Vec<E>) {
        let producer = self.clone();
        self.track(tokio::spawn(async move {
            for (i, event) in events.iter().enumerate() {
                if let Err(e) = producer.publish(event).await {
                    error!(
                        topic = E::TOPIC,
                        key = %event.key(),
                        event_type = event.name(),
                        skipped = events.len() - i - 1,
                        error = %e,
                        "failed to publish event; record stays pending"
                    );
                    return;
                }
            }
        }));
    }

    /// Delete an uploaded asset on a background task, logging failures.
    pub fn delete_asset_in_background(&self, assets: Arc<dyn AssetStore>, public_id: String) {
        self.track(tokio::spawn(async move {
            match assets.delete(&public_id).await {
                Ok(()) => debug!(public_id = %public_id, "asset deleted"),
                Err(e) => warn!(public_id = %public_id, error = %e, "failed to delete asset"),
            }
        }));
    }

    /// Wait for every background task started so far.
    pub async fn flush(&self) {
        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "background task panicked");
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }
    }
}
