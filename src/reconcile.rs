//! Reconciliation sweep for records stranded in `pending`.
//!
//! Persisting a record and publishing its event are independent steps, so
//! a crash or channel outage between them leaves the record `pending` with
//! no event to drive it. The sweep re-publishes the creation event for
//! every record still `pending` after a grace period. Handlers ignore
//! events for records that are already terminal, so a duplicate is
//! harmless.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use personal_os_core::events::{MediaEvent, MediaEventType, PostEvent, PostEventType};
use personal_os_core::models::META_ORIGINAL_URL;
use personal_os_core::store::{MediaStore, PostStore};

use crate::app::App;
use crate::config::Config;
use crate::producer::Producer;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub posts: usize,
    pub media: usize,
}

/// Re-publish creation events for records pending since before
/// `older_than`. With `dry_run`, only count them.
pub async fn reconcile_pending(
    posts: &dyn PostStore,
    media: &dyn MediaStore,
    producer: &Producer,
    older_than: DateTime<Utc>,
    limit: i64,
    dry_run: bool,
) -> Result<ReconcileReport> {
    let stale_posts = posts.list_stale_pending_posts(older_than, limit).await?;
    let stale_media = media.list_stale_pending_media(older_than, limit).await?;
    let report = ReconcileReport {
        posts: stale_posts.len(),
        media: stale_media.len(),
    };
    if dry_run {
        return Ok(report);
    }

    for post in &stale_posts {
        let event = PostEvent::new(PostEventType::Created, post.id, post.owner_id);
        producer.publish(&event).await?;
        info!(post_id = %post.id, "re-published post.created");
    }

    for item in &stale_media {
        let original_url = item
            .metadata
            .get(META_ORIGINAL_URL)
            .and_then(|v| v.as_str())
            .unwrap_or(item.url.as_str())
            .to_string();
        let event = MediaEvent {
            event_type: MediaEventType::Uploaded,
            media_id: item.id,
            owner_id: item.owner_id,
            provider: item.provider.clone(),
            original_url,
            original_public_id: item.asset_reference().unwrap_or_default().to_string(),
        };
        producer.publish(&event).await?;
        info!(media_id = %item.id, "re-published media.uploaded");
    }

    Ok(report)
}

/// `pos reconcile`.
pub async fn run_reconcile(config: &Config, dry_run: bool) -> Result<()> {
    let app = App::connect(config).await?;
    let older_than = Utc::now() - Duration::seconds(config.reconcile.pending_after_secs as i64);
    let report = reconcile_pending(
        app.store.as_ref(),
        app.store.as_ref(),
        &app.producer,
        older_than,
        config.reconcile.batch_limit,
        dry_run,
    )
    .await?;

    let verb = if dry_run { "Would re-publish" } else { "Re-published" };
    println!(
        "{} events for {} pending posts and {} pending media items.",
        verb, report.posts, report.media
    );
    Ok(())
}
