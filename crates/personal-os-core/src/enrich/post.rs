//! Post enrichment: rendition URLs, embedding, terminal status.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::assets::{AssetStore, Rendition};
use crate::embedding::Embedder;
use crate::events::{PostEvent, PostEventType};
use crate::models::PostStatus;
use crate::store::{EnrichmentWrite, PostEnrichment, PostStore};

use super::{EventHandler, Outcome};

/// Re-reads allowed when the post keeps changing under the handler.
const MAX_ATTEMPTS: usize = 3;

pub struct PostEnricher {
    posts: Arc<dyn PostStore>,
    assets: Arc<dyn AssetStore>,
    embedder: Arc<dyn Embedder>,
}

/// Result of one read-enrich-write pass.
enum Pass {
    Done(Outcome),
    /// The post was edited after it was read.
    Changed,
}

impl PostEnricher {
    pub fn new(
        posts: Arc<dyn PostStore>,
        assets: Arc<dyn AssetStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            posts,
            assets,
            embedder,
        }
    }

    async fn enrich_once(&self, event: &PostEvent) -> Result<Pass> {
        let Some(post) = self.posts.find_post(event.post_id, event.owner_id).await? else {
            debug!(post_id = %event.post_id, event_type = event.event_type.as_str(), "post not found, skipping");
            return Ok(Pass::Done(Outcome::NotFound));
        };

        if event.event_type == PostEventType::Deleted {
            return Ok(Pass::Done(Outcome::Ignored));
        }

        // Terminal posts are only reopened for content that was never embedded.
        let stale_content = event.event_type.changes_content()
            && post.needs_enrichment()
            && matches!(
                post.status,
                PostStatus::Draft | PostStatus::Private | PostStatus::Public
            );
        if post.status.is_terminal() && !stale_content {
            debug!(post_id = %post.id, status = %post.status, "post already processed");
            return Ok(Pass::Done(Outcome::AlreadyProcessed));
        }

        let asset_ref = post
            .asset_reference()
            .map(str::to_string)
            .or_else(|| event.original_public_id.clone().filter(|s| !s.is_empty()));

        let mut enrichment = PostEnrichment::default();
        match asset_ref {
            Some(public_id) => {
                enrichment.og_image_url =
                    Some(self.assets.derive_url(&public_id, Rendition::SocialPreview)?);
                enrichment.thumbnail_url =
                    Some(self.assets.derive_url(&public_id, Rendition::Thumbnail)?);
            }
            None if post.status == PostStatus::Pending => {
                if !self.posts.mark_post_error(post.id, post.owner_id, Utc::now()).await? {
                    return Ok(Pass::Changed);
                }
                warn!(post_id = %post.id, "post has no asset reference, marked as error");
                return Ok(Pass::Done(Outcome::MarkedError));
            }
            None => {}
        }

        // A pending post never leaves `pending` without an embedding of its
        // current content, whichever event got here first.
        if post.needs_enrichment() {
            enrichment.embedding = Some(self.embedder.embed(&post.embedding_text()).await?);
        }

        let write = self
            .posts
            .apply_enrichment(post.id, post.owner_id, &post.content_hash, &enrichment, Utc::now())
            .await?;
        match write {
            EnrichmentWrite::Applied(status) => {
                info!(
                    post_id = %post.id,
                    event_type = event.event_type.as_str(),
                    status = %status,
                    embedded = enrichment.embedding.is_some(),
                    "post enriched"
                );
                Ok(Pass::Done(Outcome::Enriched))
            }
            EnrichmentWrite::Stale => Ok(Pass::Changed),
            EnrichmentWrite::Missing => {
                debug!(post_id = %post.id, "post deleted during enrichment");
                Ok(Pass::Done(Outcome::NotFound))
            }
        }
    }
}

#[async_trait]
impl EventHandler for PostEnricher {
    type Event = PostEvent;

    async fn handle(&self, event: &PostEvent) -> Result<Outcome> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.enrich_once(event).await? {
                Pass::Done(outcome) => return Ok(outcome),
                Pass::Changed => {
                    debug!(post_id = %event.post_id, attempt, "post changed during enrichment, re-reading")
                }
            }
        }
        bail!(
            "post {} changed during each of {} enrichment attempts",
            event.post_id,
            MAX_ATTEMPTS
        )
    }
}
