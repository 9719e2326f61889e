//! Media enrichment: thumbnail URL and `ready` status.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::assets::{AssetStore, Rendition};
use crate::events::{MediaEvent, MediaEventType};
use crate::models::MediaStatus;
use crate::store::MediaStore;

use super::{EventHandler, Outcome};

pub struct MediaEnricher {
    media: Arc<dyn MediaStore>,
    assets: Arc<dyn AssetStore>,
}

impl MediaEnricher {
    pub fn new(media: Arc<dyn MediaStore>, assets: Arc<dyn AssetStore>) -> Self {
        Self { media, assets }
    }
}

#[async_trait]
impl EventHandler for MediaEnricher {
    type Event = MediaEvent;

    async fn handle(&self, event: &MediaEvent) -> Result<Outcome> {
        let Some(mut media) = self.media.find_media(event.media_id, event.owner_id).await? else {
            debug!(media_id = %event.media_id, "media not found, skipping");
            return Ok(Outcome::NotFound);
        };

        if event.event_type == MediaEventType::Deleted {
            return Ok(Outcome::Ignored);
        }
        if media.status.is_terminal() {
            debug!(media_id = %media.id, status = %media.status, "media already processed");
            return Ok(Outcome::AlreadyProcessed);
        }

        let public_id = media.asset_reference().map(str::to_string).or_else(|| {
            Some(event.original_public_id.clone()).filter(|s| !s.is_empty())
        });
        media.updated_at = Utc::now();

        let Some(public_id) = public_id else {
            warn!(media_id = %media.id, "media has no asset reference, marking as error");
            media.status = MediaStatus::Error;
            if !self.media.update_media(&media).await? {
                return Ok(Outcome::NotFound);
            }
            return Ok(Outcome::MarkedError);
        };

        media.thumbnail_url = Some(self.assets.derive_url(&public_id, Rendition::Thumbnail)?);
        if !event.original_url.is_empty() {
            media.url = event.original_url.clone();
        }
        media.status = MediaStatus::Ready;

        if !self.media.update_media(&media).await? {
            return Ok(Outcome::NotFound);
        }
        info!(media_id = %media.id, "media enriched");
        Ok(Outcome::Enriched)
    }
}
