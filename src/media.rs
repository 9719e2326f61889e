//! Media library write path: upload and delete.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use personal_os_core::assets::{media_folder, AssetStore};
use personal_os_core::events::{MediaEvent, MediaEventType};
use personal_os_core::models::{
    Media, MediaStatus, Metadata, META_ORIGINAL_PUBLIC_ID, META_ORIGINAL_URL,
};
use personal_os_core::store::MediaStore;

use crate::producer::Producer;

pub struct NewMedia {
    pub owner_id: Uuid,
    pub is_public: bool,
    pub metadata: Metadata,
    pub data: Vec<u8>,
}

pub struct MediaService {
    media: Arc<dyn MediaStore>,
    assets: Arc<dyn AssetStore>,
    producer: Producer,
}

impl MediaService {
    pub fn new(media: Arc<dyn MediaStore>, assets: Arc<dyn AssetStore>, producer: Producer) -> Self {
        Self {
            media,
            assets,
            producer,
        }
    }

    /// Upload the original, persist the item as `pending`, then publish
    /// `media.uploaded` carrying the asset reference.
    pub async fn upload(&self, input: NewMedia) -> Result<Media> {
        let id = Uuid::new_v4();
        let uploaded = self
            .assets
            .upload(&input.data, &media_folder(input.owner_id), &id.to_string())
            .await
            .context("Upload of media original failed")?;

        let mut metadata = input.metadata;
        metadata.insert(META_ORIGINAL_URL.to_string(), Value::String(uploaded.url.clone()));
        metadata.insert(
            META_ORIGINAL_PUBLIC_ID.to_string(),
            Value::String(uploaded.public_id.clone()),
        );

        let now = Utc::now();
        let media = Media {
            id,
            owner_id: input.owner_id,
            provider: self.assets.provider().to_string(),
            url: uploaded.url.clone(),
            thumbnail_url: None,
            status: MediaStatus::Pending,
            metadata,
            is_public: input.is_public,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.media.save_media(&media).await {
            self.producer
                .delete_asset_in_background(self.assets.clone(), uploaded.public_id);
            return Err(e.context("Saving media failed"));
        }
        info!(media_id = %media.id, "media uploaded as pending");

        self.producer.publish_in_background(vec![MediaEvent {
            event_type: MediaEventType::Uploaded,
            media_id: media.id,
            owner_id: media.owner_id,
            provider: media.provider.clone(),
            original_url: uploaded.url,
            original_public_id: uploaded.public_id,
        }]);

        Ok(media)
    }

    /// Remove the item, publish `media.deleted`, and delete the asset in
    /// the background.
    pub async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let Some(media) = self.media.find_media(id, owner_id).await? else {
            return Ok(false);
        };
        if !self.media.delete_media(id, owner_id).await? {
            return Ok(false);
        }
        info!(media_id = %id, "media deleted");

        let public_id = media.asset_reference().map(str::to_string);
        self.producer.publish_in_background(vec![MediaEvent {
            event_type: MediaEventType::Deleted,
            media_id: id,
            owner_id,
            provider: media.provider.clone(),
            original_url: media.url.clone(),
            original_public_id: public_id.clone().unwrap_or_default(),
        }]);
        if let Some(public_id) = public_id {
            self.producer
                .delete_asset_in_background(self.assets.clone(), public_id);
        }
        Ok(true)
    }
}
