//! Post write path: create, update, delete.
//!
//! Every operation persists first and publishes afterwards on a
//! background task through the [`Producer`]. A failed publish never rolls
//! back the write.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use personal_os_core::assets::{post_folder, AssetStore};
use personal_os_core::events::{PostEvent, PostEventType};
use personal_os_core::models::{
    slugify, validate_slug, Metadata, Post, PostStatus, META_ORIGINAL_PUBLIC_ID,
    META_ORIGINAL_URL,
};
use personal_os_core::store::PostStore;

use crate::producer::Producer;

pub struct NewPost {
    pub owner_id: Uuid,
    pub title: String,
    pub content: String,
    /// Derived from the title when absent.
    pub slug: Option<String>,
    pub requested_status: PostStatus,
    pub metadata: Metadata,
    /// Original image bytes.
    pub image: Vec<u8>,
}

#[derive(Default)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub requested_status: Option<PostStatus>,
}

pub struct PostService {
    posts: Arc<dyn PostStore>,
    assets: Arc<dyn AssetStore>,
    producer: Producer,
}

impl PostService {
    pub fn new(posts: Arc<dyn PostStore>, assets: Arc<dyn AssetStore>, producer: Producer) -> Self {
        Self {
            posts,
            assets,
            producer,
        }
    }

    /// Upload the original, persist the post as `pending`, then publish
    /// `post.created` (and `post.published` for public posts).
    pub async fn create(&self, input: NewPost) -> Result<Post> {
        if input.title.trim().is_empty() {
            bail!("Post title must not be empty");
        }
        if !input.requested_status.is_terminal() || input.requested_status == PostStatus::Error {
            bail!("Invalid requested status: {}", input.requested_status);
        }
        let slug = match input.slug {
            Some(slug) if !slug.is_empty() => slug,
            _ => slugify(&input.title),
        };
        validate_slug(&slug)?;

        let mut post = Post::new_pending(
            input.owner_id,
            slug,
            input.title,
            input.content,
            input.metadata,
            Utc::now(),
        );
        post.set_requested_status(input.requested_status);

        let uploaded = self
            .assets
            .upload(&input.image, &post_folder(post.owner_id), &post.id.to_string())
            .await
            .context("Upload of original image failed")?;
        post.metadata
            .insert(META_ORIGINAL_URL.to_string(), Value::String(uploaded.url.clone()));
        post.metadata.insert(
            META_ORIGINAL_PUBLIC_ID.to_string(),
            Value::String(uploaded.public_id.clone()),
        );

        if let Err(e) = self.posts.save_post(&post).await {
            self.producer
                .delete_asset_in_background(self.assets.clone(), uploaded.public_id);
            return Err(e.context("Saving post failed"));
        }
        info!(post_id = %post.id, slug = %post.slug, "post created as pending");

        let mut events = vec![PostEvent::new(PostEventType::Created, post.id, post.owner_id)];
        if input.requested_status == PostStatus::Public {
            events.push(PostEvent::new(PostEventType::Published, post.id, post.owner_id));
        }
        self.producer.publish_in_background(events);

        Ok(post)
    }

    /// Apply `changes` and publish `post.updated` (plus `post.published`
    /// when the post becomes public).
    pub async fn update(&self, id: Uuid, owner_id: Uuid, changes: PostChanges) -> Result<Post> {
        let mut post = self
            .posts
            .find_post(id, owner_id)
            .await?
            .ok_or_else(|| anyhow!("Post not found: {}", id))?;
        let was_public = post.status == PostStatus::Public;

        if let Some(slug) = changes.slug {
            validate_slug(&slug)?;
            post.slug = slug;
        }
        let title = changes.title.unwrap_or_else(|| post.title.clone());
        let content = changes.content.unwrap_or_else(|| post.content.clone());
        if title.trim().is_empty() {
            bail!("Post title must not be empty");
        }
        let content_changed = post.revise(title, content, Utc::now());

        let requested = changes.requested_status.unwrap_or_else(|| post.requested_status());
        if !requested.is_terminal() || requested == PostStatus::Error {
            bail!("Invalid requested status: {}", requested);
        }
        post.set_requested_status(requested);

        // Only the worker leaves `pending`; enriched posts switch right away.
        if post.status.is_terminal() && post.status != PostStatus::Error {
            post.status = requested;
            if requested == PostStatus::Public && post.published_at.is_none() {
                post.published_at = Some(post.updated_at);
            }
        }

        if !self.posts.update_post(&post).await? {
            bail!("Post not found: {}", id);
        }
        info!(post_id = %post.id, content_changed, status = %post.status, "post updated");

        let mut events = vec![PostEvent::new(PostEventType::Updated, post.id, post.owner_id)];
        if requested == PostStatus::Public && !was_public {
            events.push(PostEvent::new(PostEventType::Published, post.id, post.owner_id));
        }
        self.producer.publish_in_background(events);

        Ok(post)
    }

    /// Remove the post, publish `post.deleted`, and delete its original
    /// asset in the background. Returns `false` if there was nothing to
    /// delete.
    pub async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let Some(post) = self.posts.find_post(id, owner_id).await? else {
            return Ok(false);
        };
        if !self.posts.delete_post(id, owner_id).await? {
            return Ok(false);
        }
        info!(post_id = %id, "post deleted");

        self.producer
            .publish_in_background(vec![PostEvent::new(PostEventType::Deleted, id, owner_id)]);
        if let Some(public_id) = post.asset_reference() {
            self.producer
                .delete_asset_in_background(self.assets.clone(), public_id.to_string());
        }
        Ok(true)
    }
}
