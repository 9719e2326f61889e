//! Content repository abstraction.
//!
//! [`PostStore`] and [`MediaStore`] are the only data-access capabilities
//! the pipeline consumes. "Not found" is `Ok(None)` (reads) or `Ok(false)`
//! (writes), never an error, so handlers can treat a deleted record as a
//! successful no-op.
//!
//! The write path overwrites whole posts with [`PostStore::update_post`].
//! The worker never does: it writes only derived columns through
//! [`PostStore::apply_enrichment`], guarded on the content hash it read,
//! so an edit made while an embedding is in flight is never lost.
//!
//! # Implementations
//!
//! - [`memory::InMemoryStore`]: `HashMap`-backed, for tests.
//! - `SqliteStore` in the app crate: the production backend.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{Media, MediaStatus, Post, PostStatus};

/// Derived post fields written back by the worker. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct PostEnrichment {
    pub og_image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Embedding of the content whose hash was read; also records that
    /// hash as enriched.
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentWrite {
    /// Written; carries the resulting status.
    Applied(PostStatus),
    /// The content changed (or the post became `error`) since it was read.
    Stale,
    /// The post no longer exists.
    Missing,
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn save_post(&self, post: &Post) -> Result<()>;

    /// Overwrite a post by ID and owner. Returns `false` when it no longer
    /// exists.
    async fn update_post(&self, post: &Post) -> Result<bool>;

    /// Write derived fields for a post whose content hash is still
    /// `read_hash` and whose status is not `error`.
    ///
    /// The status is resolved from the `requested_status` stored at write
    /// time, and `published_at` is set on first reaching `public`.
    async fn apply_enrichment(
        &self,
        id: Uuid,
        owner_id: Uuid,
        read_hash: &str,
        enrichment: &PostEnrichment,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentWrite>;

    /// Move a `pending` post to `error`. Returns `false` when the post is
    /// gone or no longer pending.
    async fn mark_post_error(&self, id: Uuid, owner_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn delete_post(&self, id: Uuid, owner_id: Uuid) -> Result<bool>;

    async fn find_post(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Post>>;

    async fn list_posts_by_status(
        &self,
        owner_id: Uuid,
        status: PostStatus,
        limit: i64,
    ) -> Result<Vec<Post>>;

    /// Pending posts last touched before `older_than`, oldest first.
    async fn list_stale_pending_posts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Post>>;

    /// The owner's posts with an embedding, most similar to `query` first.
    async fn nearest_posts(&self, owner_id: Uuid, query: &[f32], limit: i64)
        -> Result<Vec<Post>>;
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save_media(&self, media: &Media) -> Result<()>;

    async fn update_media(&self, media: &Media) -> Result<bool>;

    async fn delete_media(&self, id: Uuid, owner_id: Uuid) -> Result<bool>;

    async fn find_media(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Media>>;

    async fn list_media_by_status(
        &self,
        owner_id: Uuid,
        status: MediaStatus,
        limit: i64,
    ) -> Result<Vec<Media>>;

    async fn list_stale_pending_media(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Media>>;
}

/// Rank posts by similarity to `query`; ties go to the most recently
/// updated post.
pub fn rank_by_similarity(posts: Vec<Post>, query: &[f32], limit: i64) -> Vec<Post> {
    let mut scored: Vec<(f32, Post)> = posts
        .into_iter()
        .filter_map(|p| {
            let score = cosine_similarity(p.embedding.as_deref()?, query);
            Some((score, p))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.updated_at.cmp(&a.1.updated_at))
    });
    scored
        .into_iter()
        .take(limit.max(0) as usize)
        .map(|(_, p)| p)
        .collect()
}
