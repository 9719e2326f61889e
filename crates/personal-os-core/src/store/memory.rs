//! In-memory [`PostStore`] / [`MediaStore`] implementation for tests.
//!
//! Uses `HashMap` behind `std::sync::RwLock`. Nearest-post lookup is
//! brute-force cosine similarity over every stored embedding.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Media, MediaStatus, Post, PostStatus};

use super::{rank_by_similarity, EnrichmentWrite, MediaStore, PostEnrichment, PostStore};

/// In-memory content repository.
pub struct InMemoryStore {
    posts: RwLock<HashMap<Uuid, Post>>,
    media: RwLock<HashMap<Uuid, Media>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            posts: RwLock::new(HashMap::new()),
            media: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("store lock poisoned"))
}

#[async_trait]
impl PostStore for InMemoryStore {
    async fn save_post(&self, post: &Post) -> Result<()> {
        write(&self.posts)?.insert(post.id, post.clone());
        Ok(())
    }

    async fn update_post(&self, post: &Post) -> Result<bool> {
        let mut posts = write(&self.posts)?;
        match posts.get_mut(&post.id) {
            Some(existing) if existing.owner_id == post.owner_id => {
                *existing = post.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_enrichment(
        &self,
        id: Uuid,
        owner_id: Uuid,
        read_hash: &str,
        enrichment: &PostEnrichment,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentWrite> {
        let mut posts = write(&self.posts)?;
        let Some(post) = posts.get_mut(&id).filter(|p| p.owner_id == owner_id) else {
            return Ok(EnrichmentWrite::Missing);
        };
        if post.content_hash != read_hash || post.status == PostStatus::Error {
            return Ok(EnrichmentWrite::Stale);
        }

        if let Some(url) = &enrichment.og_image_url {
            post.og_image_url = Some(url.clone());
        }
        if let Some(url) = &enrichment.thumbnail_url {
            post.thumbnail_url = Some(url.clone());
        }
        if let Some(vector) = &enrichment.embedding {
            post.embedding = Some(vector.clone());
            post.enriched_hash = Some(post.content_hash.clone());
        }
        post.status = post.requested_status();
        if post.status == PostStatus::Public && post.published_at.is_none() {
            post.published_at = Some(now);
        }
        post.updated_at = now;
        Ok(EnrichmentWrite::Applied(post.status))
    }

    async fn mark_post_error(&self, id: Uuid, owner_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut posts = write(&self.posts)?;
        match posts.get_mut(&id) {
            Some(post) if post.owner_id == owner_id && post.status == PostStatus::Pending => {
                post.status = PostStatus::Error;
                post.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_post(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut posts = write(&self.posts)?;
        if posts.get(&id).map(|p| p.owner_id) == Some(owner_id) {
            posts.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn find_post(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Post>> {
        Ok(read(&self.posts)?
            .get(&id)
            .filter(|p| p.owner_id == owner_id)
            .cloned())
    }

    async fn list_posts_by_status(
        &self,
        owner_id: Uuid,
        status: PostStatus,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = read(&self.posts)?
            .values()
            .filter(|p| p.owner_id == owner_id && p.status == status)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts.truncate(limit.max(0) as usize);
        Ok(posts)
    }

    async fn list_stale_pending_posts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = read(&self.posts)?
            .values()
            .filter(|p| p.status == PostStatus::Pending && p.updated_at < older_than)
            .cloned()
            .collect();
        posts.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        posts.truncate(limit.max(0) as usize);
        Ok(posts)
    }

    async fn nearest_posts(
        &self,
        owner_id: Uuid,
        query: &[f32],
        limit: i64,
    ) -> Result<Vec<Post>> {
        let candidates: Vec<Post> = read(&self.posts)?
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(rank_by_similarity(candidates, query, limit))
    }
}

#[async_trait]
impl MediaStore for InMemoryStore {
    async fn save_media(&self, media: &Media) -> Result<()> {
        write(&self.media)?.insert(media.id, media.clone());
        Ok(())
    }

    async fn update_media(&self, media: &Media) -> Result<bool> {
        let mut items = write(&self.media)?;
        match items.get_mut(&media.id) {
            Some(existing) if existing.owner_id == media.owner_id => {
                *existing = media.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_media(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut items = write(&self.media)?;
        if items.get(&id).map(|m| m.owner_id) == Some(owner_id) {
            items.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn find_media(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Media>> {
        Ok(read(&self.media)?
            .get(&id)
            .filter(|m| m.owner_id == owner_id)
            .cloned())
    }

    async fn list_media_by_status(
        &self,
        owner_id: Uuid,
        status: MediaStatus,
        limit: i64,
    ) -> Result<Vec<Media>> {
        let mut items: Vec<Media> = read(&self.media)?
            .values()
            .filter(|m| m.owner_id == owner_id && m.status == status)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn list_stale_pending_media(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Media>> {
        let mut items: Vec<Media> = read(&self.media)?
            .values()
            .filter(|m| m.status == MediaStatus::Pending && m.updated_at < older_than)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }
}
