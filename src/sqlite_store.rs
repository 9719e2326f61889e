//! SQLite-backed [`PostStore`] / [`MediaStore`] implementation.
//!
//! IDs are stored as hyphenated UUID text, timestamps as Unix
//! milliseconds, metadata and version history as JSON text, and the post
//! embedding as a little-endian f32 BLOB. Nearest-post lookup loads the
//! owner's embedded posts and ranks them in process.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use personal_os_core::embedding::{blob_to_vec, vec_to_blob};
use personal_os_core::models::{Media, MediaStatus, Metadata, Post, PostStatus, PostVersion};
use personal_os_core::store::{
    rank_by_similarity, EnrichmentWrite, MediaStore, PostEnrichment, PostStore,
};

const POST_COLUMNS: &str = "id, owner_id, slug, title, content, status, og_image_url, \
    thumbnail_url, metadata_json, embedding, content_hash, enriched_hash, \
    version_history_json, published_at, created_at, updated_at";

const MEDIA_COLUMNS: &str =
    "id, owner_id, provider, url, thumbnail_url, status, metadata_json, is_public, created_at, updated_at";

/// SQLite content repository.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("Invalid timestamp: {}", ms))
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw).with_context(|| format!("Invalid UUID in {}: {}", column, raw))
}

fn row_to_post(row: &SqliteRow) -> Result<Post> {
    let status: String = row.get("status");
    let metadata_json: String = row.get("metadata_json");
    let history_json: String = row.get("version_history_json");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let published_at: Option<i64> = row.get("published_at");

    Ok(Post {
        id: parse_uuid(row, "id")?,
        owner_id: parse_uuid(row, "owner_id")?,
        slug: row.get("slug"),
        title: row.get("title"),
        content: row.get("content"),
        status: PostStatus::parse(&status)
            .ok_or_else(|| anyhow!("Invalid post status: {}", status))?,
        og_image_url: row.get("og_image_url"),
        thumbnail_url: row.get("thumbnail_url"),
        metadata: serde_json::from_str::<Metadata>(&metadata_json)
            .context("Invalid post metadata")?,
        embedding: embedding.map(|blob| blob_to_vec(&blob)),
        content_hash: row.get("content_hash"),
        enriched_hash: row.get("enriched_hash"),
        version_history: serde_json::from_str::<Vec<PostVersion>>(&history_json)
            .context("Invalid post version history")?,
        published_at: published_at.map(from_millis).transpose()?,
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

fn row_to_media(row: &SqliteRow) -> Result<Media> {
    let status: String = row.get("status");
    let metadata_json: String = row.get("metadata_json");
    let is_public: i64 = row.get("is_public");

    Ok(Media {
        id: parse_uuid(row, "id")?,
        owner_id: parse_uuid(row, "owner_id")?,
        provider: row.get("provider"),
        url: row.get("url"),
        thumbnail_url: row.get("thumbnail_url"),
        status: MediaStatus::parse(&status)
            .ok_or_else(|| anyhow!("Invalid media status: {}", status))?,
        metadata: serde_json::from_str::<Metadata>(&metadata_json)
            .context("Invalid media metadata")?,
        is_public: is_public != 0,
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn save_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, owner_id, slug, title, content, status, og_image_url,
                               thumbnail_url, metadata_json, embedding, content_hash,
                               enriched_hash, version_history_json, published_at,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.id.to_string())
        .bind(post.owner_id.to_string())
        .bind(&post.slug)
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.status.as_str())
        .bind(&post.og_image_url)
        .bind(&post.thumbnail_url)
        .bind(serde_json::to_string(&post.metadata)?)
        .bind(post.embedding.as_deref().map(vec_to_blob))
        .bind(&post.content_hash)
        .bind(&post.enriched_hash)
        .bind(serde_json::to_string(&post.version_history)?)
        .bind(post.published_at.map(to_millis))
        .bind(to_millis(post.created_at))
        .bind(to_millis(post.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_post(&self, post: &Post) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET
                slug = ?, title = ?, content = ?, status = ?, og_image_url = ?,
                thumbnail_url = ?, metadata_json = ?, embedding = ?, content_hash = ?,
                enriched_hash = ?, version_history_json = ?, published_at = ?,
                updated_at = ?
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(&post.slug)
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.status.as_str())
        .bind(&post.og_image_url)
        .bind(&post.thumbnail_url)
        .bind(serde_json::to_string(&post.metadata)?)
        .bind(post.embedding.as_deref().map(vec_to_blob))
        .bind(&post.content_hash)
        .bind(&post.enriched_hash)
        .bind(serde_json::to_string(&post.version_history)?)
        .bind(post.published_at.map(to_millis))
        .bind(to_millis(post.updated_at))
        .bind(post.id.to_string())
        .bind(post.owner_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_enrichment(
        &self,
        id: Uuid,
        owner_id: Uuid,
        read_hash: &str,
        enrichment: &PostEnrichment,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentWrite> {
        // Status comes from the metadata as stored now, not as read.
        let row = sqlx::query(
            r#"
            UPDATE posts SET
                og_image_url = COALESCE(?, og_image_url),
                thumbnail_url = COALESCE(?, thumbnail_url),
                embedding = COALESCE(?, embedding),
                enriched_hash = CASE WHEN ? THEN content_hash ELSE enriched_hash END,
                status = CASE json_extract(metadata_json, '$.requested_status')
                    WHEN 'public' THEN 'public'
                    WHEN 'private' THEN 'private'
                    ELSE 'draft' END,
                published_at = CASE
                    WHEN published_at IS NULL
                         AND json_extract(metadata_json, '$.requested_status') = 'public'
                    THEN ? ELSE published_at END,
                updated_at = ?
            WHERE id = ? AND owner_id = ? AND content_hash = ? AND status != 'error'
            RETURNING status
            "#,
        )
        .bind(&enrichment.og_image_url)
        .bind(&enrichment.thumbnail_url)
        .bind(enrichment.embedding.as_deref().map(vec_to_blob))
        .bind(enrichment.embedding.is_some())
        .bind(to_millis(now))
        .bind(to_millis(now))
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .bind(read_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let status: String = row.get("status");
            let status = PostStatus::parse(&status)
                .ok_or_else(|| anyhow!("Invalid post status: {}", status))?;
            return Ok(EnrichmentWrite::Applied(status));
        }

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM posts WHERE id = ? AND owner_id = ?")
                .bind(id.to_string())
                .bind(owner_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(match exists {
            Some(_) => EnrichmentWrite::Stale,
            None => EnrichmentWrite::Missing,
        })
    }

    async fn mark_post_error(&self, id: Uuid, owner_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE posts SET status = 'error', updated_at = ? \
             WHERE id = ? AND owner_id = ? AND status = 'pending'",
        )
        .bind(to_millis(now))
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_post(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ? AND owner_id = ?")
            .bind(id.to_string())
            .bind(owner_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_post(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Post>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE id = ? AND owner_id = ?",
            POST_COLUMNS
        ))
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_post).transpose()
    }

    async fn list_posts_by_status(
        &self,
        owner_id: Uuid,
        status: PostStatus,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE owner_id = ? AND status = ? ORDER BY created_at DESC LIMIT ?",
            POST_COLUMNS
        ))
        .bind(owner_id.to_string())
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_post).collect()
    }

    async fn list_stale_pending_posts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE status = 'pending' AND updated_at < ? \
             ORDER BY updated_at ASC LIMIT ?",
            POST_COLUMNS
        ))
        .bind(to_millis(older_than))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_post).collect()
    }

    async fn nearest_posts(
        &self,
        owner_id: Uuid,
        query: &[f32],
        limit: i64,
    ) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE owner_id = ? AND embedding IS NOT NULL",
            POST_COLUMNS
        ))
        .bind(owner_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows.iter().map(row_to_post).collect::<Result<Vec<_>>>()?;
        Ok(rank_by_similarity(candidates, query, limit))
    }
}

#[async_trait]
impl MediaStore for SqliteStore {
    async fn save_media(&self, media: &Media) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO media (id, owner_id, provider, url, thumbnail_url, status,
                               metadata_json, is_public, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(media.id.to_string())
        .bind(media.owner_id.to_string())
        .bind(&media.provider)
        .bind(&media.url)
        .bind(&media.thumbnail_url)
        .bind(media.status.as_str())
        .bind(serde_json::to_string(&media.metadata)?)
        .bind(media.is_public as i64)
        .bind(to_millis(media.created_at))
        .bind(to_millis(media.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_media(&self, media: &Media) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE media SET
                provider = ?, url = ?, thumbnail_url = ?, status = ?, metadata_json = ?,
                is_public = ?, updated_at = ?
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(&media.provider)
        .bind(&media.url)
        .bind(&media.thumbnail_url)
        .bind(media.status.as_str())
        .bind(serde_json::to_string(&media.metadata)?)
        .bind(media.is_public as i64)
        .bind(to_millis(media.updated_at))
        .bind(media.id.to_string())
        .bind(media.owner_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_media(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media WHERE id = ? AND owner_id = ?")
            .bind(id.to_string())
            .bind(owner_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_media(&self, id: Uuid, owner_id: Uuid) -> Result<Option<Media>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM media WHERE id = ? AND owner_id = ?",
            MEDIA_COLUMNS
        ))
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_media).transpose()
    }

    async fn list_media_by_status(
        &self,
        owner_id: Uuid,
        status: MediaStatus,
        limit: i64,
    ) -> Result<Vec<Media>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM media WHERE owner_id = ? AND status = ? ORDER BY created_at DESC LIMIT ?",
            MEDIA_COLUMNS
        ))
        .bind(owner_id.to_string())
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_media).collect()
    }

    async fn list_stale_pending_media(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Media>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM media WHERE status = 'pending' AND updated_at < ? \
             ORDER BY updated_at ASC LIMIT ?",
            MEDIA_COLUMNS
        ))
        .bind(to_millis(older_than))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_media).collect()
    }
}
