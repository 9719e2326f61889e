//! Content records that flow through the enrichment pipeline.
//!
//! A [`Post`] or [`Media`] item is written by the API process in the
//! `pending` state and promoted to a terminal state by the worker. The
//! free-form `metadata` map carries everything the worker needs that the
//! API process knew at write time: the original asset reference and, for
//! posts, the owner's requested terminal status.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Metadata key holding the owner's requested terminal status for a post.
pub const META_REQUESTED_STATUS: &str = "requested_status";
/// Metadata key holding the URL of the uploaded original asset.
pub const META_ORIGINAL_URL: &str = "original_url";
/// Metadata key holding the asset store reference of the original asset.
pub const META_ORIGINAL_PUBLIC_ID: &str = "original_public_id";

/// Number of previous content revisions kept on a post.
pub const MAX_VERSION_HISTORY: usize = 10;

/// Free-form JSON object stored alongside a record.
pub type Metadata = Map<String, Value>;

/// Lifecycle status of a [`Post`].
///
/// `Pending` is the only provisional state. `Draft`, `Private` and
/// `Public` are the terminal states an owner can request; `Error` is the
/// terminal state for posts that can never be enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Draft,
    Private,
    Public,
    Error,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Draft => "draft",
            Self::Private => "private",
            Self::Public => "public",
            Self::Error => "error",
        }
    }

    /// Parse any stored status value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "draft" => Some(Self::Draft),
            "private" => Some(Self::Private),
            "public" => Some(Self::Public),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Parse a status an owner may request (`draft`, `private`, `public`).
    pub fn parse_requested(s: &str) -> Option<Self> {
        match Self::parse(s) {
            Some(status @ (Self::Draft | Self::Private | Self::Public)) => Some(status),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Self::parse_requested(s) {
            Some(status) => Ok(status),
            None => bail!(
                "Invalid post status: '{}'. Must be draft, private, or public.",
                s
            ),
        }
    }
}

/// Lifecycle status of a [`Media`] item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Pending,
    Ready,
    Error,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A previous revision of a post's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostVersion {
    pub id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A blog post.
///
/// `content_hash` tracks the current title and body; `enriched_hash` is
/// the content hash the stored embedding was generated from. The two
/// differ after a content edit until the worker re-enriches the post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub status: PostStatus,
    pub og_image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub metadata: Metadata,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub content_hash: String,
    pub enriched_hash: Option<String>,
    pub version_history: Vec<PostVersion>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Build a new post in the provisional `pending` state.
    pub fn new_pending(
        owner_id: Uuid,
        slug: String,
        title: String,
        content: String,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        let content_hash = content_hash(&title, &content);
        Self {
            id: Uuid::new_v4(),
            owner_id,
            slug,
            title,
            content,
            status: PostStatus::Pending,
            og_image_url: None,
            thumbnail_url: None,
            metadata,
            embedding: None,
            content_hash,
            enriched_hash: None,
            version_history: Vec::new(),
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The terminal status the owner asked for, defaulting to `Draft`
    /// when absent or unrecognized.
    pub fn requested_status(&self) -> PostStatus {
        self.metadata
            .get(META_REQUESTED_STATUS)
            .and_then(Value::as_str)
            .and_then(PostStatus::parse_requested)
            .unwrap_or(PostStatus::Draft)
    }

    pub fn set_requested_status(&mut self, status: PostStatus) {
        self.metadata.insert(
            META_REQUESTED_STATUS.to_string(),
            Value::String(status.as_str().to_string()),
        );
    }

    /// Asset store reference of the uploaded original, if any.
    pub fn asset_reference(&self) -> Option<&str> {
        metadata_str(&self.metadata, META_ORIGINAL_PUBLIC_ID)
    }

    /// Text sent to the embedding service.
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.content)
    }

    /// True when the stored embedding does not match the current content.
    pub fn needs_enrichment(&self) -> bool {
        self.enriched_hash.as_deref() != Some(self.content_hash.as_str())
    }

    /// Replace title and content, recording the previous content in the
    /// version history when it changed. Returns whether the content hash
    /// changed.
    pub fn revise(&mut self, title: String, content: String, now: DateTime<Utc>) -> bool {
        if content != self.content {
            let previous = std::mem::take(&mut self.content);
            self.version_history.insert(
                0,
                PostVersion {
                    id: Uuid::new_v4(),
                    content: previous,
                    created_at: self.updated_at,
                },
            );
            self.version_history.truncate(MAX_VERSION_HISTORY);
        }
        self.title = title;
        self.content = content;
        self.updated_at = now;

        let hash = content_hash(&self.title, &self.content);
        let changed = hash != self.content_hash;
        self.content_hash = hash;
        changed
    }
}

/// A media item (image) in the owner's library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub provider: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub status: MediaStatus,
    pub metadata: Metadata,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Media {
    pub fn asset_reference(&self) -> Option<&str> {
        metadata_str(&self.metadata, META_ORIGINAL_PUBLIC_ID)
    }
}

fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// SHA-256 over title and content, hex-encoded.
pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive a slug from a title: lowercase, spaces replaced by `-`.
pub fn slugify(title: &str) -> String {
    title.trim().to_lowercase().replace(' ', "-")
}

/// Slugs contain only lowercase ASCII letters, digits, and `-`.
pub fn validate_slug(slug: &str) -> Result<()> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        bail!(
            "Invalid slug '{}': only lowercase letters, digits and '-' are allowed",
            slug
        );
    }
    Ok(())
}
