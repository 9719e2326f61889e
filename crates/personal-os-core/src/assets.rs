//! Asset store capability.
//!
//! The write path uploads originals through [`AssetStore::upload`]; the
//! worker never re-uploads, it only derives transformed rendition URLs
//! from the stored reference with [`AssetStore::derive_url`].

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Derived image renditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendition {
    /// 1200×630 crop for social sharing cards.
    SocialPreview,
    /// Width-limited 400px thumbnail.
    Thumbnail,
}

impl Rendition {
    /// Transformation string in Cloudinary URL syntax.
    pub fn transformation(&self) -> &'static str {
        match self {
            Self::SocialPreview => "c_fill,g_auto,w_1200,h_630",
            Self::Thumbnail => "c_limit,w_400",
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub url: String,
    /// Stable reference used for deletes and rendition URLs.
    pub public_id: String,
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Provider name recorded on media items (e.g. `"cloudinary"`).
    fn provider(&self) -> &str;

    async fn upload(&self, data: &[u8], folder: &str, id: &str) -> Result<UploadedAsset>;

    async fn delete(&self, public_id: &str) -> Result<()>;

    /// URL of a transformed rendition of a stored asset. Pure; never
    /// touches the network.
    fn derive_url(&self, public_id: &str, rendition: Rendition) -> Result<String>;
}

/// Upload folder for post originals.
pub fn post_folder(owner_id: Uuid) -> String {
    format!("users/{}/originals", owner_id)
}

/// Upload folder for media library originals.
pub fn media_folder(owner_id: Uuid) -> String {
    format!("users/{}/media/originals", owner_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folders() {
        let owner = Uuid::nil();
        assert_eq!(
            post_folder(owner),
            "users/00000000-0000-0000-0000-000000000000/originals"
        );
        assert!(media_folder(owner).ends_with("/media/originals"));
    }
}
