//! Asset store providers.
//!
//! - **[`CloudinaryStore`]**: signed uploads and deletes against the
//!   Cloudinary upload API; renditions are Cloudinary URL transformations.
//! - **[`LocalStore`]**: files on local disk served from `base_url`;
//!   renditions are addressed by a transformation path prefix for a
//!   front-end image proxy to resolve.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use sha2::{Digest, Sha256};

use personal_os_core::assets::{AssetStore, Rendition, UploadedAsset};

use crate::config::AssetsConfig;

pub fn create_asset_store(config: &AssetsConfig) -> Result<Arc<dyn AssetStore>> {
    match config.provider.as_str() {
        "cloudinary" => Ok(Arc::new(CloudinaryStore::from_env(config)?)),
        "local" => Ok(Arc::new(LocalStore::new(config)?)),
        other => bail!("Unknown assets provider: {}", other),
    }
}

// ============ Cloudinary ============

pub struct CloudinaryStore {
    client: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl CloudinaryStore {
    /// Reads `CLOUDINARY_API_KEY` and `CLOUDINARY_API_SECRET`.
    pub fn from_env(config: &AssetsConfig) -> Result<Self> {
        let cloud_name = config
            .cloud_name
            .clone()
            .ok_or_else(|| anyhow!("assets.cloud_name required for cloudinary provider"))?;
        let api_key = std::env::var("CLOUDINARY_API_KEY")
            .map_err(|_| anyhow!("CLOUDINARY_API_KEY environment variable not set"))?;
        let api_secret = std::env::var("CLOUDINARY_API_SECRET")
            .map_err(|_| anyhow!("CLOUDINARY_API_SECRET environment variable not set"))?;
        Self::new(cloud_name, api_key, api_secret)
    }

    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            cloud_name,
            api_key,
            api_secret,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/image/{}",
            self.cloud_name, action
        )
    }

    async fn post_signed(
        &self,
        action: &str,
        mut params: Vec<(&str, String)>,
        file: Option<String>,
    ) -> Result<serde_json::Value> {
        params.push(("timestamp", chrono::Utc::now().timestamp().to_string()));
        let signature = sign(&params, &self.api_secret);

        let mut body = serde_json::Map::new();
        for (k, v) in &params {
            body.insert(k.to_string(), serde_json::Value::String(v.clone()));
        }
        if let Some(file) = file {
            body.insert("file".into(), serde_json::Value::String(file));
        }
        body.insert("api_key".into(), self.api_key.clone().into());
        body.insert("signature".into(), signature.into());
        body.insert("signature_algorithm".into(), "sha256".into());

        let response = self
            .client
            .post(self.endpoint(action))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Cloudinary {} error {}: {}", action, status, body_text);
        }
        Ok(response.json().await?)
    }
}

/// Cloudinary request signature: params sorted by name, joined as
/// `k=v&k=v`, secret appended, SHA-256 hex.
fn sign(params: &[(&str, String)], secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha256::digest(format!("{}{}", joined, secret).as_bytes()))
}

fn sniff_mime(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl AssetStore for CloudinaryStore {
    fn provider(&self) -> &str {
        "cloudinary"
    }

    async fn upload(&self, data: &[u8], folder: &str, id: &str) -> Result<UploadedAsset> {
        let file = format!(
            "data:{};base64,{}",
            sniff_mime(data),
            base64::engine::general_purpose::STANDARD.encode(data)
        );
        let params = vec![("folder", folder.to_string()), ("public_id", id.to_string())];
        let json = self.post_signed("upload", params, Some(file)).await?;

        let url = json
            .get("secure_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Cloudinary upload response missing secure_url"))?;
        let public_id = json
            .get("public_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Cloudinary upload response missing public_id"))?;

        Ok(UploadedAsset {
            url: url.to_string(),
            public_id: public_id.to_string(),
        })
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        let params = vec![("public_id", public_id.to_string())];
        let json = self.post_signed("destroy", params, None).await?;
        match json.get("result").and_then(|v| v.as_str()) {
            Some("ok") | Some("not found") => Ok(()),
            other => bail!("Cloudinary destroy failed for {}: {:?}", public_id, other),
        }
    }

    fn derive_url(&self, public_id: &str, rendition: Rendition) -> Result<String> {
        if public_id.is_empty() {
            bail!("Cannot derive a rendition URL from an empty public id");
        }
        Ok(format!(
            "https://res.cloudinary.com/{}/image/upload/{}/{}",
            self.cloud_name,
            rendition.transformation(),
            public_id
        ))
    }
}

// ============ Local disk ============

pub struct LocalStore {
    root: PathBuf,
    base_url: String,
}

impl LocalStore {
    pub fn new(config: &AssetsConfig) -> Result<Self> {
        let root = config
            .root
            .clone()
            .ok_or_else(|| anyhow!("assets.root required for local provider"))?;
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow!("assets.base_url required for local provider"))?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn path_for(&self, public_id: &str) -> Result<PathBuf> {
        let relative = Path::new(public_id);
        if public_id.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid asset id: '{}'", public_id);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetStore for LocalStore {
    fn provider(&self) -> &str {
        "local"
    }

    async fn upload(&self, data: &[u8], folder: &str, id: &str) -> Result<UploadedAsset> {
        let public_id = format!("{}/{}", folder.trim_matches('/'), id);
        let path = self.path_for(&public_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write asset: {}", path.display()))?;

        Ok(UploadedAsset {
            url: format!("{}/{}", self.base_url, public_id),
            public_id,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        let path = self.path_for(public_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete asset: {}", path.display())),
        }
    }

    fn derive_url(&self, public_id: &str, rendition: Rendition) -> Result<String> {
        self.path_for(public_id)?;
        Ok(format!(
            "{}/{}/{}",
            self.base_url,
            rendition.transformation(),
            public_id
        ))
    }
}
