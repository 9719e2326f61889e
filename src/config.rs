//! TOML configuration for the `pos` binary.
//!
//! Only `[db]` is required; every other section has defaults suitable for
//! a local Ollama setup. Provider secrets are never read from the file:
//! they come from `OPENAI_API_KEY`, `CLOUDINARY_API_KEY` and
//! `CLOUDINARY_API_SECRET`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_failure_pause_ms")]
    pub failure_pause_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_ttl_secs: default_lease_ttl_secs(),
            failure_pause_ms: default_failure_pause_ms(),
        }
    }
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn failure_pause(&self) -> Duration {
        Duration::from_millis(self.failure_pause_ms)
    }
}

fn default_partitions() -> u32 {
    4
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_lease_ttl_secs() -> u64 {
    30
}
fn default_failure_pause_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            base_url: None,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_provider")]
    pub provider: String,
    #[serde(default)]
    pub cloud_name: Option<String>,
    #[serde(default = "default_assets_root")]
    pub root: Option<PathBuf>,
    #[serde(default = "default_assets_base_url")]
    pub base_url: Option<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            provider: default_assets_provider(),
            cloud_name: None,
            root: default_assets_root(),
            base_url: default_assets_base_url(),
        }
    }
}

fn default_assets_provider() -> String {
    "local".to_string()
}
fn default_assets_root() -> Option<PathBuf> {
    Some(PathBuf::from("./data/assets"))
}
fn default_assets_base_url() -> Option<String> {
    Some("http://localhost:8080/assets".to_string())
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(default = "default_pending_after_secs")]
    pub pending_after_secs: u64,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pending_after_secs: default_pending_after_secs(),
            batch_limit: default_batch_limit(),
        }
    }
}

fn default_pending_after_secs() -> u64 {
    600
}
fn default_batch_limit() -> i64 {
    100
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate channel
    if config.channel.partitions == 0 {
        anyhow::bail!("channel.partitions must be >= 1");
    }
    // The worker renews leases every third of the TTL.
    if config.channel.lease_ttl_secs < 3 {
        anyhow::bail!("channel.lease_ttl_secs must be >= 3");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    // Validate assets
    match config.assets.provider.as_str() {
        "cloudinary" => {
            if config.assets.cloud_name.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("assets.cloud_name must be specified when provider is 'cloudinary'");
            }
        }
        "local" => {
            if config.assets.root.is_none() || config.assets.base_url.is_none() {
                anyhow::bail!("assets.root and assets.base_url must be specified when provider is 'local'");
            }
        }
        other => anyhow::bail!(
            "Unknown assets provider: '{}'. Must be cloudinary or local.",
            other
        ),
    }

    if config.reconcile.batch_limit < 1 {
        anyhow::bail!("reconcile.batch_limit must be >= 1");
    }

    Ok(config)
}
