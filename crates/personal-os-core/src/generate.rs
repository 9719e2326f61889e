//! Generative text capability used by retrieval-augmented chat.

use anyhow::Result;
use async_trait::async_trait;

/// Maps a prompt to generated text.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}
