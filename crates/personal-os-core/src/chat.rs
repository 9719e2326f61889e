//! Retrieval-augmented chat over the owner's posts.
//!
//! The query is embedded with the same [`Embedder`] the worker uses for
//! posts, the nearest posts are retrieved from the repository, and a
//! deterministic prompt built from their titles and bodies is sent to the
//! [`Generator`]. Sources are returned in nearest-first order so callers
//! can display citations.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::generate::Generator;
use crate::models::Post;
use crate::store::PostStore;

/// Number of sources used when the caller passes a non-positive limit.
pub const DEFAULT_SOURCE_LIMIT: i64 = 3;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub query: String,
    pub owner_id: Uuid,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<Post>,
}

pub fn effective_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_SOURCE_LIMIT
    } else {
        limit
    }
}

/// Render the generation prompt for `query` over `sources`.
pub fn build_prompt(query: &str, sources: &[Post]) -> String {
    let mut prompt = String::from("Based on the following contexts:\n\n");
    for (i, source) in sources.iter().enumerate() {
        prompt.push_str(&format!("--- Context {} (Title: {}) ---\n", i + 1, source.title));
        prompt.push_str(&source.content);
        prompt.push_str("\n\n");
    }
    prompt.push_str("--- Question ---\n");
    prompt.push_str(query);
    prompt.push_str("\n\n--- Answer ---\n");
    prompt.push_str("Please answer the question above based only on the provided contexts:");
    prompt
}

/// Answer a question from the owner's own posts.
pub async fn answer(
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    posts: &dyn PostStore,
    request: &ChatRequest,
) -> Result<ChatResponse> {
    if request.query.trim().is_empty() {
        bail!("chat query must not be empty");
    }

    let query_vector = embedder.embed(&request.query).await?;
    let limit = effective_limit(request.limit);
    let sources = posts
        .nearest_posts(request.owner_id, &query_vector, limit)
        .await?;
    debug!(owner_id = %request.owner_id, limit, found = sources.len(), "retrieved chat sources");

    let prompt = build_prompt(&request.query, &sources);
    let response = generator.complete(&prompt).await?;
    info!(model = generator.model_name(), sources = sources.len(), "chat answered");

    Ok(ChatResponse { response, sources })
}
