//! `pos chat`: answer a question from one owner's posts.

use anyhow::{bail, Result};
use uuid::Uuid;

use personal_os_core::chat::{answer, ChatRequest, ChatResponse};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::llm::create_generator;
use crate::sqlite_store::SqliteStore;

pub async fn run_chat(
    config: &Config,
    query: &str,
    owner_id: Uuid,
    limit: i64,
    json: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Chat needs an embedding provider. Set [embedding] provider in the config.");
    }
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.llm)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let request = ChatRequest {
        query: query.to_string(),
        owner_id,
        limit,
    };
    let response = answer(embedder.as_ref(), generator.as_ref(), &store, &request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &ChatResponse) {
    println!("{}", response.response.trim());
    if response.sources.is_empty() {
        println!("\n(no sources)");
        return;
    }
    println!("\nSources:");
    for (i, post) in response.sources.iter().enumerate() {
        println!("  {}. {} [{}] {}", i + 1, post.title, post.status, post.id);
    }
}
