//! # Personal OS Core
//!
//! Runtime-free logic for the Personal OS content-enrichment pipeline:
//! content models, lifecycle events, the event channel and content store
//! abstractions, the post and media enrichment handlers, and
//! retrieval-augmented chat.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! Concrete channels, stores, and providers live in the `personal-os`
//! app crate; in-memory implementations live here for tests.

pub mod assets;
pub mod channel;
pub mod chat;
pub mod embedding;
pub mod enrich;
pub mod events;
pub mod generate;
pub mod models;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;
