//! # Personal OS
//!
//! The write path and enrichment pipeline of a personal CMS.
//!
//! Posts and media are persisted immediately as `pending` and a lifecycle
//! event is published in the background. A long-running worker consumes
//! those events, derives image renditions and embeddings, and moves each
//! record to its terminal status. Retrieval-augmented chat answers
//! questions from an owner's enriched posts.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  persist   ┌──────────┐
//! │ PostService│──────────▶│  SQLite   │◀──────────────┐
//! │MediaService│            │  store   │               │ update
//! └─────┬──────┘            └──────────┘               │
//!       │ publish (background)                  ┌──────┴─────┐
//!       ▼                                       │   Worker    │
//! ┌────────────┐   fetch / commit per group     │ post loop   │
//! │  channel   │──────────────────────────────▶│ media loop  │
//! │ event_log  │                                └────────────┘
//! └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Post and media repositories |
//! | [`sqlite_channel`] | Durable partitioned event channel |
//! | [`producer`] | Background event publication |
//! | [`posts`] | Post create/update/delete |
//! | [`media`] | Media upload/delete |
//! | [`worker`] | Enrichment worker runtime |
//! | [`reconcile`] | Re-publish events for stranded `pending` records |
//! | [`embedding`] | HTTP embedding providers |
//! | [`llm`] | HTTP text generation |
//! | [`assets`] | Cloudinary and local asset stores |
//! | [`chat`] | `pos chat` command |
//! | [`app`] | Shared CLI wiring |

pub mod app;
pub mod assets;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod llm;
pub mod media;
pub mod migrate;
pub mod posts;
pub mod producer;
pub mod reconcile;
pub mod sqlite_channel;
pub mod sqlite_store;
pub mod worker;
