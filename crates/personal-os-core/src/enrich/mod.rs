//! Per-resource enrichment handlers.
//!
//! A handler receives one decoded lifecycle event, re-reads the record it
//! refers to, and promotes it from `pending` to a terminal state. Every
//! handler is safe to replay: the record's current state, not the event
//! payload, decides whether any work happens.
//!
//! `Ok(_)` means the message may be committed. `Err(_)` means a transient
//! failure (repository, network, provider) and the message must be
//! redelivered.

pub mod media;
pub mod post;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::events::LifecycleEvent;

pub use media::MediaEnricher;
pub use post::PostEnricher;

/// What a handler did with an event. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The record was enriched and written back.
    Enriched,
    /// The record no longer exists.
    NotFound,
    /// The record is already in a terminal state with current content.
    AlreadyProcessed,
    /// The event type needs no enrichment (deletions).
    Ignored,
    /// The record can never be enriched and was marked `error`.
    MarkedError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enriched => "enriched",
            Self::NotFound => "not_found",
            Self::AlreadyProcessed => "already_processed",
            Self::Ignored => "ignored",
            Self::MarkedError => "marked_error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handles one event family. The worker runs one consumption loop per
/// handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Event: LifecycleEvent;

    async fn handle(&self, event: &Self::Event) -> Result<Outcome>;
}
