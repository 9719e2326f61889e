//! Lifecycle events exchanged between the API process and the worker.
//!
//! Events are JSON-encoded and published keyed by resource ID, so every
//! event for one resource lands on the same partition and is consumed in
//! publish order.
//!
//! # Wire format
//!
//! ```json
//! {"event_type":"post.created","post_id":"…","owner_id":"…"}
//! {"event_type":"media.uploaded","media_id":"…","owner_id":"…",
//!  "provider":"cloudinary","original_url":"https://…","original_public_id":"users/…"}
//! ```

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOPIC_POST_EVENTS: &str = "post.events";
pub const TOPIC_MEDIA_EVENTS: &str = "media.events";

pub const GROUP_POST_PROCESSOR: &str = "post-processor-group";
pub const GROUP_MEDIA_PROCESSOR: &str = "media-processor-group";

/// An event that can travel over the event channel.
///
/// Each event family has a fixed topic and a fixed consumer group, so
/// horizontally scaled workers share partitions instead of processing
/// the same key twice.
pub trait LifecycleEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TOPIC: &'static str;
    const GROUP: &'static str;

    /// Partition key: the resource ID.
    fn key(&self) -> String;

    /// Dotted event name, e.g. `"post.created"`.
    fn name(&self) -> &'static str;

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostEventType {
    #[serde(rename = "post.created")]
    Created,
    #[serde(rename = "post.updated")]
    Updated,
    #[serde(rename = "post.deleted")]
    Deleted,
    #[serde(rename = "post.published")]
    Published,
}

impl PostEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "post.created",
            Self::Updated => "post.updated",
            Self::Deleted => "post.deleted",
            Self::Published => "post.published",
        }
    }

    /// Creation and update events carry new content to embed.
    pub fn changes_content(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostEvent {
    pub event_type: PostEventType,
    pub post_id: Uuid,
    pub owner_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_public_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
}

impl PostEvent {
    pub fn new(event_type: PostEventType, post_id: Uuid, owner_id: Uuid) -> Self {
        Self {
            event_type,
            post_id,
            owner_id,
            original_public_id: None,
            original_url: None,
        }
    }
}

impl LifecycleEvent for PostEvent {
    const TOPIC: &'static str = TOPIC_POST_EVENTS;
    const GROUP: &'static str = GROUP_POST_PROCESSOR;

    fn key(&self) -> String {
        self.post_id.to_string()
    }

    fn name(&self) -> &'static str {
        self.event_type.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaEventType {
    #[serde(rename = "media.uploaded")]
    Uploaded,
    #[serde(rename = "media.deleted")]
    Deleted,
}

impl MediaEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "media.uploaded",
            Self::Deleted => "media.deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEvent {
    pub event_type: MediaEventType,
    pub media_id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub original_public_id: String,
}

impl LifecycleEvent for MediaEvent {
    const TOPIC: &'static str = TOPIC_MEDIA_EVENTS;
    const GROUP: &'static str = GROUP_MEDIA_PROCESSOR;

    fn key(&self) -> String {
        self.media_id.to_string()
    }

    fn name(&self) -> &'static str {
        self.event_type.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_post_event_wire_shape() {
        let post_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let event = PostEvent::new(PostEventType::Published, post_id, owner_id);

        let value: Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event_type": "post.published",
                "post_id": post_id.to_string(),
                "owner_id": owner_id.to_string(),
            })
        );
        assert_eq!(event.key(), post_id.to_string());
    }

    #[test]
    fn test_media_event_accepts_minimal_payload() {
        let media_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"event_type":"media.deleted","media_id":"{}","owner_id":"{}"}}"#,
            media_id,
            Uuid::new_v4()
        );
        let event = MediaEvent::decode(raw.as_bytes()).unwrap();
        assert_eq!(event.event_type, MediaEventType::Deleted);
        assert_eq!(event.media_id, media_id);
        assert!(event.original_public_id.is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(PostEvent::decode(b"not json").is_err());
        assert!(PostEvent::decode(br#"{"event_type":"post.exploded"}"#).is_err());
        assert!(MediaEvent::decode(br#"{"event_type":"media.uploaded","media_id":"nope"}"#).is_err());
    }

    #[test]
    fn test_content_changing_events() {
        assert!(PostEventType::Created.changes_content());
        assert!(PostEventType::Updated.changes_content());
        assert!(!PostEventType::Published.changes_content());
        assert!(!PostEventType::Deleted.changes_content());
    }
}
