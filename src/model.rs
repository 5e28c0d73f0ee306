// Core data types: content classes, cache records and the poem record.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::{AUDIO_TTL, INSIGHT_TTL};

/// Category of generated content. Each class has its own expiry policy and
/// its own partition in the store and in the in-flight registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    Audio,
    Insight,
    Poem,
}

impl ContentClass {
    /// Time-to-live for records of this class. `None` never expires.
    pub fn ttl(self) -> Option<Duration> {
        match self {
            ContentClass::Audio => Some(AUDIO_TTL),
            ContentClass::Insight => Some(INSIGHT_TTL),
            ContentClass::Poem => None,
        }
    }

    /// Name of the backend partition holding this class.
    pub fn partition(self) -> &'static str {
        match self {
            ContentClass::Audio => "audio",
            ContentClass::Insight => "insight",
            ContentClass::Poem => "poem",
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.partition())
    }
}

/// Key of a piece of content within its class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Cached content body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Blob(Bytes),
    Text(String),
}

impl Payload {
    pub fn as_blob(&self) -> Option<&Bytes> {
        match self {
            Payload::Blob(b) => Some(b),
            Payload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            Payload::Blob(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Blob(b) => b.len(),
            Payload::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type Metadata = BTreeMap<String, String>;

/// What a generator hands back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub payload: Payload,
    pub metadata: Metadata,
}

impl Generated {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<Payload> for Generated {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

/// A stored piece of content as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub key: ContentId,
    pub class: ContentClass,
    pub payload: Payload,
    pub metadata: Metadata,
    /// Milliseconds since the Unix epoch.
    pub stored_at: u64,
}

impl CacheRecord {
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.stored_at))
    }

    /// A record is expired once its age is strictly greater than the class TTL.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.class.ttl() {
            Some(ttl) => self.age(now_ms) > ttl,
            None => false,
        }
    }
}

/// A poem as exchanged with the poem source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoemRecord {
    pub id: String,
    pub poet: String,
    #[serde(default)]
    pub poet_arabic: String,
    pub title: String,
    #[serde(default)]
    pub title_arabic: String,
    /// Verses separated by newlines.
    pub arabic: String,
    #[serde(default)]
    pub english: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PoemRecord {
    pub fn content_id(&self) -> ContentId {
        ContentId::new(self.id.clone())
    }

    pub fn verses(&self) -> impl Iterator<Item = &str> {
        self.arabic.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Selection criteria for fetching a poem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoemFilter {
    pub poet: Option<String>,
    pub tag: Option<String>,
}

/// Voice selection for speech synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParams {
    pub voice_name: String,
    /// Optional delivery instruction prepended to the narrated text.
    pub style: Option<String>,
}

impl VoiceParams {
    pub fn new(voice_name: impl Into<String>) -> Self {
        Self {
            voice_name: voice_name.into(),
            style: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(class: ContentClass, stored_at: u64) -> CacheRecord {
        CacheRecord {
            key: ContentId::from("k"),
            class,
            payload: Payload::Text("x".into()),
            metadata: Metadata::new(),
            stored_at,
        }
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let ttl_ms = AUDIO_TTL.as_millis() as u64;
        let r = record(ContentClass::Audio, 1_000);
        assert!(!r.is_expired(1_000 + ttl_ms));
        assert!(r.is_expired(1_000 + ttl_ms + 1));
    }

    #[test]
    fn test_poem_never_expires() {
        let r = record(ContentClass::Poem, 0);
        assert!(!r.is_expired(u64::MAX));
    }

    #[test]
    fn test_poem_record_json_shape() {
        let json = r#"{
            "id": "42",
            "poet": "Al-Mutanabbi",
            "poetArabic": "المتنبي",
            "title": "The Horse",
            "titleArabic": "الخيل",
            "arabic": "الخيل والليل\nوالبيداء تعرفني",
            "english": "The horse and the night",
            "tags": ["pride"]
        }"#;
        let poem: PoemRecord = serde_json::from_str(json).unwrap();
        assert_eq!(poem.poet_arabic, "المتنبي");
        assert_eq!(poem.verses().count(), 2);
        assert_eq!(poem.content_id().as_str(), "42");
    }
}
