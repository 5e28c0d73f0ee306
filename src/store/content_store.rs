// Expiry-aware content store. Backend failures degrade to misses and no-ops.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backend::{FsBackend, MemoryBackend, StoreBackend};
use super::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::{CacheRecord, ContentClass, ContentId, Metadata, Payload};

/// On-disk envelope of a cache record.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    key: ContentId,
    class: ContentClass,
    stored_at: u64,
    #[serde(default)]
    metadata: Metadata,
    payload: StoredPayload,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
enum StoredPayload {
    /// Base64 of the blob bytes.
    Blob(String),
    Text(String),
}

impl StoredRecord {
    fn encode(record: &CacheRecord) -> Result<Bytes> {
        let payload = match &record.payload {
            Payload::Blob(b) => StoredPayload::Blob(BASE64.encode(b)),
            Payload::Text(t) => StoredPayload::Text(t.clone()),
        };
        let stored = StoredRecord {
            key: record.key.clone(),
            class: record.class,
            stored_at: record.stored_at,
            metadata: record.metadata.clone(),
            payload,
        };
        Ok(Bytes::from(serde_json::to_vec(&stored)?))
    }

    fn decode(raw: &[u8]) -> Result<CacheRecord> {
        let stored: StoredRecord = serde_json::from_slice(raw)?;
        let payload = match stored.payload {
            StoredPayload::Blob(b64) => Payload::Blob(Bytes::from(
                BASE64
                    .decode(b64.as_bytes())
                    .map_err(|e| anyhow!("blob is not valid base64: {}", e))?,
            )),
            StoredPayload::Text(t) => Payload::Text(t),
        };
        Ok(CacheRecord {
            key: stored.key,
            class: stored.class,
            payload,
            metadata: stored.metadata,
            stored_at: stored.stored_at,
        })
    }
}

pub struct ContentStore {
    backend: Option<Arc<dyn StoreBackend>>,
    clock: Arc<dyn Clock>,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn StoreBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend: Some(backend),
            clock,
        }
    }

    /// A store with no persistence: every read misses, every write is dropped.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), Arc::new(SystemClock))
    }

    /// Build the store described by `config`. An empty `cache_dir` keeps
    /// content in memory; a directory that cannot be opened disables caching.
    pub async fn open(config: &EngineConfig) -> Self {
        if config.cache_dir.is_empty() {
            return Self::in_memory();
        }
        match FsBackend::open(&config.cache_dir).await {
            Ok(backend) => {
                info!("content store opened at {}", config.cache_dir);
                Self::new(Arc::new(backend), Arc::new(SystemClock))
            }
            Err(e) => {
                warn!("content store unavailable, caching disabled: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Look up a record. Expired or undecodable records are deleted and
    /// reported as a miss.
    pub async fn get(&self, class: ContentClass, key: &ContentId) -> Option<CacheRecord> {
        let backend = self.backend.as_ref()?;
        let raw = match backend.get(class.partition(), key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("store get {}/{} failed: {}", class, key, e);
                return None;
            }
        };

        let record = match StoredRecord::decode(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("store record {}/{} is corrupt, evicting: {}", class, key, e);
                self.delete(class, key).await;
                return None;
            }
        };

        let now = self.clock.now_ms();
        // Class policy governs expiry, regardless of what the envelope claims.
        let record = CacheRecord { class, ..record };
        if record.is_expired(now) {
            debug!(
                "store record {}/{} expired (age_ms={}), evicting",
                class,
                key,
                record.age(now).as_millis()
            );
            self.delete(class, key).await;
            return None;
        }

        Some(record)
    }

    /// Store `payload` under `key`, stamping it with the current time and
    /// replacing any previous record.
    pub async fn set(&self, class: ContentClass, key: &ContentId, payload: Payload, metadata: Metadata) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let record = CacheRecord {
            key: key.clone(),
            class,
            payload,
            metadata,
            stored_at: self.clock.now_ms(),
        };
        let encoded = match StoredRecord::encode(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("store encode {}/{} failed: {}", class, key, e);
                return;
            }
        };
        if let Err(e) = backend.put(class.partition(), key.as_str(), encoded).await {
            warn!("store set {}/{} failed: {}", class, key, e);
        }
    }

    pub async fn delete(&self, class: ContentClass, key: &ContentId) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if let Err(e) = backend.delete(class.partition(), key.as_str()).await {
            warn!("store delete {}/{} failed: {}", class, key, e);
        }
    }

    /// Drop every record of `class`.
    pub async fn clear(&self, class: ContentClass) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        match backend.clear(class.partition()).await {
            Ok(()) => info!("store cleared partition {}", class),
            Err(e) => warn!("store clear {} failed: {}", class, e),
        }
    }
}
