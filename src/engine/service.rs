// Generation service wiring the store, coordinator and generators together.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::coordinator::{Coordinator, WaitPolicy};
use super::scheduler::PrefetchHandler;
use super::stats::StatsSnapshot;
use crate::audio::{encode_wav, is_wav, pcm16_from_le_bytes};
use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::generator::prompt::{insight_prompt, narration_text};
use crate::generator::{HttpGenerator, InsightStreamer, SpeechSynthesizer};
use crate::model::{ContentClass, ContentId, Generated, Metadata, Payload, PoemRecord, VoiceParams};
use crate::store::ContentStore;
use crate::stream::InsightAssembler;

pub struct GenerationService {
    coordinator: Coordinator,
    feeds: Arc<InsightFeeds>,
    speech: Arc<dyn SpeechSynthesizer>,
    insight: Arc<dyn InsightStreamer>,
    voice: VoiceParams,
}

impl GenerationService {
    pub fn new(
        store: Arc<ContentStore>,
        policy: WaitPolicy,
        speech: Arc<dyn SpeechSynthesizer>,
        insight: Arc<dyn InsightStreamer>,
        voice: VoiceParams,
    ) -> Self {
        Self {
            coordinator: Coordinator::new(store, policy),
            feeds: Arc::new(InsightFeeds::default()),
            speech,
            insight,
            voice,
        }
    }

    /// Build the service described by `config`, backed by the HTTP generator.
    pub async fn from_config(config: &EngineConfig) -> Self {
        let store = Arc::new(ContentStore::open(config).await);
        let generator = Arc::new(HttpGenerator::new(config.generator.clone()));
        Self::new(
            store,
            WaitPolicy::from_config(config),
            generator.clone(),
            generator,
            VoiceParams::new(config.generator.voice_name.clone()),
        )
    }

    /// Narration of `poem` as a playable WAV file.
    pub async fn narration(&self, poem: &PoemRecord) -> Result<Bytes, GenerationError> {
        let speech = Arc::clone(&self.speech);
        let voice = self.voice.clone();
        let text = narration_text(poem, &voice);

        let payload = self
            .coordinator
            .ensure_generated(ContentClass::Audio, &poem.content_id(), move |key| async move {
                let raw = speech.synthesize_audio(&text, &voice).await?;
                if raw.pcm.is_empty() {
                    return Err(GenerationError::GenerationFailure(format!(
                        "no audio synthesized for {}",
                        key
                    )));
                }
                let sample_rate = raw.sample_rate;
                let wav = if is_wav(&raw.pcm) {
                    raw.pcm
                } else {
                    encode_wav(&pcm16_from_le_bytes(&raw.pcm)?, sample_rate)?
                };
                Ok(Generated::new(Payload::Blob(wav))
                    .with_meta("voice", voice.voice_name)
                    .with_meta("sample_rate", sample_rate.to_string()))
            })
            .await?;

        match payload {
            Payload::Blob(wav) => Ok(wav),
            Payload::Text(_) => Err(GenerationError::Decode(format!(
                "cached narration for {} is not audio",
                poem.id
            ))),
        }
    }

    /// Insight text for `poem`.
    ///
    /// While the text is being generated the latest accumulated prefix is
    /// offered to `progress`, whether this call started the generation or
    /// joined one already running (a prefetch, say). Offers never block the
    /// generation: a full channel skips that partial, so a receiver drained
    /// only after this returns sees a subset ending at the final text.
    pub async fn insight(
        &self,
        poem: &PoemRecord,
        progress: Option<mpsc::Sender<String>>,
    ) -> Result<String, GenerationError> {
        let streamer = Arc::clone(&self.insight);
        let prompt = insight_prompt(poem);
        let key = poem.content_id();

        let feed = FeedHandle::join(&self.feeds, &key);
        if let Some(tx) = progress {
            forward_progress(feed.subscribe(), tx);
        }
        let generator_feed = feed.clone();

        let payload = self
            .coordinator
            .ensure_generated(ContentClass::Insight, &key, move |key| async move {
                let chunks = streamer.stream_insight(&prompt).await?;
                let text = InsightAssembler::new(chunks)
                    .publish_to(&generator_feed.sender)
                    .await?;
                drop(generator_feed);
                if text.trim().is_empty() {
                    return Err(GenerationError::GenerationFailure(format!(
                        "empty insight for {}",
                        key
                    )));
                }
                Ok(Generated::new(Payload::Text(text)))
            })
            .await;
        drop(feed);
        let payload = payload?;

        match payload {
            Payload::Text(text) => Ok(text),
            Payload::Blob(_) => Err(GenerationError::Decode(format!(
                "cached insight for {} is not text",
                poem.id
            ))),
        }
    }

    /// Keep a poem record for later lookup. Poems never expire.
    pub async fn remember_poem(&self, poem: &PoemRecord) {
        match serde_json::to_string(poem) {
            Ok(json) => {
                self.store()
                    .set(ContentClass::Poem, &poem.content_id(), Payload::Text(json), Metadata::new())
                    .await
            }
            Err(e) => warn!("cannot encode poem {}: {}", poem.id, e),
        }
    }

    pub async fn cached_poem(&self, id: &str) -> Option<PoemRecord> {
        let record = self.store().get(ContentClass::Poem, &ContentId::from(id)).await?;
        let text = record.payload.as_text()?;
        match serde_json::from_str(text) {
            Ok(poem) => Some(poem),
            Err(e) => {
                warn!("cached poem {} is unreadable: {}", id, e);
                None
            }
        }
    }

    /// Drop every cached record of `class`.
    pub async fn clear(&self, class: ContentClass) {
        self.store().clear(class).await;
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.coordinator.stats().snapshot()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        self.coordinator.store()
    }
}

type Feed = Arc<watch::Sender<String>>;

/// Latest partial of every insight generation in progress, keyed by poem.
#[derive(Default)]
struct InsightFeeds {
    feeds: Mutex<HashMap<ContentId, Feed>>,
}

impl InsightFeeds {
    fn join(&self, key: &ContentId) -> Feed {
        let mut feeds = self.feeds.lock();
        let feed = feeds
            .entry(key.clone())
            .or_insert_with(|| Arc::new(watch::channel(String::new()).0));
        Arc::clone(feed)
    }

    fn retire(&self, key: &ContentId, feed: &Feed) {
        let mut feeds = self.feeds.lock();
        if feeds.get(key).map_or(false, |current| Arc::ptr_eq(current, feed)) {
            feeds.remove(key);
        }
    }
}

/// A share of one feed. The feed leaves the registry when the first share
/// is dropped, which happens once its generation or a caller is done.
#[derive(Clone)]
struct FeedHandle {
    feeds: Arc<InsightFeeds>,
    key: ContentId,
    sender: Feed,
}

impl FeedHandle {
    fn join(feeds: &Arc<InsightFeeds>, key: &ContentId) -> Self {
        Self {
            feeds: Arc::clone(feeds),
            key: key.clone(),
            sender: feeds.join(key),
        }
    }

    fn subscribe(&self) -> watch::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.feeds.retire(&self.key, &self.sender);
    }
}

/// Copy partials from `feed` into `progress` until the feed closes or the
/// receiver goes away.
fn forward_progress(mut feed: watch::Receiver<String>, progress: mpsc::Sender<String>) {
    tokio::spawn(async move {
        loop {
            let partial = feed.borrow_and_update().clone();
            if !partial.is_empty() {
                if let Err(TrySendError::Closed(_)) = progress.try_send(partial) {
                    return;
                }
            }
            if feed.changed().await.is_err() {
                return;
            }
        }
    });
}

#[async_trait]
impl PrefetchHandler for GenerationService {
    async fn prefetch(&self, class: ContentClass, item: &PoemRecord) -> Result<(), GenerationError> {
        debug!("prefetch {}/{}", class, item.id);
        match class {
            ContentClass::Audio => self.narration(item).await.map(|_| ()),
            ContentClass::Insight => self.insight(item, None).await.map(|_| ()),
            ContentClass::Poem => {
                self.remember_poem(item).await;
                Ok(())
            }
        }
    }
}
