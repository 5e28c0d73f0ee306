use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::GenerationError;
use crate::model::{PoemFilter, PoemRecord, VoiceParams};

/// Raw chunks of an incremental text response.
pub type ChunkStream = BoxStream<'static, Result<Bytes, GenerationError>>;

/// Synthesizer output before it is wrapped in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAudio {
    /// Little-endian PCM16 mono samples, or an already-containerized WAV.
    pub pcm: Bytes,
    pub sample_rate: u32,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize_audio(&self, text: &str, voice: &VoiceParams) -> Result<RawAudio, GenerationError>;
}

#[async_trait]
pub trait InsightStreamer: Send + Sync {
    async fn stream_insight(&self, prompt: &str) -> Result<ChunkStream, GenerationError>;
}

#[async_trait]
pub trait PoemSource: Send + Sync {
    async fn fetch_poem(&self, filter: &PoemFilter) -> Result<PoemRecord, GenerationError>;
}
