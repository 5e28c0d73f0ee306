use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Lifetime of cached narration audio (7 days).
pub const AUDIO_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lifetime of cached insight text (30 days).
pub const INSIGHT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// First bound on how long a waiter waits for an in-flight generation (60 s).
pub const INFLIGHT_WAIT_MS: u64 = 60_000;

/// Extra grace period before a waiter gives up (10 s).
pub const INFLIGHT_GRACE_MS: u64 = 10_000;

/// Delay before prefetching narration for the current item.
pub const PREFETCH_AUDIO_DELAY_MS: u64 = 2_000;

/// Delay before prefetching the insight for the current item.
pub const PREFETCH_INSIGHT_DELAY_MS: u64 = 5_000;

/// Delay before prefetching narration for the next item.
pub const PREFETCH_NEXT_AUDIO_DELAY_MS: u64 = 10_000;

/// Additional stagger applied inside the next-item task to avoid bursting.
pub const PREFETCH_NEXT_AUDIO_STAGGER_MS: u64 = 500;

/// Sample rate assumed when the synthesizer does not report one.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Tracing directives used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Highest sample rate accepted from a synthesizer (768 kHz).
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Top-level configuration for the generation engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory used for the on-disk content store. Empty keeps the store in memory.
    pub cache_dir: String,
    /// First bound on a waiter's wait for an in-flight generation, in milliseconds.
    pub inflight_wait_ms: u64,
    /// Grace period after the first bound, in milliseconds.
    pub inflight_grace_ms: u64,
    /// Whether a timed-out waiter makes one regeneration attempt of its own.
    pub regenerate_on_timeout: bool,
    /// Tracing filter directives; `RUST_LOG` takes precedence.
    pub log_filter: String,
    pub prefetch: PrefetchConfig,
    pub generator: GeneratorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: String::new(),
            inflight_wait_ms: INFLIGHT_WAIT_MS,
            inflight_grace_ms: INFLIGHT_GRACE_MS,
            regenerate_on_timeout: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            prefetch: PrefetchConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys fall back to their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| anyhow!("invalid engine config: {}", e))
    }

    pub fn inflight_wait(&self) -> Duration {
        Duration::from_millis(self.inflight_wait_ms)
    }

    pub fn inflight_grace(&self) -> Duration {
        Duration::from_millis(self.inflight_grace_ms)
    }
}

/// Timing of the background prefetch triggers, relative to an item change.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub audio_delay_ms: u64,
    pub insight_delay_ms: u64,
    pub next_audio_delay_ms: u64,
    pub next_audio_stagger_ms: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            audio_delay_ms: PREFETCH_AUDIO_DELAY_MS,
            insight_delay_ms: PREFETCH_INSIGHT_DELAY_MS,
            next_audio_delay_ms: PREFETCH_NEXT_AUDIO_DELAY_MS,
            next_audio_stagger_ms: PREFETCH_NEXT_AUDIO_STAGGER_MS,
        }
    }
}

/// Connection settings for the HTTP generation backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: String,
    pub tts_model: String,
    pub text_model: String,
    pub voice_name: String,
    /// Endpoint returning a single poem as JSON.
    pub poems_url: String,
    /// Extra headers sent with every request.
    pub headers: HashMap<String, String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            voice_name: "Charon".to_string(),
            poems_url: String::new(),
            headers: HashMap::new(),
        }
    }
}
