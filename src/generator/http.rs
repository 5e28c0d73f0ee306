use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::traits::{ChunkStream, InsightStreamer, PoemSource, RawAudio, SpeechSynthesizer};
use crate::audio::sample_rate_from_mime;
use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use crate::model::{PoemFilter, PoemRecord, VoiceParams};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

impl GenerateResponse {
    fn first_inline_data(self) -> Option<InlineData> {
        self.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
    }
}

/// Speech, insight and poem capabilities served by a Gemini-style HTTP API.
pub struct HttpGenerator {
    client: Client,
    config: RwLock<GeneratorConfig>,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            client: Client::new(),
            config: RwLock::new(config),
        }
    }

    /// Replace the API key and extra headers (e.g. after a key rotation).
    pub fn update_credentials(&self, api_key: String, headers: HashMap<String, String>) {
        let mut config = self.config.write();
        if !api_key.trim().is_empty() {
            config.api_key = api_key;
        }
        if !headers.is_empty() {
            config.headers = headers;
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let config = self.config.read();
        format!(
            "{}/models/{}:{}",
            config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    /// Attach the API key and configured headers to a request.
    fn authorize(&self, mut req: RequestBuilder) -> RequestBuilder {
        let config = self.config.read();
        if !config.api_key.is_empty() {
            req = req.header(API_KEY_HEADER, config.api_key.as_str());
        }
        for (k, v) in &config.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    fn voice_default(&self) -> String {
        self.config.read().voice_name.clone()
    }
}

fn check_status(status: StatusCode, what: &str) -> Result<(), GenerationError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!("{} auth rejected status={}", what, status.as_u16());
        return Err(GenerationError::Network(format!(
            "auth_rejected: HTTP {}",
            status.as_u16()
        )));
    }
    if !status.is_success() {
        warn!("{} failed status={}", what, status.as_u16());
        return Err(GenerationError::Network(format!(
            "{} failed: HTTP {}",
            what,
            status.as_u16()
        )));
    }
    Ok(())
}

#[async_trait]
impl SpeechSynthesizer for HttpGenerator {
    async fn synthesize_audio(&self, text: &str, voice: &VoiceParams) -> Result<RawAudio, GenerationError> {
        let voice_name = if voice.voice_name.is_empty() {
            self.voice_default()
        } else {
            voice.voice_name.clone()
        };
        let model = self.config.read().tts_model.clone();
        let url = self.model_url(&model, "generateContent");
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice_name } }
                }
            }
        });

        debug!("tts request voice={} chars={}", voice_name, text.chars().count());
        let resp = self.authorize(self.client.post(&url)).json(&body).send().await?;
        check_status(resp.status(), "tts")?;

        let raw = resp.bytes().await?;
        let parsed: GenerateResponse = serde_json::from_slice(&raw)?;
        let inline = parsed
            .first_inline_data()
            .ok_or_else(|| GenerationError::GenerationFailure("no audio in tts response".into()))?;

        let pcm = BASE64.decode(inline.data.trim().as_bytes())?;
        if pcm.is_empty() {
            return Err(GenerationError::GenerationFailure("tts returned empty audio".into()));
        }
        let sample_rate = sample_rate_from_mime(&inline.mime_type)?;
        debug!("tts response bytes={} rate={}", pcm.len(), sample_rate);

        Ok(RawAudio {
            pcm: Bytes::from(pcm),
            sample_rate,
        })
    }
}

#[async_trait]
impl InsightStreamer for HttpGenerator {
    async fn stream_insight(&self, prompt: &str) -> Result<ChunkStream, GenerationError> {
        let model = self.config.read().text_model.clone();
        let url = format!("{}?alt=sse", self.model_url(&model, "streamGenerateContent"));
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let resp = self.authorize(self.client.post(&url)).json(&body).send().await?;
        check_status(resp.status(), "insight stream")?;

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(GenerationError::from))
            .boxed())
    }
}

#[async_trait]
impl PoemSource for HttpGenerator {
    async fn fetch_poem(&self, filter: &PoemFilter) -> Result<PoemRecord, GenerationError> {
        let url = self.config.read().poems_url.clone();
        if url.is_empty() {
            return Err(GenerationError::GenerationFailure(
                "no poem endpoint configured".into(),
            ));
        }

        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(poet) = &filter.poet {
            query.push(("poet", poet.as_str()));
        }
        if let Some(tag) = &filter.tag {
            query.push(("tag", tag.as_str()));
        }

        let resp = self
            .authorize(self.client.get(&url))
            .query(&query)
            .send()
            .await?;
        check_status(resp.status(), "poem fetch")?;

        let raw = resp.bytes().await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
