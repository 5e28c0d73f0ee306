// Incremental assembly of a streamed text response into progressively longer partials.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::GenerationError;

/// Per-stream progress state. Lives exactly as long as its assembler.
#[derive(Debug)]
pub struct StreamAccumulator {
    accumulated: String,
    chunk_count: usize,
    first_chunk_latency: Option<Duration>,
    started: Instant,
}

impl StreamAccumulator {
    fn new() -> Self {
        Self {
            accumulated: String::new(),
            chunk_count: 0,
            first_chunk_latency: None,
            started: Instant::now(),
        }
    }

    fn push(&mut self, delta: &str) {
        if self.first_chunk_latency.is_none() {
            let latency = self.started.elapsed();
            self.first_chunk_latency = Some(latency);
            info!("stream first delta after {} ms", latency.as_millis());
        }
        self.accumulated.push_str(delta);
        self.chunk_count += 1;
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Number of deltas received so far.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn first_chunk_latency(&self) -> Option<Duration> {
        self.first_chunk_latency
    }
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl StreamEvent {
    fn delta(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

/// Turns a sequence of raw response chunks into accumulated text.
///
/// Chunks carry server-sent-event lines (`data: {json}`); a line may span
/// several chunks. Each delta produces one partial value, and every partial
/// is a prefix of the terminal value. Lines that do not parse are skipped.
/// The assembler is single-use: once the chunk source ends it yields nothing.
pub struct InsightAssembler<S> {
    chunks: S,
    acc: StreamAccumulator,
    line_buf: Vec<u8>,
    ready: VecDeque<String>,
    skipped_lines: usize,
    finished: bool,
}

impl<S> InsightAssembler<S>
where
    S: Stream<Item = Result<Bytes, GenerationError>> + Unpin,
{
    pub fn new(chunks: S) -> Self {
        Self {
            chunks,
            acc: StreamAccumulator::new(),
            line_buf: Vec::new(),
            ready: VecDeque::new(),
            skipped_lines: 0,
            finished: false,
        }
    }

    /// Wait for the next delta and return the text accumulated so far.
    /// `None` once the underlying stream has ended.
    pub async fn next_partial(&mut self) -> Option<Result<String, GenerationError>> {
        loop {
            if let Some(delta) = self.ready.pop_front() {
                self.acc.push(&delta);
                return Some(Ok(self.acc.accumulated.clone()));
            }
            if self.finished {
                return None;
            }
            match self.chunks.next().await {
                Some(Ok(chunk)) => self.absorb(&chunk),
                Some(Err(e)) => {
                    debug!(
                        "stream aborted after {} deltas: {}",
                        self.acc.chunk_count, e
                    );
                    self.finished = true;
                    self.line_buf.clear();
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    let tail = std::mem::take(&mut self.line_buf);
                    self.parse_line(&tail);
                }
            }
        }
    }

    /// Drain the stream and return the terminal value.
    pub async fn finish(mut self) -> Result<String, GenerationError> {
        while let Some(partial) = self.next_partial().await {
            partial?;
        }
        self.log_summary();
        Ok(self.acc.accumulated)
    }

    /// Drain the stream, offering every partial to `progress`.
    ///
    /// Assembly never waits on the receiver: when the channel is full the
    /// partial is dropped (a later one supersedes it), and once the receiver
    /// is gone nothing more is offered.
    pub async fn forward_to(mut self, progress: &mpsc::Sender<String>) -> Result<String, GenerationError> {
        let mut dropped = 0usize;
        let mut open = true;
        while let Some(partial) = self.next_partial().await {
            let partial = partial?;
            if !open {
                continue;
            }
            match progress.try_send(partial) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped += 1,
                Err(TrySendError::Closed(_)) => {
                    debug!("stream progress receiver dropped, continuing");
                    open = false;
                }
            }
        }
        if dropped > 0 {
            debug!("progress channel full, {} partials dropped", dropped);
        }
        self.log_summary();
        Ok(self.acc.accumulated)
    }

    /// Drain the stream, replacing the value in `feed` with every partial.
    /// Subscribers see the latest prefix; assembly never waits on them.
    pub async fn publish_to(mut self, feed: &watch::Sender<String>) -> Result<String, GenerationError> {
        while let Some(partial) = self.next_partial().await {
            feed.send_replace(partial?);
        }
        self.log_summary();
        Ok(self.acc.accumulated)
    }

    /// Expose the partials as a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, GenerationError>> {
        futures_util::stream::unfold(self, |mut asm| async move {
            asm.next_partial().await.map(|item| (item, asm))
        })
    }

    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.acc
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    fn absorb(&mut self, chunk: &[u8]) {
        self.line_buf.extend_from_slice(chunk);
        while let Some(pos) = self.line_buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            self.parse_line(&line[..pos]);
        }
    }

    fn parse_line(&mut self, raw: &[u8]) {
        let Ok(line) = std::str::from_utf8(raw) else {
            self.skip("invalid utf-8");
            return;
        };
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(':') {
            return;
        }
        // Only `data:` fields carry deltas; `event:`, `id:`, `retry:` are ignored.
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return;
        }
        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => {
                let delta = event.delta();
                if !delta.is_empty() {
                    self.ready.push_back(delta);
                }
            }
            Err(e) => self.skip(&e.to_string()),
        }
    }

    fn skip(&mut self, reason: &str) {
        self.skipped_lines += 1;
        debug!("skipping malformed stream line: {}", reason);
    }

    fn log_summary(&self) {
        debug!(
            "stream finished deltas={} chars={} skipped={} first_delta_ms={:?}",
            self.acc.chunk_count,
            self.acc.accumulated.chars().count(),
            self.skipped_lines,
            self.acc.first_chunk_latency.map(|d| d.as_millis())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn event(text: &str) -> Bytes {
        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        });
        Bytes::from(format!("data: {}\r\n\r\n", body))
    }

    fn chunks(items: Vec<Result<Bytes, GenerationError>>) -> impl Stream<Item = Result<Bytes, GenerationError>> + Unpin {
        stream::iter(items)
    }

    #[tokio::test]
    async fn test_two_deltas_two_partials() {
        let mut asm = InsightAssembler::new(chunks(vec![Ok(event("Hello ")), Ok(event("World"))]));

        assert_eq!(asm.next_partial().await.unwrap().unwrap(), "Hello ");
        assert_eq!(asm.next_partial().await.unwrap().unwrap(), "Hello World");
        assert!(asm.next_partial().await.is_none());
        assert!(asm.next_partial().await.is_none());
        assert_eq!(asm.accumulator().chunk_count(), 2);
        assert!(asm.accumulator().first_chunk_latency().is_some());
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let asm = InsightAssembler::new(chunks(vec![
            Ok(event("Hello ")),
            Ok(Bytes::from_static(b"data: {\"candidates\": [oops\n\n")),
            Ok(event("World")),
        ]));
        let partials: Vec<_> = asm.into_stream().collect().await;
        let partials: Vec<String> = partials.into_iter().map(Result::unwrap).collect();
        assert_eq!(partials, vec!["Hello ".to_string(), "Hello World".to_string()]);
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let whole = event("مرحبا");
        // Split inside the first multi-byte character and inside the line ending.
        let mid_char = whole.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let (a, b) = whole.split_at(mid_char);
        let (b, c) = b.split_at(b.len() - 3);
        let asm = InsightAssembler::new(chunks(vec![
            Ok(Bytes::copy_from_slice(a)),
            Ok(Bytes::copy_from_slice(b)),
            Ok(Bytes::copy_from_slice(c)),
        ]));
        assert_eq!(asm.finish().await.unwrap(), "مرحبا");
    }

    #[tokio::test]
    async fn test_multiple_events_in_one_chunk_and_unterminated_tail() {
        let mut joined = event("a").to_vec();
        joined.extend_from_slice(&event("b"));
        joined.extend_from_slice(b": keep-alive\nevent: message\ndata: [DONE]\n");
        joined.extend_from_slice(br#"data: {"candidates":[{"content":{"parts":[{"text":"c"}]}}]}"#);

        let mut asm = InsightAssembler::new(chunks(vec![Ok(Bytes::from(joined))]));
        let mut seen = Vec::new();
        while let Some(p) = asm.next_partial().await {
            seen.push(p.unwrap());
        }
        assert_eq!(seen, vec!["a", "ab", "abc"]);
        assert_eq!(asm.skipped_lines(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let mut asm = InsightAssembler::new(chunks(vec![
            Ok(event("partial")),
            Err(GenerationError::Network("reset".into())),
            Ok(event("never")),
        ]));
        assert_eq!(asm.next_partial().await.unwrap().unwrap(), "partial");
        assert!(matches!(
            asm.next_partial().await,
            Some(Err(GenerationError::Network(_)))
        ));
        assert!(asm.next_partial().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_to_never_waits_on_full_channel() {
        let events: Vec<_> = (0..20).map(|i| Ok(event(&format!("{} ", i)))).collect();
        let (tx, mut rx) = mpsc::channel(4);
        let asm = InsightAssembler::new(chunks(events));

        // Nobody drains the channel while assembly runs.
        let text = asm.forward_to(&tx).await.unwrap();
        assert!(text.starts_with("0 1 2 "));
        assert!(text.ends_with("19 "));

        drop(tx);
        let mut received = Vec::new();
        while let Some(p) = rx.recv().await {
            received.push(p);
        }
        assert_eq!(received.len(), 4);
        assert!(received.iter().all(|p| text.starts_with(p.as_str())));
    }

    #[tokio::test]
    async fn test_publish_to_keeps_latest_prefix() {
        let (feed, rx) = watch::channel(String::new());
        let asm = InsightAssembler::new(chunks(vec![Ok(event("x")), Ok(event("y"))]));
        assert_eq!(asm.publish_to(&feed).await.unwrap(), "xy");
        assert_eq!(*rx.borrow(), "xy");
    }

    #[tokio::test]
    async fn test_forward_to_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let asm = InsightAssembler::new(chunks(vec![Ok(event("x")), Ok(event("y"))]));
        assert_eq!(asm.forward_to(&tx).await.unwrap(), "xy");
    }
}
