// Generator capabilities: the external synthesis and lookup services the engine depends on.

pub mod http;
pub mod prompt;
pub mod traits;

pub use http::HttpGenerator;
pub use traits::{ChunkStream, InsightStreamer, PoemSource, RawAudio, SpeechSynthesizer};
