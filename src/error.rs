// Error taxonomy shared by the coordinator, generators and callers.

use thiserror::Error;

use crate::model::ContentClass;

/// Failure of an `ensure_generated` call or of a generator capability.
///
/// Cloneable because a single generation outcome is handed to every caller
/// waiting on the same key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The generator call failed to complete (transport, HTTP status).
    #[error("network error: {0}")]
    Network(String),

    /// The generator completed but returned nothing usable.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// An encoded payload (base64, PCM) was malformed.
    #[error("decode error: {0}")]
    Decode(String),

    /// Waiting on an in-flight generation exceeded its bound.
    #[error("timed out waiting for {class} generation of {key}")]
    Timeout { class: ContentClass, key: String },
}

impl GenerationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Timeout { .. })
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Network(e.to_string())
    }
}

impl From<base64::DecodeError> for GenerationError {
    fn from(e: base64::DecodeError) -> Self {
        GenerationError::Decode(format!("invalid base64: {}", e))
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(e: serde_json::Error) -> Self {
        GenerationError::GenerationFailure(format!("unexpected response body: {}", e))
    }
}

impl From<hound::Error> for GenerationError {
    fn from(e: hound::Error) -> Self {
        GenerationError::Decode(format!("wav encoding failed: {}", e))
    }
}
