// Audio container handling for synthesized narration.

pub mod wav;

pub use wav::{decode_base64_pcm, encode_wav, is_wav, pcm16_from_le_bytes, sample_rate_from_mime, WAV_HEADER_LEN};
