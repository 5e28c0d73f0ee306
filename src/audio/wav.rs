// PCM16 WAV container encoding plus the decoding helpers for synthesizer output.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::config::{DEFAULT_SAMPLE_RATE, MAX_SAMPLE_RATE};
use crate::error::GenerationError;

/// Size of the canonical PCM WAV header.
pub const WAV_HEADER_LEN: usize = 44;

fn pcm16_mono(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn check_sample_rate(rate: u32) -> Result<u32, GenerationError> {
    if rate == 0 || rate > MAX_SAMPLE_RATE {
        return Err(GenerationError::Decode(format!(
            "sample rate {} outside 1..={}",
            rate, MAX_SAMPLE_RATE
        )));
    }
    Ok(rate)
}

/// Wrap mono 16-bit samples in a canonical 44-byte-header WAV container.
///
/// Output length is `44 + 2 * samples.len()`. Rates above
/// [`MAX_SAMPLE_RATE`] (or zero) and data that would not fit the 32-bit RIFF
/// size fields are rejected as [`GenerationError::Decode`].
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Bytes, GenerationError> {
    check_sample_rate(sample_rate)?;
    let data_len = samples
        .len()
        .checked_mul(2)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| n.checked_add(WAV_HEADER_LEN as u32).is_some())
        .ok_or_else(|| {
            GenerationError::Decode(format!("{} samples do not fit a WAV container", samples.len()))
        })?;

    let mut buffer = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);
    let mut writer = WavWriter::new(Cursor::new(&mut buffer), pcm16_mono(sample_rate))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(Bytes::from(buffer))
}

/// Interpret raw little-endian bytes as 16-bit samples.
pub fn pcm16_from_le_bytes(raw: &[u8]) -> Result<Vec<i16>, GenerationError> {
    if raw.len() % 2 != 0 {
        return Err(GenerationError::Decode(format!(
            "PCM16 payload has odd length {}",
            raw.len()
        )));
    }
    Ok(raw
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode a base64 PCM16 payload into samples.
pub fn decode_base64_pcm(encoded: &str) -> Result<Vec<i16>, GenerationError> {
    let raw = BASE64.decode(encoded.trim().as_bytes())?;
    pcm16_from_le_bytes(&raw)
}

/// Read the sample rate from a mime type such as `audio/L16;codec=pcm;rate=24000`.
///
/// No `rate=` parameter means [`DEFAULT_SAMPLE_RATE`]; a rate that does not
/// parse, is zero, or exceeds [`MAX_SAMPLE_RATE`] is a decode error.
pub fn sample_rate_from_mime(mime: &str) -> Result<u32, GenerationError> {
    let Some(value) = mime
        .split(';')
        .find_map(|param| param.trim().strip_prefix("rate="))
    else {
        return Ok(DEFAULT_SAMPLE_RATE);
    };
    let rate = value
        .trim()
        .parse::<u32>()
        .map_err(|e| GenerationError::Decode(format!("bad sample rate {:?} in {}: {}", value, mime, e)))?;
    check_sample_rate(rate)
}

/// Whether `data` already carries a RIFF/WAVE header.
pub fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}
