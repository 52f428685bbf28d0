use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audio_models::{AudioFormat, AudioLevels};
use super::events::AudioDataPayload;

/// Payload encoding applied to every published frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameEncoding {
    /// Base64 (standard alphabet, padded) of the raw PCM.
    #[default]
    Base64,
    /// Raw PCM bytes.
    Pcm,
    /// Base64 of a self-contained WAV file holding just this frame.
    Wav,
    /// Base64 of a standalone FLAC stream holding just this frame.
    Flac,
}

/// Encoded audio as handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EncodedData {
    Text(String),
    Binary(Vec<u8>),
}

impl EncodedData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Bytes as transmitted (UTF-8 bytes for text payloads).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One completed hardware buffer, encoded and ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub data: EncodedData,
    pub encoding: FrameEncoding,
    pub sequence: u64,
    /// Capture timestamp reported by the device, relative to stream start.
    pub timestamp: Duration,
    pub captured_at: DateTime<Utc>,
    pub format: AudioFormat,
    pub levels: AudioLevels,
    /// Length of the raw PCM this frame was encoded from.
    pub pcm_len: usize,
}

impl EncodedFrame {
    /// Sink payload for the `audioData` event.
    pub fn payload(&self) -> AudioDataPayload {
        AudioDataPayload {
            encoded_data: self.data.clone(),
            sample_rate: self.format.sample_rate,
            bits_per_sample: self.format.bits_per_sample,
            channels: self.format.channels,
            sequence: self.sequence,
            timestamp_ms: self.timestamp.as_millis() as u64,
            encoding: self.encoding,
        }
    }
}
