use std::time::Duration;

use serde::{Deserialize, Serialize};

/// PCM layout of captured audio.
///
/// Samples are little-endian; 8-bit samples are unsigned (WAV convention),
/// wider samples are signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub interleaved: bool,
}

impl AudioFormat {
    /// Interleaved little-endian PCM.
    pub fn pcm(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
            interleaved: true,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Bytes per frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Number of whole frames contained in `bytes`.
    pub fn frames_in(&self, bytes: usize) -> usize {
        match self.block_align() {
            0 => 0,
            align => bytes / align,
        }
    }

    /// Playback duration of `bytes` of audio in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.frames_in(bytes) as u128;
        let nanos = frames * 1_000_000_000 / u128::from(self.sample_rate);
        Duration::from_nanos(nanos as u64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm(44100, 16, 1)
    }
}

/// Real-time audio level metering (RMS and peak, 0.0–1.0).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AudioLevels {
    pub rms: f32,
    pub peak: f32,
}

/// An input device available for capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Per-session counters for debugging capture sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDiagnostics {
    pub fills_received: u64,
    pub frames_encoded: u64,
    pub frames_published: u64,
    pub underruns: u64,
    pub dropped_bytes: u64,
    pub encode_failures: u64,
    pub frames_dropped_backpressure: u64,
    pub stale_notifications: u64,
    pub sink_failures: u64,
    pub paused_fills: u64,
    /// Sequenced frames the callback could not hand to the worker.
    pub frames_dropped_handoff: u64,
    /// Underrun warnings and fault notices the callback could not hand off.
    pub notices_dropped: u64,
}
