use serde::Deserialize;
use serde_json::Value;

use super::audio_models::AudioFormat;
use super::error::StreamError;
use super::frame::FrameEncoding;
use crate::processing::flac_format::FLAC_BITS_PER_SAMPLE;

pub const DEFAULT_BUFFER_SIZE: usize = 8192;
pub const DEFAULT_BUFFER_COUNT: usize = 3;
pub const DEFAULT_PUBLISH_QUEUE_DEPTH: usize = 32;

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
pub const MAX_BUFFER_SIZE: usize = 1 << 20;
pub const MAX_BUFFER_COUNT: usize = 16;

/// Configuration for a capture stream.
///
/// `buffer_size` is counted in frames (one sample per channel); the byte
/// capacity of every pooled buffer is `buffer_size * block_align`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfiguration {
    /// Capture sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Bit depth of captured PCM (default: 16). Valid values: 8, 16, 24, 32.
    pub bits_per_sample: u16,

    /// Number of captured channels (default: 1). Valid values: 1, 2.
    pub channels: u16,

    /// Frames per hardware buffer (default: 8192).
    pub buffer_size: usize,

    /// Number of pre-allocated hardware buffers (default: 3).
    pub buffer_count: usize,

    /// Payload encoding of published frames (default: base64).
    pub encoding: FrameEncoding,

    /// Frames the publisher holds while the sink is saturated (default: 32).
    pub publish_queue_depth: usize,
}

impl StreamConfiguration {
    /// Build a configuration from the host's option map.
    ///
    /// Unrecognized keys are ignored. `sampleRate`, `bitsPerSample` and
    /// `channels` are required; the remaining keys fall back to defaults.
    pub fn from_options(options: &Value) -> Result<Self, StreamError> {
        if !options.is_object() {
            return Err(StreamError::InvalidConfig(
                "options must be an object".into(),
            ));
        }

        let opts = StreamOptions::deserialize(options)
            .map_err(|e| StreamError::InvalidConfig(e.to_string()))?;

        let mut missing = Vec::new();
        if opts.sample_rate.is_none() {
            missing.push("sampleRate");
        }
        if opts.bits_per_sample.is_none() {
            missing.push("bitsPerSample");
        }
        if opts.channels.is_none() {
            missing.push("channels");
        }
        if !missing.is_empty() {
            return Err(StreamError::InvalidConfig(format!(
                "missing required option(s): {}",
                missing.join(", ")
            )));
        }

        let defaults = Self::default();
        let config = Self {
            sample_rate: opts.sample_rate.unwrap_or(defaults.sample_rate),
            bits_per_sample: opts.bits_per_sample.unwrap_or(defaults.bits_per_sample),
            channels: opts.channels.unwrap_or(defaults.channels),
            buffer_size: opts.buffer_size.unwrap_or(defaults.buffer_size),
            buffer_count: opts.buffer_count.unwrap_or(defaults.buffer_count),
            encoding: opts.encoding.unwrap_or(defaults.encoding),
            publish_queue_depth: opts
                .publish_queue_depth
                .unwrap_or(defaults.publish_queue_depth),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(StreamError::InvalidConfig(format!(
                "sample rate {} outside {}..={} Hz",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if ![8, 16, 24, 32].contains(&self.bits_per_sample) {
            return Err(StreamError::InvalidConfig(format!(
                "unsupported bits per sample: {}",
                self.bits_per_sample
            )));
        }
        if self.encoding == FrameEncoding::Flac && !FLAC_BITS_PER_SAMPLE.contains(&self.bits_per_sample) {
            return Err(StreamError::InvalidConfig(format!(
                "flac encoding cannot carry {}-bit samples",
                self.bits_per_sample
            )));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(StreamError::InvalidConfig(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(StreamError::InvalidConfig(format!(
                "buffer size {} outside 1..={} frames",
                self.buffer_size, MAX_BUFFER_SIZE
            )));
        }
        if self.buffer_count == 0 || self.buffer_count > MAX_BUFFER_COUNT {
            return Err(StreamError::InvalidConfig(format!(
                "buffer count {} outside 1..={}",
                self.buffer_count, MAX_BUFFER_COUNT
            )));
        }
        if self.publish_queue_depth == 0 {
            return Err(StreamError::InvalidConfig(
                "publish queue depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::pcm(self.sample_rate, self.bits_per_sample, self.channels)
    }

    /// Byte capacity of each pooled buffer.
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_size * self.format().block_align()
    }
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bits_per_sample: 16,
            channels: 1,
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_count: DEFAULT_BUFFER_COUNT,
            encoding: FrameEncoding::default(),
            publish_queue_depth: DEFAULT_PUBLISH_QUEUE_DEPTH,
        }
    }
}

/// Recognized keys of the host option map.
///
/// `bitsPerChannel` and `channelsPerFrame` are accepted for hosts that still
/// send the older key names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamOptions {
    sample_rate: Option<u32>,
    #[serde(alias = "bitsPerChannel")]
    bits_per_sample: Option<u16>,
    #[serde(alias = "channelsPerFrame")]
    channels: Option<u16>,
    buffer_size: Option<usize>,
    buffer_count: Option<usize>,
    encoding: Option<FrameEncoding>,
    publish_queue_depth: Option<usize>,
}
