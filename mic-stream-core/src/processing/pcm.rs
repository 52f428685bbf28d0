use crate::models::audio_models::{AudioFormat, AudioLevels};

/// Pure-math conversion from device float samples to the stream's PCM format.
///
/// Device backends often deliver interleaved f32 at the hardware's own rate
/// and channel layout. `PcmConverter` adapts the channel count, resamples with
/// linear interpolation, and quantizes to little-endian integer PCM.
#[derive(Debug, Clone)]
pub struct PcmConverter {
    pub target: AudioFormat,
}

impl PcmConverter {
    pub fn new(target: AudioFormat) -> Self {
        Self { target }
    }

    /// Convert interleaved f32 samples at `source_rate` with `source_channels`
    /// into PCM bytes in the target format.
    pub fn convert(&self, samples: &[f32], source_rate: f64, source_channels: u16) -> Vec<u8> {
        let adapted = adapt_channels(
            samples,
            usize::from(source_channels),
            usize::from(self.target.channels),
        );
        let resampled = resample(
            &adapted,
            usize::from(self.target.channels),
            source_rate,
            f64::from(self.target.sample_rate),
        );
        encode_f32(&resampled, self.target.bits_per_sample)
    }
}

/// Quantize f32 samples `[-1.0, 1.0]` to little-endian PCM of `bits_per_sample`.
///
/// Clamps out-of-range values. 8-bit output is unsigned with a 128 offset.
pub fn encode_f32(samples: &[f32], bits_per_sample: u16) -> Vec<u8> {
    let bytes_per_sample = usize::from(bits_per_sample / 8);
    let mut data = Vec::with_capacity(samples.len() * bytes_per_sample);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        match bits_per_sample {
            8 => data.push(((clamped * i8::MAX as f32) as i16 + 128) as u8),
            16 => data.extend_from_slice(&((clamped * i16::MAX as f32) as i16).to_le_bytes()),
            24 => {
                let value = (f64::from(clamped) * 8_388_607.0) as i32;
                data.extend_from_slice(&value.to_le_bytes()[..3]);
            }
            32 => {
                let value = (f64::from(clamped) * f64::from(i32::MAX)) as i32;
                data.extend_from_slice(&value.to_le_bytes());
            }
            _ => {}
        }
    }
    data
}

/// Decode little-endian PCM into signed integer sample values.
///
/// 8-bit samples are re-centred to `-128..=127`. A trailing partial sample
/// is ignored.
pub fn decode_samples(bytes: &[u8], bits_per_sample: u16) -> Vec<i32> {
    match bits_per_sample {
        8 => bytes.iter().map(|&b| i32::from(b) - 128).collect(),
        16 => bytes
            .chunks_exact(2)
            .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        24 => bytes
            .chunks_exact(3)
            .map(|c| i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8)
            .collect(),
        32 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        _ => Vec::new(),
    }
}

/// Inverse of [`decode_samples`]: signed sample values to little-endian PCM.
pub fn encode_samples(samples: &[i32], bits_per_sample: u16) -> Vec<u8> {
    let bytes_per_sample = usize::from(bits_per_sample / 8);
    let mut data = Vec::with_capacity(samples.len() * bytes_per_sample);
    for &sample in samples {
        match bits_per_sample {
            8 => data.push((sample + 128) as u8),
            16 => data.extend_from_slice(&(sample as i16).to_le_bytes()),
            24 => data.extend_from_slice(&sample.to_le_bytes()[..3]),
            32 => data.extend_from_slice(&sample.to_le_bytes()),
            _ => {}
        }
    }
    data
}

/// RMS and peak level of PCM bytes, normalized to 0.0–1.0.
pub fn levels(bytes: &[u8], bits_per_sample: u16) -> AudioLevels {
    let full_scale = match bits_per_sample {
        8 => 128.0,
        16 => 32_768.0,
        24 => 8_388_608.0,
        32 => 2_147_483_648.0,
        _ => return AudioLevels::default(),
    };

    let samples = decode_samples(bytes, bits_per_sample);
    if samples.is_empty() {
        return AudioLevels::default();
    }

    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f64;
    for &sample in &samples {
        let normalized = f64::from(sample) / full_scale;
        sum_sq += normalized * normalized;
        peak = peak.max(normalized.abs());
    }

    AudioLevels {
        rms: (sum_sq / samples.len() as f64).sqrt() as f32,
        peak: peak as f32,
    }
}

/// Convert between interleaved channel layouts.
///
/// Downmixing averages each frame; upmixing copies the mono sample into
/// every output channel.
pub fn adapt_channels(samples: &[f32], source_channels: usize, target_channels: usize) -> Vec<f32> {
    if source_channels == target_channels || source_channels == 0 || target_channels == 0 {
        return samples.to_vec();
    }

    let mono = downmix_to_mono(samples, source_channels);
    if target_channels == 1 {
        return mono;
    }

    let mut output = Vec::with_capacity(mono.len() * target_channels);
    for sample in mono {
        output.extend(std::iter::repeat(sample).take(target_channels));
    }
    output
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let scale = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Linear interpolation resampling of interleaved audio.
///
/// Returns input unchanged if rates match.
pub fn resample(samples: &[f32], channels: usize, source_rate: f64, target_rate: f64) -> Vec<f32> {
    if (source_rate - target_rate).abs() < 0.01 || samples.is_empty() || channels == 0 {
        return samples.to_vec();
    }

    let frame_count = samples.len() / channels;
    let ratio = target_rate / source_rate;
    let output_frames = (frame_count as f64 * ratio) as usize;
    if output_frames == 0 {
        return Vec::new();
    }

    let mut output = vec![0.0f32; output_frames * channels];
    for i in 0..output_frames {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            if index + 1 < frame_count {
                output[i * channels + ch] = samples[index * channels + ch] * (1.0 - fraction)
                    + samples[(index + 1) * channels + ch] * fraction;
            } else if index < frame_count {
                output[i * channels + ch] = samples[index * channels + ch];
            }
        }
    }
    output
}
