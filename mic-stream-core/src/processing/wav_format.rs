//! WAV framing for self-contained audio frames.
//!
//! Generates standard 44-byte RIFF WAV headers and wraps a buffer's PCM into
//! a complete in-memory WAV file.

use crate::models::audio_models::AudioFormat;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Generate a 44-byte WAV RIFF header.
///
/// Format: PCM (format code 1), little-endian.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bits / 8
/// [32-33]  block_align = channels * bits / 8
/// [34-35]  bits_per_sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let block_align = format.block_align() as u16;
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// A complete WAV file containing exactly `pcm`.
pub fn wav_file(format: &AudioFormat, pcm: &[u8]) -> Vec<u8> {
    let mut file = Vec::with_capacity(WAV_HEADER_SIZE + pcm.len());
    file.extend_from_slice(&generate_wav_header(format, pcm.len() as u32));
    file.extend_from_slice(pcm);
    file
}
