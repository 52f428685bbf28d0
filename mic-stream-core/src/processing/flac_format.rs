//! FLAC framing for compressed audio frames.
//!
//! Each frame becomes its own complete FLAC stream (`fLaC` marker,
//! STREAMINFO, audio frames), so a receiver can decode any frame without
//! having seen the ones before it.

use std::io::Cursor;

use flacenc::component::BitRepr;
use flacenc::error::Verify;

use crate::models::audio_models::AudioFormat;
use crate::models::error::StreamError;
use crate::processing::pcm;

/// Bit depths FLAC frames can carry.
pub const FLAC_BITS_PER_SAMPLE: [u16; 3] = [8, 16, 24];

/// Compress `pcm` into a standalone FLAC stream.
pub fn flac_stream(format: &AudioFormat, pcm: &[u8]) -> Result<Vec<u8>, StreamError> {
    if !FLAC_BITS_PER_SAMPLE.contains(&format.bits_per_sample) {
        return Err(StreamError::EncodeError(format!(
            "FLAC frames cannot carry {}-bit samples",
            format.bits_per_sample
        )));
    }

    let samples = pcm::decode_samples(pcm, format.bits_per_sample);
    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|(_, e)| StreamError::EncodeError(format!("FLAC encoder config: {}", e)))?;
    let source = flacenc::source::MemSource::from_samples(
        &samples,
        usize::from(format.channels),
        usize::from(format.bits_per_sample),
        format.sample_rate as usize,
    );
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| StreamError::EncodeError(format!("FLAC encode failed: {:?}", e)))?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|_| StreamError::EncodeError("FLAC bitstream write failed".into()))?;
    Ok(sink.as_slice().to_vec())
}

/// Decode a FLAC stream back to little-endian PCM in the stream's own format.
pub fn decode_flac_stream(bytes: &[u8]) -> Result<(AudioFormat, Vec<u8>), StreamError> {
    let invalid = |e: claxon::Error| StreamError::EncodeError(format!("invalid FLAC payload: {}", e));

    let mut reader = claxon::FlacReader::new(Cursor::new(bytes)).map_err(invalid)?;
    let info = reader.streaminfo();
    let format = AudioFormat::pcm(info.sample_rate, info.bits_per_sample as u16, info.channels as u16);

    let samples = reader
        .samples()
        .collect::<Result<Vec<i32>, _>>()
        .map_err(invalid)?;
    Ok((format, pcm::encode_samples(&samples, format.bits_per_sample)))
}
