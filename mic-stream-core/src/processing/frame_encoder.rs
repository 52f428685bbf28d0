use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::models::error::StreamError;
use crate::models::frame::{EncodedData, EncodedFrame, FrameEncoding};
use crate::processing::buffer_pool::AudioBuffer;
use crate::processing::flac_format;
use crate::processing::pcm;
use crate::processing::wav_format::{self, WAV_HEADER_SIZE};

/// Per-fill metadata captured in the device callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMeta {
    pub sequence: u64,
    pub timestamp: Duration,
    pub captured_at: DateTime<Utc>,
}

/// Turns a filled buffer into a transport-safe `EncodedFrame`.
///
/// Stateless: the output depends only on the buffer contents, its format,
/// and the metadata passed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder {
    encoding: FrameEncoding,
}

impl FrameEncoder {
    pub fn new(encoding: FrameEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> FrameEncoding {
        self.encoding
    }

    /// Encode the filled portion of `buffer`.
    ///
    /// Fails with `EncodeError` for an empty buffer or one that does not hold
    /// a whole number of frames.
    pub fn encode(&self, buffer: &AudioBuffer, meta: FrameMeta) -> Result<EncodedFrame, StreamError> {
        let format = *buffer.format();
        let pcm = buffer.as_bytes();

        if pcm.is_empty() {
            return Err(StreamError::EncodeError(format!(
                "frame {} is empty",
                meta.sequence
            )));
        }
        let block_align = format.block_align();
        if block_align == 0 || pcm.len() % block_align != 0 {
            return Err(StreamError::EncodeError(format!(
                "frame {} holds {} bytes, not a multiple of the {}-byte frame size",
                meta.sequence,
                pcm.len(),
                block_align
            )));
        }

        let data = match self.encoding {
            FrameEncoding::Base64 => EncodedData::Text(STANDARD.encode(pcm)),
            FrameEncoding::Pcm => EncodedData::Binary(pcm.to_vec()),
            FrameEncoding::Wav => EncodedData::Text(STANDARD.encode(wav_format::wav_file(&format, pcm))),
            FrameEncoding::Flac => EncodedData::Text(STANDARD.encode(flac_format::flac_stream(&format, pcm)?)),
        };

        Ok(EncodedFrame {
            data,
            encoding: self.encoding,
            sequence: meta.sequence,
            timestamp: meta.timestamp,
            captured_at: meta.captured_at,
            format,
            levels: pcm::levels(pcm, format.bits_per_sample),
            pcm_len: pcm.len(),
        })
    }

    /// Recover the raw PCM carried by an encoded payload.
    pub fn decode(data: &EncodedData, encoding: FrameEncoding) -> Result<Vec<u8>, StreamError> {
        let bytes = match (encoding, data) {
            (FrameEncoding::Pcm, EncodedData::Binary(bytes)) => return Ok(bytes.clone()),
            (
                FrameEncoding::Base64 | FrameEncoding::Wav | FrameEncoding::Flac,
                EncodedData::Text(text),
            ) => STANDARD
                .decode(text)
                .map_err(|e| StreamError::EncodeError(format!("invalid base64 payload: {}", e)))?,
            _ => {
                return Err(StreamError::EncodeError(format!(
                    "payload kind does not match {:?} encoding",
                    encoding
                )))
            }
        };

        if encoding == FrameEncoding::Flac {
            return flac_format::decode_flac_stream(&bytes).map(|(_, pcm)| pcm);
        }
        if encoding == FrameEncoding::Wav {
            if bytes.len() < WAV_HEADER_SIZE || &bytes[0..4] != b"RIFF" {
                return Err(StreamError::EncodeError("payload is not a WAV file".into()));
            }
            return Ok(bytes[WAV_HEADER_SIZE..].to_vec());
        }
        Ok(bytes)
    }
}
