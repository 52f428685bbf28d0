use serde::Serialize;

use super::error::StreamError;
use super::frame::{EncodedData, FrameEncoding};
use super::state::SessionState;

pub const AUDIO_DATA_EVENT: &str = "audioData";
pub const WARNING_EVENT: &str = "audioWarning";
pub const STATE_EVENT: &str = "audioState";
pub const ERROR_EVENT: &str = "audioError";

/// Everything the pipeline can emit to the host sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    AudioData(AudioDataPayload),
    Warning(WarningPayload),
    State(StatePayload),
    Error(ErrorPayload),
}

impl EventPayload {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::AudioData(_) => AUDIO_DATA_EVENT,
            Self::Warning(_) => WARNING_EVENT,
            Self::State(_) => STATE_EVENT,
            Self::Error(_) => ERROR_EVENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDataPayload {
    pub encoded_data: EncodedData,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub encoding: FrameEncoding,
}

/// A recoverable condition; capture continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl WarningPayload {
    pub fn from_error(error: &StreamError, sequence: Option<u64>) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
            sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl StatePayload {
    pub fn new(state: &SessionState, session_id: Option<&str>) -> Self {
        Self {
            state: state.name(),
            session_id: session_id.map(str::to_string),
        }
    }
}

/// A fatal session error; the session stays in `Error` until reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ErrorPayload {
    pub fn new(error: &StreamError, session_id: Option<&str>) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
            session_id: session_id.map(str::to_string),
        }
    }
}
