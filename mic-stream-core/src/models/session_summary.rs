use chrono::{DateTime, Utc};
use serde::Serialize;

use super::audio_models::{AudioFormat, StreamDiagnostics};

/// Result returned when a capture session stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub format: AudioFormat,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    /// Seconds of audio in the frames that reached the sink.
    pub duration_secs: f64,
    pub frames_published: u64,
    /// SHA-256 (hex) over the encoded payload of every delivered frame, in order.
    pub checksum: String,
    pub diagnostics: StreamDiagnostics,
}
