use thiserror::Error;

/// Errors that can occur while configuring or running a capture stream.
///
/// Per-buffer conditions (`PoolExhausted`, `BufferUnderrun`, `EncodeError`,
/// `PublishBackpressure`) drop a single frame and never end the session.
/// `DeviceError` is fatal for the session and requires `reset()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("a capture session is already active")]
    SessionAlreadyActive,

    #[error("buffer pool exhausted")]
    PoolExhausted,

    #[error("buffer underrun: {dropped_bytes} bytes of captured audio dropped")]
    BufferUnderrun { dropped_bytes: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("encoding failed: {0}")]
    EncodeError(String),

    #[error("publish backpressure: dropped frame {dropped_sequence}")]
    PublishBackpressure { dropped_sequence: u64 },

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("device not available")]
    DeviceUnavailable,
}

impl StreamError {
    /// Stable machine-readable identifier used in sink payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::SessionAlreadyActive => "session_already_active",
            Self::PoolExhausted => "pool_exhausted",
            Self::BufferUnderrun { .. } => "buffer_underrun",
            Self::InvalidState(_) => "invalid_state",
            Self::EncodeError(_) => "encode_error",
            Self::PublishBackpressure { .. } => "publish_backpressure",
            Self::DeviceError(_) => "device_error",
            Self::DeviceUnavailable => "device_unavailable",
        }
    }

    /// Whether capture continues after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted
                | Self::BufferUnderrun { .. }
                | Self::EncodeError(_)
                | Self::PublishBackpressure { .. }
        )
    }
}

/// Failure reported by an `EventSink` when handed an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmitError {
    /// The sink cannot take the event right now; the publisher retries later.
    #[error("sink is busy")]
    Busy,

    #[error("sink is closed")]
    Closed,

    #[error("emit failed: {0}")]
    Failed(String),
}
