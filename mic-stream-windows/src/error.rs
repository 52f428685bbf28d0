//! Errors raised by the WASAPI backend before they reach the core.

use mic_stream_core::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WasapiError {
    #[error("{call} failed: {source}")]
    Com {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("no capture endpoint available")]
    NoEndpoint,

    #[error("microphone access denied")]
    AccessDenied,

    #[error("unsupported mix format: {0}")]
    UnsupportedMixFormat(String),

    #[error("capture thread: {0}")]
    Thread(String),
}

impl WasapiError {
    /// Wrap a failed COM call, naming the call for the log.
    pub(crate) fn com(call: &'static str) -> impl FnOnce(windows::core::Error) -> Self {
        move |source| Self::Com { call, source }
    }
}

impl From<WasapiError> for StreamError {
    fn from(err: WasapiError) -> Self {
        match err {
            WasapiError::NoEndpoint | WasapiError::AccessDenied => StreamError::DeviceUnavailable,
            other => StreamError::DeviceError(other.to_string()),
        }
    }
}
