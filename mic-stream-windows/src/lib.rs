//! # mic-stream-windows
//!
//! Windows WASAPI backend for mic-stream.
//!
//! Provides:
//! - `WasapiInputDevice`: shared-mode microphone capture implementing `InputDevice`
//! - `list_input_devices`: active capture endpoints via the MMDevice API
//! - `check_input_access`: checks the Windows microphone privacy setting
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use mic_stream_core::{ChannelSink, StreamSession};
//! use mic_stream_windows::WasapiInputDevice;
//!
//! let (sink, events) = ChannelSink::bounded(64);
//! let mut session = StreamSession::new(WasapiInputDevice::default_device(), Arc::new(sink));
//! session.configure(&serde_json::json!({
//!     "sampleRate": 16000, "bitsPerSample": 16, "channels": 1
//! }))?;
//! session.start()?;
//! ```

#[cfg(target_os = "windows")]
pub mod endpoints;
#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
pub mod wasapi_input;

#[cfg(target_os = "windows")]
pub use endpoints::{check_input_access, list_input_devices};
#[cfg(target_os = "windows")]
pub use error::WasapiError;
#[cfg(target_os = "windows")]
pub use wasapi_input::WasapiInputDevice;
