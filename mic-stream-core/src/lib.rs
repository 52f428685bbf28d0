//! # mic-stream-core
//!
//! Platform-agnostic microphone streaming core library.
//!
//! Cycles a fixed pool of capture buffers through an input device, encodes
//! each filled buffer off the device callback thread, and publishes the
//! frames to a host-supplied event sink in strict fill order. Platform
//! backends (Windows WASAPI) implement the `InputDevice` trait and plug into
//! the generic `StreamSession`.
//!
//! ## Architecture
//!
//! ```text
//! mic-stream-core (this crate)
//! ├── traits/       ← InputDevice, EventSink
//! ├── models/       ← StreamError, SessionState, StreamConfiguration, EncodedFrame, events
//! ├── processing/   ← BufferPool, FrameEncoder, PCM conversion, WAV and FLAC framing
//! ├── engine/       ← CaptureEngine, CaptureHandle, BufferFiller
//! ├── publish/      ← EventPublisher, ChannelSink
//! ├── session/      ← StreamSession (lifecycle controller), SessionSlot
//! └── device/       ← SyntheticInputDevice
//! ```

pub mod device;
pub mod engine;
pub mod models;
pub mod processing;
pub mod publish;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use device::synthetic::{SyntheticControl, SyntheticInputDevice};
pub use engine::buffer_filler::BufferFiller;
pub use engine::capture_engine::{CaptureEngine, CaptureHandle, FillNotification};
pub use models::audio_models::{AudioFormat, AudioLevels, DeviceInfo, StreamDiagnostics};
pub use models::config::StreamConfiguration;
pub use models::error::{EmitError, StreamError};
pub use models::events::{
    AudioDataPayload, ErrorPayload, EventPayload, StatePayload, WarningPayload, AUDIO_DATA_EVENT,
    ERROR_EVENT, STATE_EVENT, WARNING_EVENT,
};
pub use models::frame::{EncodedData, EncodedFrame, FrameEncoding};
pub use models::session_summary::SessionSummary;
pub use models::state::SessionState;
pub use processing::buffer_pool::{AudioBuffer, BufferId, BufferPool, SlotState};
pub use processing::frame_encoder::{FrameEncoder, FrameMeta};
pub use processing::pcm::PcmConverter;
pub use publish::channel_sink::{ChannelSink, SinkEvent};
pub use publish::event_publisher::{EventPublisher, PublisherReport};
pub use session::controller::StreamSession;
pub use session::slot::{SessionSlot, SlotClaim};
pub use traits::event_sink::EventSink;
pub use traits::input_device::InputDevice;
