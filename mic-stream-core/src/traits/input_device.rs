use crate::engine::capture_engine::CaptureHandle;
use crate::models::audio_models::{AudioFormat, DeviceInfo};
use crate::models::error::StreamError;

/// Interface for platform-specific microphone input.
///
/// Implemented by:
/// - `SyntheticInputDevice` (in-process, tests and demos)
/// - `WasapiInputDevice` (Windows)
///
/// The device owns its callback thread. It pulls enqueued buffers from the
/// `CaptureHandle`, fills them, and reports each completed buffer through
/// `CaptureHandle::complete`. Everything on that path must stay non-blocking.
pub trait InputDevice: Send {
    /// Whether this input is currently available.
    fn is_available(&self) -> bool;

    /// Open the device with `format`. Buffers are enqueued on `handle` after
    /// this returns and before `start`.
    fn open(&mut self, format: &AudioFormat, handle: CaptureHandle) -> Result<(), StreamError>;

    /// Begin delivering fills.
    fn start(&mut self) -> Result<(), StreamError>;

    /// Stop delivering fills, drop pending buffers, and release the device.
    ///
    /// Must return only once the callback thread has finished, and must be
    /// safe to call when the device is not running.
    fn stop(&mut self) -> Result<(), StreamError>;

    /// Information about the hardware backing this input.
    fn device_info(&self) -> DeviceInfo;
}
