//! In-process input device for tests, demos, and hosts without hardware.
//!
//! Nothing fills buffers on its own: the owner of a [`SyntheticControl`]
//! plays the role of the hardware callback thread and decides when each
//! buffer completes, what it contains, and when the device faults.

use std::f32::consts::TAU;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::capture_engine::{CaptureHandle, FillNotification};
use crate::models::audio_models::{AudioFormat, DeviceInfo};
use crate::models::error::StreamError;
use crate::processing::buffer_pool::BufferId;
use crate::processing::pcm;
use crate::traits::input_device::InputDevice;

const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.5;

struct SyntheticState {
    available: bool,
    handle: Option<CaptureHandle>,
    format: Option<AudioFormat>,
    started: bool,
    open_count: usize,
    fail_next_open: Option<StreamError>,
    fail_next_start: Option<StreamError>,
    // Stream position in bytes of the next fill.
    position: usize,
    last_filled: Option<BufferId>,
}

impl Default for SyntheticState {
    fn default() -> Self {
        Self {
            available: true,
            handle: None,
            format: None,
            started: false,
            open_count: 0,
            fail_next_open: None,
            fail_next_start: None,
            position: 0,
            last_filled: None,
        }
    }
}

/// Drives a [`SyntheticInputDevice`] from the test side.
#[derive(Clone, Default)]
pub struct SyntheticControl {
    state: Arc<Mutex<SyntheticState>>,
}

impl SyntheticControl {
    /// Fill the oldest enqueued buffer with a 440 Hz tone and complete it.
    ///
    /// Fails with `BufferUnderrun` when no buffer is enqueued, and with
    /// `InvalidState` when the device is not started.
    pub fn fill_next(&self) -> Result<BufferId, StreamError> {
        let mut state = self.state.lock();
        let (handle, format) = Self::started(&state)?;
        let id = Self::next_buffer(&handle, &format)?;

        let frames = format.frames_in(handle.remaining(id)?);
        let first_frame = format.frames_in(state.position);
        let step = TONE_HZ / format.sample_rate as f32;
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let phase = ((first_frame + i) as f32 * step).fract();
                let value = (phase * TAU).sin() * TONE_AMPLITUDE;
                std::iter::repeat(value).take(usize::from(format.channels))
            })
            .collect();
        let bytes = pcm::encode_f32(&samples, format.bits_per_sample);

        Self::complete(&mut state, &handle, &format, id, &bytes)
    }

    /// Complete the oldest enqueued buffer with exactly `bytes`.
    ///
    /// Short or malformed fills are passed through as-is.
    pub fn fill_next_with(&self, bytes: &[u8]) -> Result<BufferId, StreamError> {
        let mut state = self.state.lock();
        let (handle, format) = Self::started(&state)?;
        let id = Self::next_buffer(&handle, &format)?;
        Self::complete(&mut state, &handle, &format, id, bytes)
    }

    /// Deliver a raw completion notice, as a late or duplicate callback would.
    ///
    /// Works regardless of device state as long as the device was opened once.
    pub fn notify(&self, notification: FillNotification) {
        let handle = self.state.lock().handle.clone();
        if let Some(handle) = handle {
            handle.complete(notification);
        }
    }

    /// Report an unrecoverable device fault from the callback context.
    pub fn fault(&self, message: &str) {
        let handle = self.state.lock().handle.clone();
        if let Some(handle) = handle {
            handle.device_error(message);
        }
    }

    pub fn fail_next_open(&self, error: StreamError) {
        self.state.lock().fail_next_open = Some(error);
    }

    pub fn fail_next_start(&self, error: StreamError) {
        self.state.lock().fail_next_start = Some(error);
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Buffers the engine has enqueued and not yet had filled.
    pub fn enqueued(&self) -> usize {
        self.state
            .lock()
            .handle
            .as_ref()
            .map_or(0, CaptureHandle::enqueued)
    }

    pub fn last_filled(&self) -> Option<BufferId> {
        self.state.lock().last_filled
    }

    /// Format negotiated by the most recent `open`.
    pub fn format(&self) -> Option<AudioFormat> {
        self.state.lock().format
    }

    fn started(state: &SyntheticState) -> Result<(CaptureHandle, AudioFormat), StreamError> {
        match (&state.handle, state.format) {
            (Some(handle), Some(format)) if state.started => Ok((handle.clone(), format)),
            _ => Err(StreamError::InvalidState("synthetic device is not started".into())),
        }
    }

    fn next_buffer(handle: &CaptureHandle, format: &AudioFormat) -> Result<BufferId, StreamError> {
        handle.next_buffer().ok_or_else(|| {
            // A whole buffer of audio had nowhere to go.
            let dropped_bytes = handle.buffer_bytes() - handle.buffer_bytes() % format.block_align().max(1);
            handle.report_underrun(dropped_bytes);
            StreamError::BufferUnderrun { dropped_bytes }
        })
    }

    fn complete(
        state: &mut SyntheticState,
        handle: &CaptureHandle,
        format: &AudioFormat,
        id: BufferId,
        bytes: &[u8],
    ) -> Result<BufferId, StreamError> {
        let written = handle.write(id, bytes)?;
        handle.complete(FillNotification {
            buffer_id: id,
            filled_len: written,
            timestamp: format.duration_of(state.position),
        });
        state.position += written;
        state.last_filled = Some(id);
        Ok(id)
    }
}

/// `InputDevice` whose fills are driven through a [`SyntheticControl`].
pub struct SyntheticInputDevice {
    control: SyntheticControl,
    info: DeviceInfo,
}

impl SyntheticInputDevice {
    pub fn new() -> (Self, SyntheticControl) {
        let control = SyntheticControl::default();
        let device = Self {
            control: control.clone(),
            info: DeviceInfo {
                id: "synthetic-input".into(),
                name: "Synthetic Input".into(),
                is_default: true,
            },
        };
        (device, control)
    }
}

impl InputDevice for SyntheticInputDevice {
    fn is_available(&self) -> bool {
        self.control.state.lock().available
    }

    fn open(&mut self, format: &AudioFormat, handle: CaptureHandle) -> Result<(), StreamError> {
        let mut state = self.control.state.lock();
        if !state.available {
            return Err(StreamError::DeviceUnavailable);
        }
        if let Some(err) = state.fail_next_open.take() {
            return Err(err);
        }
        state.handle = Some(handle);
        state.format = Some(*format);
        state.position = 0;
        state.last_filled = None;
        state.open_count += 1;
        log::debug!("synthetic input opened at {} Hz", format.sample_rate);
        Ok(())
    }

    fn start(&mut self) -> Result<(), StreamError> {
        let mut state = self.control.state.lock();
        if state.handle.is_none() {
            return Err(StreamError::InvalidState("synthetic device is not open".into()));
        }
        if let Some(err) = state.fail_next_start.take() {
            return Err(err);
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        // The handle is kept so tests can replay late notifications.
        self.control.state.lock().started = false;
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }
}
