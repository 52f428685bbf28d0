//! WASAPI microphone input device.
//!
//! Captures from a capture endpoint in shared mode on a dedicated thread
//! registered with MMCSS. The endpoint's Float32 mix format is converted to
//! the stream's PCM format and packed into the engine's buffers through a
//! [`BufferFiller`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use windows::core::w;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use mic_stream_core::{
    AudioFormat, BufferFiller, CaptureHandle, DeviceInfo, InputDevice, PcmConverter, StreamError,
};

use crate::endpoints::{self, ComApartment};
use crate::error::WasapiError;

/// Shared-mode engine buffer, in 100-nanosecond units (100 ms).
const BUFFER_DURATION_HNS: i64 = 1_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const START_TIMEOUT: Duration = Duration::from_secs(2);

const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Microphone input backed by a WASAPI capture endpoint.
pub struct WasapiInputDevice {
    device_id: Option<String>,
    device_name: String,
    is_default: bool,
    format: Option<AudioFormat>,
    handle: Option<CaptureHandle>,
    running: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
}

impl WasapiInputDevice {
    /// Capture from whatever the system default microphone is at `start`.
    pub fn default_device() -> Self {
        Self::new(None, "Default Microphone".into(), true)
    }

    /// Capture from a specific endpoint, as returned by
    /// [`list_input_devices`](crate::endpoints::list_input_devices).
    pub fn with_device(info: DeviceInfo) -> Self {
        Self::new(Some(info.id), info.name, info.is_default)
    }

    fn new(device_id: Option<String>, device_name: String, is_default: bool) -> Self {
        Self {
            device_id,
            device_name,
            is_default,
            format: None,
            handle: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_thread: None,
        }
    }

    fn join_capture_thread(&mut self) {
        if let Some(thread) = self.capture_thread.take() {
            if thread.join().is_err() {
                log::error!("microphone capture thread panicked");
            }
        }
    }
}

impl InputDevice for WasapiInputDevice {
    fn is_available(&self) -> bool {
        endpoints::check_input_access(self.device_id.as_deref()).is_ok()
    }

    fn open(&mut self, format: &AudioFormat, handle: CaptureHandle) -> Result<(), StreamError> {
        if self.capture_thread.is_some() {
            return Err(StreamError::InvalidState("microphone capture already running".into()));
        }
        endpoints::check_input_access(self.device_id.as_deref())?;
        self.format = Some(*format);
        self.handle = Some(handle);
        Ok(())
    }

    fn start(&mut self) -> Result<(), StreamError> {
        if self.capture_thread.is_some() {
            return Err(StreamError::InvalidState("microphone capture already running".into()));
        }
        let (Some(handle), Some(format)) = (self.handle.clone(), self.format) else {
            return Err(StreamError::InvalidState("microphone is not open".into()));
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let device_id = self.device_id.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name("wasapi-mic-capture".into())
            .spawn(move || {
                let filler = BufferFiller::new(handle);
                capture_thread(running, device_id, filler, PcmConverter::new(format), ready_tx);
            })
            .map_err(|e| WasapiError::Thread(format!("failed to spawn: {}", e)))?;
        self.capture_thread = Some(thread);

        let outcome = match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(WasapiError::Thread("endpoint did not start in time".into()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(WasapiError::Thread("exited before starting".into()))
            }
        };
        if let Err(e) = outcome {
            self.running.store(false, Ordering::SeqCst);
            self.join_capture_thread();
            return Err(e.into());
        }

        log::info!("microphone capture started on {}", self.device_name);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        self.running.store(false, Ordering::SeqCst);
        self.join_capture_thread();
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.device_id.clone().unwrap_or_else(|| "default-mic".into()),
            name: self.device_name.clone(),
            is_default: self.is_default,
        }
    }
}

impl Drop for WasapiInputDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_capture_thread();
    }
}

fn capture_thread(
    running: Arc<AtomicBool>,
    device_id: Option<String>,
    mut filler: BufferFiller,
    converter: PcmConverter,
    ready: Sender<Result<(), WasapiError>>,
) {
    let stream = match CaptureStream::open(device_id.as_deref()) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    if let Err(e) = stream.pump(&running, &mut filler, &converter) {
        log::error!("microphone capture error: {}", e);
        if running.swap(false, Ordering::SeqCst) {
            filler.handle().device_error(e.to_string());
        }
    }
}

/// Owns the `GetMixFormat` allocation.
struct MixFormat(*mut WAVEFORMATEX);

impl Drop for MixFormat {
    fn drop(&mut self) {
        unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
    }
}

/// A started shared-mode capture stream. Lives on the capture thread only.
///
/// Field order matters: COM interfaces are released before the apartment.
struct CaptureStream {
    capture_client: IAudioCaptureClient,
    audio_client: IAudioClient,
    _mix_format: MixFormat,
    sample_rate: f64,
    channels: u16,
    _com: ComApartment,
}

impl CaptureStream {
    /// Sequence:
    /// 1. CoInitializeEx (MTA)
    /// 2. Resolve the capture endpoint (default or by id)
    /// 3. Activate IAudioClient and read the mix format
    /// 4. Initialize in shared mode, get IAudioCaptureClient
    /// 5. Register with MMCSS and start
    fn open(device_id: Option<&str>) -> Result<Self, WasapiError> {
        let com = ComApartment::enter()?;
        let enumerator = endpoints::device_enumerator()?;
        let device = endpoints::capture_endpoint(&enumerator, device_id)?;

        unsafe {
            let audio_client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(WasapiError::com("IMMDevice::Activate"))?;

            let mix_format = MixFormat(
                audio_client
                    .GetMixFormat()
                    .map_err(WasapiError::com("IAudioClient::GetMixFormat"))?,
            );
            let mix = &*mix_format.0;
            let (tag, bits) = (mix.wFormatTag, mix.wBitsPerSample);
            if bits != 32 || !(tag == WAVE_FORMAT_IEEE_FLOAT || tag == WAVE_FORMAT_EXTENSIBLE) {
                return Err(WasapiError::UnsupportedMixFormat(format!(
                    "tag {:#06x}, {} bits",
                    tag, bits
                )));
            }
            let sample_rate = f64::from(mix.nSamplesPerSec);
            let channels = mix.nChannels;

            audio_client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_NOPERSIST,
                    BUFFER_DURATION_HNS,
                    0,
                    mix_format.0,
                    None,
                )
                .map_err(WasapiError::com("IAudioClient::Initialize"))?;

            let capture_client: IAudioCaptureClient = audio_client
                .GetService()
                .map_err(WasapiError::com("IAudioClient::GetService"))?;

            let mut task_index: u32 = 0;
            if let Err(e) = AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) {
                log::debug!("MMCSS registration failed: {}", e);
            }

            audio_client
                .Start()
                .map_err(WasapiError::com("IAudioClient::Start"))?;

            log::debug!(
                "endpoint mix format: {} Hz, {} channels, Float32",
                sample_rate,
                channels
            );

            Ok(Self {
                capture_client,
                audio_client,
                _mix_format: mix_format,
                sample_rate,
                channels,
                _com: com,
            })
        }
    }

    /// Drain endpoint packets into the engine until `running` clears.
    fn pump(
        &self,
        running: &AtomicBool,
        filler: &mut BufferFiller,
        converter: &PcmConverter,
    ) -> Result<(), WasapiError> {
        while running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);

            let mut packet_length = unsafe { self.capture_client.GetNextPacketSize() }
                .map_err(WasapiError::com("GetNextPacketSize"))?;

            while packet_length > 0 {
                let mut data: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                unsafe {
                    self.capture_client
                        .GetBuffer(&mut data, &mut num_frames, &mut flags, None, None)
                        .map_err(WasapiError::com("GetBuffer"))?;
                }

                if num_frames > 0 && !data.is_null() {
                    let total_samples = num_frames as usize * usize::from(self.channels);
                    let pcm = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        let silence = vec![0.0f32; total_samples];
                        converter.convert(&silence, self.sample_rate, self.channels)
                    } else {
                        let samples =
                            unsafe { std::slice::from_raw_parts(data as *const f32, total_samples) };
                        converter.convert(samples, self.sample_rate, self.channels)
                    };
                    deliver(filler, &pcm);
                }

                unsafe { self.capture_client.ReleaseBuffer(num_frames) }
                    .map_err(WasapiError::com("ReleaseBuffer"))?;

                packet_length = unsafe { self.capture_client.GetNextPacketSize() }
                    .map_err(WasapiError::com("GetNextPacketSize"))?;
            }
        }
        Ok(())
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        let _ = unsafe { self.audio_client.Stop() };
    }
}

fn deliver(filler: &mut BufferFiller, pcm: &[u8]) {
    match filler.push(pcm) {
        // The engine counts underruns and warns the host.
        Ok(_) | Err(StreamError::BufferUnderrun { .. }) => {}
        Err(e) => log::debug!("capture chunk rejected: {}", e),
    }
}
