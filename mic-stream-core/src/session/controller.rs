use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::slot::{SessionSlot, SlotClaim};
use super::status::SessionStatus;
use super::worker::Worker;
use crate::engine::capture_engine::CaptureEngine;
use crate::engine::counters::StreamCounters;
use crate::models::audio_models::{AudioLevels, DeviceInfo, StreamDiagnostics};
use crate::models::config::StreamConfiguration;
use crate::models::error::StreamError;
use crate::models::session_summary::SessionSummary;
use crate::models::state::SessionState;
use crate::processing::frame_encoder::FrameEncoder;
use crate::publish::event_publisher::EventPublisher;
use crate::traits::event_sink::EventSink;
use crate::traits::input_device::InputDevice;

/// Resources owned by a started session, released together on teardown.
struct ActiveSession {
    id: String,
    config: StreamConfiguration,
    engine: CaptureEngine,
    worker: Option<JoinHandle<EventPublisher>>,
    counters: Arc<StreamCounters>,
    started_at: DateTime<Utc>,
    _claim: SlotClaim,
}

/// Lifecycle controller for microphone streaming.
///
/// Validates configuration, starts and stops the capture engine, and surfaces
/// every state change and fatal error to the sink.
///
/// ```text
/// [InputDevice] → [CaptureEngine + BufferPool] → handoff → [worker]
///                                                   FrameEncoder → EventPublisher → [EventSink]
/// ```
///
/// Only one session per `SessionSlot` may hold the device at a time; by
/// default all controllers share the process-wide slot.
pub struct StreamSession<D: InputDevice> {
    device: D,
    sink: Arc<dyn EventSink>,
    slot: Arc<SessionSlot>,
    status: Arc<SessionStatus>,
    config: Option<StreamConfiguration>,
    active: Option<ActiveSession>,
    last_summary: Option<SessionSummary>,
}

impl<D: InputDevice> StreamSession<D> {
    pub fn new(device: D, sink: Arc<dyn EventSink>) -> Self {
        Self::with_session_slot(device, sink, SessionSlot::global())
    }

    /// A controller bound to its own `slot` instead of the process-wide one.
    pub fn with_session_slot(device: D, sink: Arc<dyn EventSink>, slot: Arc<SessionSlot>) -> Self {
        let status = Arc::new(SessionStatus::new(Arc::clone(&sink)));
        Self {
            device,
            sink,
            slot,
            status,
            config: None,
            active: None,
            last_summary: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    /// Id of the current or most recent session.
    pub fn session_id(&self) -> Option<String> {
        self.status.session_id()
    }

    /// Levels of the most recently encoded frame.
    pub fn current_levels(&self) -> AudioLevels {
        self.status.levels()
    }

    /// Live counters of the running session, or the final counters of the
    /// last one.
    pub fn diagnostics(&self) -> StreamDiagnostics {
        if let Some(active) = &self.active {
            return active.counters.snapshot();
        }
        self.last_summary
            .as_ref()
            .map(|summary| summary.diagnostics.clone())
            .unwrap_or_default()
    }

    pub fn configuration(&self) -> Option<&StreamConfiguration> {
        self.config.as_ref()
    }

    /// Summary of the most recently stopped session.
    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.device.device_info()
    }

    /// Parse host options and keep them for the next `start`.
    pub fn configure(&mut self, options: &Value) -> Result<(), StreamError> {
        let config = StreamConfiguration::from_options(options)?;
        self.configure_with(config)
    }

    /// Keep `config` for the next `start`. Only allowed while idle.
    pub fn configure_with(&mut self, config: StreamConfiguration) -> Result<(), StreamError> {
        let state = self.status.state();
        if !state.is_idle() {
            return Err(StreamError::InvalidState(format!(
                "cannot configure while {}",
                state.name()
            )));
        }
        config.validate()?;
        log::debug!(
            "configured {} Hz, {}-bit, {} ch, {} x {} frames, {:?}",
            config.sample_rate,
            config.bits_per_sample,
            config.channels,
            config.buffer_count,
            config.buffer_size,
            config.encoding
        );
        self.config = Some(config);
        Ok(())
    }

    /// Configure from `options`, then start.
    pub fn start_with(&mut self, options: &Value) -> Result<SessionState, StreamError> {
        self.guard_startable()?;
        self.configure(options)?;
        self.start()
    }

    /// Start capturing with the stored configuration.
    ///
    /// Transitions: idle → starting → running. Fails with
    /// `SessionAlreadyActive` while a session holds the device and with
    /// `InvalidState` after a device error until `reset`.
    pub fn start(&mut self) -> Result<SessionState, StreamError> {
        self.guard_startable()?;
        let config = self
            .config
            .clone()
            .ok_or_else(|| StreamError::InvalidConfig("not configured".into()))?;
        config.validate()?;
        if !self.device.is_available() {
            return Err(StreamError::DeviceUnavailable);
        }

        let session_id = Uuid::new_v4().to_string();
        let claim = self.slot.claim(&session_id)?;
        self.status.begin(&session_id);

        let engine = CaptureEngine::new(&config);
        let counters = engine.counters();
        let worker = Worker {
            work: engine.work_receiver(),
            handle: engine.handle(),
            encoder: FrameEncoder::new(config.encoding),
            publisher: EventPublisher::with_counters(
                Arc::clone(&self.sink),
                config.publish_queue_depth,
                Arc::clone(&counters),
            ),
            counters: Arc::clone(&counters),
            status: Arc::clone(&self.status),
        };
        let worker = match worker.spawn() {
            Ok(worker) => worker,
            Err(e) => {
                self.status.report(&e);
                self.status.set(SessionState::Idle);
                return Err(e);
            }
        };

        if let Err(e) = engine.start(&mut self.device) {
            log::error!("failed to start {}: {}", self.device.device_info().name, e);
            engine.shutdown_worker();
            let _ = worker.join();
            self.status.report(&e);
            self.status.set(SessionState::Idle);
            return Err(e);
        }

        let started = self.status.transition(
            |state| matches!(state, SessionState::Starting),
            SessionState::Running,
        );
        self.active = Some(ActiveSession {
            id: session_id,
            config,
            engine,
            worker: Some(worker),
            counters,
            started_at: Utc::now(),
            _claim: claim,
        });

        if !started {
            // The device faulted before the first fill; the worker already
            // moved the session to `Error`.
            return match self.status.state() {
                SessionState::Error(e) => Err(e),
                state => Ok(state),
            };
        }

        if let Some(active) = &self.active {
            log::info!(
                "capture session {} started on {} ({} Hz, {}-bit, {} ch)",
                active.id,
                self.device.device_info().name,
                active.config.sample_rate,
                active.config.bits_per_sample,
                active.config.channels
            );
        }
        Ok(SessionState::Running)
    }

    /// Stop publishing frames while keeping the device open.
    ///
    /// Transitions: running → paused.
    pub fn pause(&mut self) -> Result<SessionState, StreamError> {
        let Some(active) = &self.active else {
            return Err(StreamError::InvalidState("no session to pause".into()));
        };
        active.engine.set_paused(true);
        if !self
            .status
            .transition(SessionState::is_running, SessionState::Paused)
        {
            active.engine.set_paused(false);
            return Err(StreamError::InvalidState(format!(
                "cannot pause while {}",
                self.status.state().name()
            )));
        }
        log::info!("capture session {} paused", active.id);
        Ok(SessionState::Paused)
    }

    /// Transitions: paused → running.
    pub fn resume(&mut self) -> Result<SessionState, StreamError> {
        let Some(active) = &self.active else {
            return Err(StreamError::InvalidState("no session to resume".into()));
        };
        if !self
            .status
            .transition(SessionState::is_paused, SessionState::Running)
        {
            return Err(StreamError::InvalidState(format!(
                "cannot resume while {}",
                self.status.state().name()
            )));
        }
        active.engine.set_paused(false);
        log::info!("capture session {} resumed", active.id);
        Ok(SessionState::Running)
    }

    /// Stop capture, drain in-flight buffers, and release the device.
    ///
    /// Transitions: running/paused → stopping → idle. Idempotent: stopping an
    /// idle session succeeds, and a session in `Error` stays there until
    /// `reset`. Returns the resulting state.
    pub fn stop(&mut self) -> Result<SessionState, StreamError> {
        let state = self.status.state();
        match state {
            SessionState::Idle | SessionState::Error(_) => return Ok(state),
            SessionState::Running | SessionState::Paused => {}
            SessionState::Starting | SessionState::Stopping => {
                return Err(StreamError::InvalidState(format!(
                    "cannot stop while {}",
                    state.name()
                )))
            }
        }

        // A fault that lands between the check above and here keeps `Error`.
        self.status.transition(
            |state| matches!(state, SessionState::Running | SessionState::Paused),
            SessionState::Stopping,
        );
        if let Some(summary) = self.teardown() {
            log::info!(
                "capture session {} stopped: {} frames, {:.2}s",
                summary.session_id,
                summary.frames_published,
                summary.duration_secs
            );
            self.last_summary = Some(summary);
        }

        // A fault drained from the handoff during teardown keeps `Error`.
        self.status.transition(
            |state| matches!(state, SessionState::Stopping),
            SessionState::Idle,
        );
        Ok(self.status.state())
    }

    /// Tear down whatever is left of the session and return to idle.
    ///
    /// The only way out of `Error`. The stored configuration is kept, and
    /// the next `start` allocates a fresh buffer pool.
    pub fn reset(&mut self) -> Result<SessionState, StreamError> {
        if let Some(summary) = self.teardown() {
            self.last_summary = Some(summary);
        }
        if !self.status.state().is_idle() {
            self.status.set(SessionState::Idle);
        }
        log::info!("capture session reset");
        Ok(SessionState::Idle)
    }

    fn guard_startable(&self) -> Result<(), StreamError> {
        match self.status.state() {
            SessionState::Idle => Ok(()),
            SessionState::Error(_) => Err(StreamError::InvalidState(
                "session failed; reset before starting again".into(),
            )),
            _ => Err(StreamError::SessionAlreadyActive),
        }
    }

    /// Stop the device and the worker. Returns `None` when nothing was active.
    fn teardown(&mut self) -> Option<SessionSummary> {
        let mut active = self.active.take()?;

        if let Err(e) = active.engine.stop(&mut self.device) {
            log::warn!("device did not stop cleanly: {}", e);
        }
        active.engine.shutdown_worker();
        let report = active.worker.take().and_then(|worker| match worker.join() {
            Ok(publisher) => Some(publisher.finish()),
            Err(_) => {
                log::error!("worker for session {} panicked", active.id);
                None
            }
        });

        let (frames_published, duration_secs, checksum) = match report {
            Some(report) => {
                if report.undelivered > 0 {
                    log::warn!("{} frames were never accepted by the sink", report.undelivered);
                }
                (
                    report.published,
                    report.published_audio.as_secs_f64(),
                    report.checksum,
                )
            }
            None => (0, 0.0, String::new()),
        };

        Some(SessionSummary {
            session_id: active.id,
            format: active.config.format(),
            started_at: active.started_at,
            stopped_at: Utc::now(),
            duration_secs,
            frames_published,
            checksum,
            diagnostics: active.counters.snapshot(),
        })
    }
}

impl<D: InputDevice> Drop for StreamSession<D> {
    fn drop(&mut self) {
        if self.active.is_some() {
            log::debug!("tearing down capture session on drop");
            self.teardown();
        }
    }
}
