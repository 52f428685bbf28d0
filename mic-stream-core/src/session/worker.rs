use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::status::SessionStatus;
use crate::engine::capture_engine::{CaptureHandle, WorkItem};
use crate::engine::counters::StreamCounters;
use crate::models::error::StreamError;
use crate::processing::buffer_pool::BufferId;
use crate::processing::frame_encoder::{FrameEncoder, FrameMeta};
use crate::publish::event_publisher::EventPublisher;

/// How often a saturated sink is retried when no new work arrives.
const RETRY_TICK: Duration = Duration::from_millis(10);

/// Encodes filled buffers and publishes them, off the device callback thread.
///
/// Runs until it receives `WorkItem::Shutdown`, then hands its publisher back
/// through the join handle so the controller can total up the session.
pub(crate) struct Worker {
    pub work: Receiver<WorkItem>,
    pub handle: CaptureHandle,
    pub encoder: FrameEncoder,
    pub publisher: EventPublisher,
    pub counters: Arc<StreamCounters>,
    pub status: Arc<SessionStatus>,
}

impl Worker {
    pub fn spawn(self) -> Result<JoinHandle<EventPublisher>, StreamError> {
        thread::Builder::new()
            .name("mic-stream-worker".into())
            .spawn(move || self.run())
            .map_err(|e| StreamError::InvalidState(format!("failed to spawn worker thread: {}", e)))
    }

    fn run(mut self) -> EventPublisher {
        log::debug!("worker started");
        loop {
            match self.work.recv_timeout(RETRY_TICK) {
                Ok(WorkItem::Filled { id, meta }) => self.process(id, meta),
                Ok(WorkItem::Warning(error)) => self.publisher.warn(&error, None),
                Ok(WorkItem::DeviceFailed(message)) => self.fail(message),
                Ok(WorkItem::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if self.publisher.queued() > 0 {
                self.publisher.flush();
            }
        }
        log::debug!("worker stopped after {} frames", self.publisher.published());
        self.publisher
    }

    fn process(&mut self, id: BufferId, meta: FrameMeta) {
        let encoder = self.encoder;
        let encoded = self.handle.encode_with(id, |buffer| encoder.encode(buffer, meta));
        // The PCM is no longer needed once encoded; give the buffer back first.
        self.handle.recycle(id);

        let frame = match encoded {
            Ok(Ok(frame)) => frame,
            Ok(Err(error)) => {
                StreamCounters::bump(&self.counters.encode_failures);
                log::warn!("dropping frame {}: {}", meta.sequence, error);
                self.publisher.warn(&error, Some(meta.sequence));
                return;
            }
            Err(error) => {
                log::debug!("buffer {} left the encoder early: {}", id, error);
                return;
            }
        };

        StreamCounters::bump(&self.counters.frames_encoded);
        self.status.set_levels(frame.levels);

        if let Err(error) = self.publisher.publish(frame) {
            let sequence = match error {
                StreamError::PublishBackpressure { dropped_sequence } => dropped_sequence,
                _ => meta.sequence,
            };
            self.publisher.warn(&error, Some(sequence));
        }
    }

    fn fail(&mut self, message: String) {
        let error = StreamError::DeviceError(message);
        if self.status.fail(error.clone()) {
            log::error!("capture session failed: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::Receiver;

    use super::*;
    use crate::engine::capture_engine::CaptureEngine;
    use crate::device::synthetic::{SyntheticControl, SyntheticInputDevice};
    use crate::models::config::StreamConfiguration;
    use crate::models::events::EventPayload;
    use crate::models::state::SessionState;
    use crate::processing::buffer_pool::SlotState;
    use crate::publish::channel_sink::{ChannelSink, SinkEvent};

    struct Harness {
        engine: CaptureEngine,
        control: SyntheticControl,
        worker: JoinHandle<EventPublisher>,
        status: Arc<SessionStatus>,
        events: Receiver<SinkEvent>,
    }

    fn harness(buffer_count: usize) -> Harness {
        let config = StreamConfiguration {
            sample_rate: 16000,
            buffer_size: 160,
            buffer_count,
            ..Default::default()
        };
        let (sink, events) = ChannelSink::unbounded();
        let sink = Arc::new(sink);
        let engine = CaptureEngine::new(&config);
        let (mut device, control) = SyntheticInputDevice::new();
        let status = Arc::new(SessionStatus::new(sink.clone()));
        status.begin("worker-test");
        status.set(SessionState::Running);
        let _ = events.try_iter().count();

        engine.start(&mut device).unwrap();
        let worker = Worker {
            work: engine.work_receiver(),
            handle: engine.handle(),
            encoder: FrameEncoder::new(config.encoding),
            publisher: EventPublisher::with_counters(sink, 8, engine.counters()),
            counters: engine.counters(),
            status: Arc::clone(&status),
        }
        .spawn()
        .unwrap();

        Harness {
            engine,
            control,
            worker,
            status,
            events,
        }
    }

    fn shut_down(harness: Harness) -> (Vec<SinkEvent>, CaptureEngine) {
        harness.engine.shutdown_worker();
        harness.worker.join().unwrap();
        (harness.events.try_iter().collect(), harness.engine)
    }

    #[test]
    fn publishes_fills_in_order_and_recycles_buffers() {
        let harness = harness(2);
        for _ in 0..6 {
            // Wait for the worker to hand a buffer back before filling again.
            while harness.control.fill_next().is_err() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        let (events, engine) = shut_down(harness);
        let sequences: Vec<u64> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::AudioData(data) => Some(data.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(engine.pool().count(SlotState::Encoding), 0);
        assert_eq!(engine.counters().snapshot().frames_published, 6);
    }

    #[test]
    fn encode_failure_warns_and_continues() {
        let harness = harness(2);
        harness.control.fill_next_with(&[]).unwrap();
        harness.control.fill_next().unwrap();

        let (events, engine) = shut_down(harness);
        let warnings: Vec<&str> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Warning(w) => Some(w.code),
                _ => None,
            })
            .collect();
        assert_eq!(warnings, vec!["encode_error"]);
        assert!(events
            .iter()
            .any(|e| matches!(&e.payload, EventPayload::AudioData(d) if d.sequence == 1)));
        assert_eq!(engine.counters().snapshot().encode_failures, 1);
    }

    #[test]
    fn device_fault_moves_session_to_error() {
        let harness = harness(2);
        harness.control.fault("unplugged");
        let status = Arc::clone(&harness.status);

        let (events, _engine) = shut_down(harness);
        assert_eq!(
            status.state(),
            SessionState::Error(StreamError::DeviceError("unplugged".into()))
        );
        assert!(events.iter().any(|e| matches!(&e.payload, EventPayload::Error(err) if err.code == "device_error")));
    }
}
