use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::engine::counters::StreamCounters;
use crate::models::error::{EmitError, StreamError};
use crate::models::events::{EventPayload, WarningPayload, AUDIO_DATA_EVENT, WARNING_EVENT};
use crate::models::frame::EncodedFrame;
use crate::traits::event_sink::EventSink;

/// Totals for the frames a publisher handed to its sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherReport {
    pub published: u64,
    /// Audio duration covered by the delivered frames.
    pub published_audio: Duration,
    /// SHA-256 (hex) over the payload bytes of every delivered frame, in order.
    pub checksum: String,
    /// Frames still queued when the publisher finished.
    pub undelivered: usize,
}

/// Delivers encoded frames to the host sink in sequence order.
///
/// Frames the sink cannot take yet (`EmitError::Busy`) wait in a bounded
/// queue and are retried on the next `publish` or `flush`. When the queue
/// overflows the oldest waiting frame is dropped.
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
    queue: VecDeque<EncodedFrame>,
    depth: usize,
    last_sequence: Option<u64>,
    digest: Sha256,
    published: u64,
    published_audio: Duration,
    counters: Arc<StreamCounters>,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>, depth: usize) -> Self {
        Self::with_counters(sink, depth, Arc::new(StreamCounters::default()))
    }

    pub(crate) fn with_counters(
        sink: Arc<dyn EventSink>,
        depth: usize,
        counters: Arc<StreamCounters>,
    ) -> Self {
        Self {
            sink,
            queue: VecDeque::with_capacity(depth + 1),
            depth: depth.max(1),
            last_sequence: None,
            digest: Sha256::new(),
            published: 0,
            published_audio: Duration::ZERO,
            counters,
        }
    }

    /// Frames waiting for the sink.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Queue `frame` behind any waiting frames and deliver as many as the
    /// sink accepts.
    ///
    /// Fails with `InvalidState` if `frame` does not follow the last accepted
    /// sequence number, and with `PublishBackpressure` when the queue overflowed
    /// and its oldest frame was dropped. `frame` itself is kept in the
    /// second case.
    pub fn publish(&mut self, frame: EncodedFrame) -> Result<(), StreamError> {
        if let Some(last) = self.last_sequence {
            if frame.sequence <= last {
                return Err(StreamError::InvalidState(format!(
                    "frame {} published after frame {}",
                    frame.sequence, last
                )));
            }
        }
        self.last_sequence = Some(frame.sequence);
        self.queue.push_back(frame);
        self.flush();

        if self.queue.len() > self.depth {
            if let Some(dropped) = self.queue.pop_front() {
                StreamCounters::bump(&self.counters.frames_dropped_backpressure);
                log::warn!(
                    "sink saturated with {} frames queued, dropping frame {}",
                    self.depth,
                    dropped.sequence
                );
                return Err(StreamError::PublishBackpressure {
                    dropped_sequence: dropped.sequence,
                });
            }
        }
        Ok(())
    }

    /// Deliver queued frames until the queue is empty or the sink is busy.
    /// Returns the number delivered.
    pub fn flush(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let Some(frame) = self.queue.front() else {
                break;
            };
            let sequence = frame.sequence;
            let payload = EventPayload::AudioData(frame.payload());

            match self.sink.emit(AUDIO_DATA_EVENT, &payload) {
                Ok(()) => {
                    if let Some(frame) = self.queue.pop_front() {
                        self.record_delivery(&frame);
                        delivered += 1;
                    }
                }
                Err(EmitError::Busy) => break,
                Err(e) => {
                    self.queue.pop_front();
                    StreamCounters::bump(&self.counters.sink_failures);
                    log::warn!("sink rejected frame {}: {}", sequence, e);
                    self.emit_warning(WarningPayload {
                        code: "sink_failure",
                        message: e.to_string(),
                        sequence: Some(sequence),
                    });
                }
            }
        }
        delivered
    }

    /// Surface a recoverable error to the sink as an `audioWarning` event.
    pub fn warn(&self, error: &StreamError, sequence: Option<u64>) {
        self.emit_warning(WarningPayload::from_error(error, sequence));
    }

    /// Make a final delivery attempt and report totals.
    pub fn finish(mut self) -> PublisherReport {
        self.flush();
        if !self.queue.is_empty() {
            log::debug!("{} frames undelivered at shutdown", self.queue.len());
        }
        PublisherReport {
            published: self.published,
            published_audio: self.published_audio,
            checksum: hex_encode(&self.digest.finalize()),
            undelivered: self.queue.len(),
        }
    }

    fn record_delivery(&mut self, frame: &EncodedFrame) {
        self.digest.update(frame.data.as_bytes());
        self.published += 1;
        self.published_audio += frame.format.duration_of(frame.pcm_len);
        StreamCounters::bump(&self.counters.frames_published);
    }

    fn emit_warning(&self, warning: WarningPayload) {
        if let Err(e) = self.sink.emit(WARNING_EVENT, &EventPayload::Warning(warning)) {
            log::debug!("warning not delivered: {}", e);
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
