use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::audio_models::StreamDiagnostics;

/// Lock-free counters shared by the callback context, the worker, and the
/// controller. Readers take a `StreamDiagnostics` snapshot.
#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    pub fills_received: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_published: AtomicU64,
    pub underruns: AtomicU64,
    pub dropped_bytes: AtomicU64,
    pub encode_failures: AtomicU64,
    pub frames_dropped_backpressure: AtomicU64,
    pub stale_notifications: AtomicU64,
    pub sink_failures: AtomicU64,
    pub paused_fills: AtomicU64,
    pub frames_dropped_handoff: AtomicU64,
    pub notices_dropped: AtomicU64,
}

impl StreamCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamDiagnostics {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamDiagnostics {
            fills_received: read(&self.fills_received),
            frames_encoded: read(&self.frames_encoded),
            frames_published: read(&self.frames_published),
            underruns: read(&self.underruns),
            dropped_bytes: read(&self.dropped_bytes),
            encode_failures: read(&self.encode_failures),
            frames_dropped_backpressure: read(&self.frames_dropped_backpressure),
            stale_notifications: read(&self.stale_notifications),
            sink_failures: read(&self.sink_failures),
            paused_fills: read(&self.paused_fills),
            frames_dropped_handoff: read(&self.frames_dropped_handoff),
            notices_dropped: read(&self.notices_dropped),
        }
    }
}
