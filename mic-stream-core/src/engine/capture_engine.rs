use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};

use super::counters::StreamCounters;
use crate::models::audio_models::AudioFormat;
use crate::models::config::StreamConfiguration;
use crate::models::error::StreamError;
use crate::processing::buffer_pool::{AudioBuffer, BufferId, BufferPool, SlotState};
use crate::processing::frame_encoder::FrameMeta;
use crate::traits::input_device::InputDevice;

/// How long `shutdown_worker` waits for room in a full worker queue.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Completion notice raised by the hardware layer for a filled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillNotification {
    pub buffer_id: BufferId,
    pub filled_len: usize,
    /// Position of the buffer's first sample relative to stream start.
    pub timestamp: Duration,
}

/// Work handed from the callback context to the session worker.
#[derive(Debug)]
pub(crate) enum WorkItem {
    Filled { id: BufferId, meta: FrameMeta },
    Warning(StreamError),
    DeviceFailed(String),
    Shutdown,
}

/// State shared between the device callback context and the worker.
struct EngineShared {
    pool: BufferPool,
    // Buffers enqueued with the hardware, in fill order.
    hardware_tx: Sender<BufferId>,
    hardware_rx: Receiver<BufferId>,
    work_tx: Sender<WorkItem>,
    running: AtomicBool,
    paused: AtomicBool,
    starving: AtomicBool,
    next_sequence: AtomicU64,
    counters: Arc<StreamCounters>,
}

impl EngineShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn enqueue(&self, id: BufferId) -> bool {
        match self.hardware_tx.try_send(id) {
            Ok(()) => {
                self.starving.store(false, Ordering::Release);
                true
            }
            Err(_) => {
                let _ = self.pool.release(id);
                false
            }
        }
    }

    /// Hand one free buffer to the hardware. Returns false when none is free
    /// or the engine is stopped.
    fn replenish(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.pool.acquire() {
            Ok(id) => self.enqueue(id),
            Err(_) => false,
        }
    }

    fn next_buffer(&self) -> Option<BufferId> {
        if !self.is_running() {
            return None;
        }
        while let Ok(id) = self.hardware_rx.try_recv() {
            if self.pool.state(id) == Some(SlotState::Enqueued) {
                return Some(id);
            }
        }
        None
    }

    fn on_buffer_filled(&self, notification: FillNotification) {
        if !self.is_running() {
            log::trace!(
                "ignoring fill for buffer {} on a stopped engine",
                notification.buffer_id
            );
            return;
        }

        let id = notification.buffer_id;
        let filled_len = match self.pool.mark_filled(id, notification.filled_len) {
            Ok(len) => len,
            Err(e) => {
                StreamCounters::bump(&self.counters.stale_notifications);
                log::trace!("ignoring stale fill notification: {}", e);
                return;
            }
        };
        StreamCounters::bump(&self.counters.fills_received);

        // Keep the device fed before handing the filled buffer on.
        if !self.replenish() {
            log::trace!("no free buffer to re-enqueue after filling {}", id);
        }

        if self.paused.load(Ordering::Acquire) {
            StreamCounters::bump(&self.counters.paused_fills);
            let _ = self.pool.release(id);
            self.replenish();
            return;
        }

        let meta = FrameMeta {
            sequence: self.next_sequence.fetch_add(1, Ordering::AcqRel),
            timestamp: notification.timestamp,
            captured_at: Utc::now(),
        };
        log::trace!("buffer {} filled ({} bytes) as frame {}", id, filled_len, meta.sequence);

        if self.work_tx.try_send(WorkItem::Filled { id, meta }).is_err() {
            StreamCounters::bump(&self.counters.frames_dropped_handoff);
            log::warn!("worker queue unavailable, dropping frame {}", meta.sequence);
            let _ = self.pool.release(id);
            self.replenish();
        }
    }

    /// Hand a warning or fault notice to the worker, counting it if it is lost.
    fn notify_worker(&self, item: WorkItem) {
        if let Err(e) = self.work_tx.try_send(item) {
            StreamCounters::bump(&self.counters.notices_dropped);
            log::warn!("worker queue unavailable, dropping {:?}", e.into_inner());
        }
    }

    fn report_underrun(&self, dropped_bytes: usize) {
        if !self.is_running() {
            return;
        }
        StreamCounters::bump(&self.counters.underruns);
        StreamCounters::add(&self.counters.dropped_bytes, dropped_bytes as u64);

        // One warning per starvation episode; the counters carry the rest.
        if !self.starving.swap(true, Ordering::AcqRel) {
            self.notify_worker(WorkItem::Warning(StreamError::BufferUnderrun { dropped_bytes }));
        }
    }

    fn device_error(&self, message: String) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        log::error!("input device failed: {}", message);
        self.notify_worker(WorkItem::DeviceFailed(message));
    }

    fn drain_hardware_queue(&self) -> usize {
        while self.hardware_rx.try_recv().is_ok() {}
        self.pool.release_enqueued()
    }
}

/// The engine's hardware-facing side, handed to `InputDevice::open`.
///
/// Every method is non-blocking and safe to call from the device's real-time
/// callback thread. After the engine stops, all calls become no-ops.
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<EngineShared>,
}

impl CaptureHandle {
    pub fn format(&self) -> AudioFormat {
        *self.shared.pool.format()
    }

    /// Byte capacity of every buffer the engine enqueues.
    pub fn buffer_bytes(&self) -> usize {
        self.shared.pool.buffer_bytes()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Oldest buffer enqueued for filling, if any.
    pub fn next_buffer(&self) -> Option<BufferId> {
        self.shared.next_buffer()
    }

    /// Buffers waiting in the hardware queue.
    pub fn enqueued(&self) -> usize {
        self.shared.hardware_rx.len()
    }

    /// Copy captured PCM into an enqueued buffer. Returns the bytes taken.
    pub fn write(&self, id: BufferId, bytes: &[u8]) -> Result<usize, StreamError> {
        self.shared.pool.write(id, bytes)
    }

    /// Free space left in an enqueued buffer.
    pub fn remaining(&self, id: BufferId) -> Result<usize, StreamError> {
        self.shared.pool.remaining(id)
    }

    /// Report a filled buffer. Stale or unknown ids are ignored.
    pub fn complete(&self, notification: FillNotification) {
        self.shared.on_buffer_filled(notification);
    }

    /// Report captured audio that had no enqueued buffer to land in.
    pub fn report_underrun(&self, dropped_bytes: usize) {
        self.shared.report_underrun(dropped_bytes);
    }

    /// Report an unrecoverable device fault. Only the first report counts.
    pub fn device_error(&self, message: impl Into<String>) {
        self.shared.device_error(message.into());
    }

    pub(crate) fn encode_with<R>(
        &self,
        id: BufferId,
        f: impl FnOnce(&AudioBuffer) -> R,
    ) -> Result<R, StreamError> {
        self.shared.pool.with_buffer(id, f)
    }

    /// Return an encoded buffer to the pool and top the hardware queue back up.
    pub(crate) fn recycle(&self, id: BufferId) {
        if let Err(e) = self.shared.pool.release(id) {
            log::warn!("could not release buffer: {}", e);
        }
        while self.shared.replenish() {}
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("generation", &self.shared.pool.generation())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Owns the buffer pool and the enqueue/dequeue cycle for one session.
///
/// ```text
/// start: open device → acquire every buffer → enqueue all → device.start
/// fill:  mark filled → re-enqueue a free buffer → hand off to worker
/// stop:  reject callbacks → device.stop → dequeue pending buffers
/// ```
pub struct CaptureEngine {
    shared: Arc<EngineShared>,
    work_rx: Receiver<WorkItem>,
}

impl CaptureEngine {
    pub fn new(config: &StreamConfiguration) -> Self {
        let pool = BufferPool::new(config.buffer_count, config.buffer_bytes(), config.format());
        let (hardware_tx, hardware_rx) = crossbeam_channel::bounded(config.buffer_count);
        // Never full in practice: at most `buffer_count` fills are in flight.
        let (work_tx, work_rx) = crossbeam_channel::bounded(config.buffer_count * 2 + 8);

        Self {
            shared: Arc::new(EngineShared {
                pool,
                hardware_tx,
                hardware_rx,
                work_tx,
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                starving: AtomicBool::new(false),
                next_sequence: AtomicU64::new(0),
                counters: Arc::new(StreamCounters::default()),
            }),
            work_rx,
        }
    }

    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Open `device`, enqueue every pooled buffer, and start it.
    pub fn start<D: InputDevice + ?Sized>(&self, device: &mut D) -> Result<(), StreamError> {
        let format = *self.shared.pool.format();
        device.open(&format, self.handle())?;

        self.shared.running.store(true, Ordering::Release);
        let mut enqueued = 0;
        while self.shared.replenish() {
            enqueued += 1;
        }
        log::debug!(
            "enqueued {} buffers of {} bytes with {}",
            enqueued,
            self.shared.pool.buffer_bytes(),
            device.device_info().name
        );

        if let Err(e) = device.start() {
            self.shared.running.store(false, Ordering::Release);
            let _ = device.stop();
            self.shared.drain_hardware_queue();
            return Err(e);
        }
        Ok(())
    }

    /// Pause or resume publishing. Paused fills are recycled straight back
    /// to the hardware without consuming a sequence number.
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
    }

    /// Fill-completion entry point; see `CaptureHandle::complete`.
    pub fn on_buffer_filled(&self, notification: FillNotification) {
        self.shared.on_buffer_filled(notification);
    }

    /// Stop accepting fills, stop the device, and dequeue pending buffers.
    ///
    /// Idempotent. Fills arriving during or after this call are ignored.
    pub fn stop<D: InputDevice + ?Sized>(&self, device: &mut D) -> Result<(), StreamError> {
        self.shared.running.store(false, Ordering::Release);
        let result = device.stop();
        let dequeued = self.shared.drain_hardware_queue();
        if dequeued > 0 {
            log::debug!("dequeued {} pending buffers", dequeued);
        }
        result
    }

    pub(crate) fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.shared.counters)
    }

    pub(crate) fn work_receiver(&self) -> Receiver<WorkItem> {
        self.work_rx.clone()
    }

    /// Ask the worker to exit once everything queued before this is handled.
    ///
    /// Gives up after `SHUTDOWN_TIMEOUT` if the queue stays full, which only
    /// happens when the worker is gone; joining it then returns at once.
    pub(crate) fn shutdown_worker(&self) -> bool {
        match self.shared.work_tx.send_timeout(WorkItem::Shutdown, SHUTDOWN_TIMEOUT) {
            Ok(()) => true,
            Err(_) => {
                log::error!("worker did not take the shutdown request");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::DeviceInfo;

    /// Device that records the handle and lets the test drive fills.
    #[derive(Default)]
    struct ManualDevice {
        handle: Option<CaptureHandle>,
        started: bool,
        stops: usize,
        fail_start: bool,
    }

    impl InputDevice for ManualDevice {
        fn is_available(&self) -> bool {
            true
        }

        fn open(&mut self, _format: &AudioFormat, handle: CaptureHandle) -> Result<(), StreamError> {
            self.handle = Some(handle);
            Ok(())
        }

        fn start(&mut self) -> Result<(), StreamError> {
            if self.fail_start {
                return Err(StreamError::DeviceError("start refused".into()));
            }
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), StreamError> {
            self.started = false;
            self.stops += 1;
            Ok(())
        }

        fn device_info(&self) -> DeviceInfo {
            DeviceInfo {
                id: "manual".into(),
                name: "Manual".into(),
                is_default: true,
            }
        }
    }

    fn config(buffer_count: usize) -> StreamConfiguration {
        StreamConfiguration {
            sample_rate: 16000,
            buffer_size: 4,
            buffer_count,
            ..Default::default()
        }
    }

    fn fill(handle: &CaptureHandle) -> Option<BufferId> {
        let id = handle.next_buffer()?;
        let written = handle.write(id, &[1; 8]).unwrap();
        handle.complete(FillNotification {
            buffer_id: id,
            filled_len: written,
            timestamp: Duration::ZERO,
        });
        Some(id)
    }

    fn drain(rx: &Receiver<WorkItem>) -> Vec<WorkItem> {
        rx.try_iter().collect()
    }

    #[test]
    fn start_enqueues_every_buffer() {
        let engine = CaptureEngine::new(&config(3));
        let mut device = ManualDevice::default();
        engine.start(&mut device).unwrap();

        assert!(device.started);
        assert_eq!(engine.pool().count(SlotState::Enqueued), 3);
    }

    #[test]
    fn fills_are_sequenced_in_order() {
        let engine = CaptureEngine::new(&config(3));
        let mut device = ManualDevice::default();
        engine.start(&mut device).unwrap();
        let handle = device.handle.clone().unwrap();
        let rx = engine.work_receiver();

        for _ in 0..3 {
            fill(&handle).unwrap();
        }

        let sequences: Vec<u64> = drain(&rx)
            .into_iter()
            .filter_map(|item| match item {
                WorkItem::Filled { meta, .. } => Some(meta.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(engine.pool().count(SlotState::Encoding), 3);
    }

    #[test]
    fn recycled_buffer_returns_to_hardware() {
        let engine = CaptureEngine::new(&config(2));
        let mut device = ManualDevice::default();
        engine.start(&mut device).unwrap();
        let handle = device.handle.clone().unwrap();

        let first = fill(&handle).unwrap();
        assert_eq!(engine.pool().count(SlotState::Enqueued), 1);

        handle.recycle(first);
        assert_eq!(engine.pool().count(SlotState::Enqueued), 2);
        assert_eq!(engine.pool().count(SlotState::Encoding), 0);
    }

    #[test]
    fn fill_after_stop_is_ignored() {
        let engine = CaptureEngine::new(&config(3));
        let mut device = ManualDevice::default();
        engine.start(&mut device).unwrap();
        let handle = device.handle.clone().unwrap();
        let pending = handle.next_buffer().unwrap();
        let rx = engine.work_receiver();

        engine.stop(&mut device).unwrap();
        handle.complete(FillNotification {
            buffer_id: pending,
            filled_len: 8,
            timestamp: Duration::ZERO,
        });

        assert!(drain(&rx).is_empty());
        assert_eq!(engine.pool().count(SlotState::Free), 3);
        assert_eq!(engine.counters().snapshot().fills_received, 0);
        assert_eq!(device.stops, 1);
    }

    #[test]
    fn stale_buffer_ids_are_ignored() {
        let old = CaptureEngine::new(&config(2));
        let mut old_device = ManualDevice::default();
        old.start(&mut old_device).unwrap();
        let stale = old_device.handle.as_ref().unwrap().next_buffer().unwrap();

        let engine = CaptureEngine::new(&config(2));
        let mut device = ManualDevice::default();
        engine.start(&mut device).unwrap();
        engine.on_buffer_filled(FillNotification {
            buffer_id: stale,
            filled_len: 8,
            timestamp: Duration::ZERO,
        });

        assert!(drain(&engine.work_receiver()).is_empty());
        assert_eq!(engine.counters().snapshot().stale_notifications, 1);
        assert_eq!(engine.pool().count(SlotState::Enqueued), 2);
    }

    #[test]
    fn paused_fills_are_recycled_without_sequence() {
        let engine = CaptureEngine::new(&config(2));
        let mut device = ManualDevice::default();
        engine.start(&mut device).unwrap();
        let handle = device.handle.clone().unwrap();
        let rx = engine.work_receiver();

        engine.set_paused(true);
        fill(&handle).unwrap();
        assert!(drain(&rx).is_empty());
        assert_eq!(engine.pool().count(SlotState::Enqueued), 2);

        engine.set_paused(false);
        fill(&handle).unwrap();
        match drain(&rx).as_slice() {
            [WorkItem::Filled { meta, .. }] => assert_eq!(meta.sequence, 0),
            other => panic!("unexpected work: {other:?}"),
        }
        assert_eq!(engine.counters().snapshot().paused_fills, 1);
    }

    #[test]
    fn device_error_is_reported_once_and_stops_fills() {
        let engine = CaptureEngine::new(&config(2));
        let mut device = ManualDevice::default();
        engine.start(&mut device).unwrap();
        let handle = device.handle.clone().unwrap();
        let rx = engine.work_receiver();

        handle.device_error("unplugged");
        handle.device_error("unplugged again");

        assert!(!engine.is_running());
        assert!(handle.next_buffer().is_none());
        match drain(&rx).as_slice() {
            [WorkItem::DeviceFailed(msg)] => assert_eq!(msg, "unplugged"),
            other => panic!("unexpected work: {other:?}"),
        }
    }

    /// Fill the worker queue so every later handoff fails.
    fn clog_worker_queue(engine: &CaptureEngine) {
        while engine.shared.work_tx.try_send(WorkItem::Shutdown).is_ok() {}
    }

    #[test]
    fn lost_handoffs_are_counted() {
        let engine = CaptureEngine::new(&config(2));
        let mut device = ManualDevice::default();
        engine.start(&mut device).unwrap();
        let handle = device.handle.clone().unwrap();
        clog_worker_queue(&engine);

        fill(&handle).unwrap();
        assert_eq!(engine.pool().count(SlotState::Enqueued), 2);

        while handle.next_buffer().is_some() {}
        handle.report_underrun(64);
        handle.device_error("unplugged");

        let diagnostics = engine.counters().snapshot();
        assert_eq!(diagnostics.frames_dropped_handoff, 1);
        assert_eq!(diagnostics.notices_dropped, 2);
        assert_eq!(diagnostics.underruns, 1);
    }

    #[test]
    fn shutdown_gives_up_on_a_full_queue() {
        let engine = CaptureEngine::new(&config(2));
        clog_worker_queue(&engine);

        let started = std::time::Instant::now();
        assert!(!engine.shutdown_worker());
        assert!(started.elapsed() >= SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn failed_device_start_releases_buffers() {
        let engine = CaptureEngine::new(&config(3));
        let mut device = ManualDevice {
            fail_start: true,
            ..Default::default()
        };

        let err = engine.start(&mut device).unwrap_err();
        assert!(matches!(err, StreamError::DeviceError(_)));
        assert!(!engine.is_running());
        assert_eq!(engine.pool().count(SlotState::Free), 3);
    }
}
