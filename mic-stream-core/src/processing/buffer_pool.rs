use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::models::audio_models::AudioFormat;
use crate::models::error::StreamError;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identifies one pooled buffer.
///
/// The generation is unique per `BufferPool`, so an id handed out by an
/// earlier session never addresses a slot of a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    generation: u64,
    slot: usize,
}

impl BufferId {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation, self.slot)
    }
}

/// Ownership state of a pooled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotState {
    /// Owned by the pool.
    Free = 0,
    /// Handed to the hardware for filling.
    Enqueued = 1,
    /// Filled, being encoded by the worker.
    Encoding = 2,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Enqueued,
            2 => Self::Encoding,
            _ => Self::Free,
        }
    }
}

/// Fixed-capacity raw PCM container.
///
/// The backing storage is allocated once and never grows.
#[derive(Debug)]
pub struct AudioBuffer {
    data: Vec<u8>,
    len: usize,
    format: AudioFormat,
}

impl AudioBuffer {
    pub fn new(capacity: usize, format: AudioFormat) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
            format,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes filled so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// The filled portion of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copy as much of `bytes` as fits. Returns the number of bytes taken.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.remaining());
        self.data[self.len..self.len + count].copy_from_slice(&bytes[..count]);
        self.len += count;
        count
    }

    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

struct Slot {
    state: AtomicU8,
    // Only locked by the current owner of `state`, so never contended.
    buffer: Mutex<AudioBuffer>,
}

/// Fixed set of pre-allocated buffers recycled across a capture session.
///
/// Shared between the device callback context and the encoding worker.
/// Slots are claimed with compare-and-swap on their state; no operation
/// waits on another context's progress.
///
/// ```text
/// free ──acquire──→ enqueued ──mark_filled──→ encoding
///   ↑                  │                         │
///   └─────release──────┴─────────release─────────┘
/// ```
pub struct BufferPool {
    generation: u64,
    slots: Box<[Slot]>,
    format: AudioFormat,
    buffer_bytes: usize,
}

impl BufferPool {
    pub fn new(count: usize, buffer_bytes: usize, format: AudioFormat) -> Self {
        let slots = (0..count)
            .map(|_| Slot {
                state: AtomicU8::new(SlotState::Free as u8),
                buffer: Mutex::new(AudioBuffer::new(buffer_bytes, format)),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            slots,
            format,
            buffer_bytes,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of buffers in the pool.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_bytes
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Whether `id` was handed out by this pool.
    pub fn owns(&self, id: BufferId) -> bool {
        id.generation == self.generation && id.slot < self.slots.len()
    }

    /// Claim a free buffer for the hardware queue.
    ///
    /// Fails with `PoolExhausted` when every buffer is enqueued or encoding.
    pub fn acquire(&self) -> Result<BufferId, StreamError> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .state
                .compare_exchange(
                    SlotState::Free as u8,
                    SlotState::Enqueued as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                slot.buffer.lock().clear();
                return Ok(BufferId {
                    generation: self.generation,
                    slot: index,
                });
            }
        }
        Err(StreamError::PoolExhausted)
    }

    /// Copy captured bytes into an enqueued buffer. Returns the bytes taken.
    pub fn write(&self, id: BufferId, bytes: &[u8]) -> Result<usize, StreamError> {
        let slot = self.slot_in(id, SlotState::Enqueued)?;
        let written = slot.buffer.lock().append(bytes);
        Ok(written)
    }

    /// Free space left in an enqueued buffer.
    pub fn remaining(&self, id: BufferId) -> Result<usize, StreamError> {
        let slot = self.slot_in(id, SlotState::Enqueued)?;
        let remaining = slot.buffer.lock().remaining();
        Ok(remaining)
    }

    /// Move a buffer from the hardware to the encoder.
    ///
    /// The fill length is capped at what was actually written. Returns the
    /// resulting fill length.
    pub fn mark_filled(&self, id: BufferId, filled_len: usize) -> Result<usize, StreamError> {
        let slot = self.transition(id, SlotState::Enqueued, SlotState::Encoding)?;
        let mut buffer = slot.buffer.lock();
        buffer.truncate(filled_len);
        Ok(buffer.len())
    }

    /// Read access to a buffer that is being encoded.
    pub fn with_buffer<R>(
        &self,
        id: BufferId,
        f: impl FnOnce(&AudioBuffer) -> R,
    ) -> Result<R, StreamError> {
        let slot = self.slot_in(id, SlotState::Encoding)?;
        let buffer = slot.buffer.lock();
        Ok(f(&buffer))
    }

    /// Return a buffer to the pool.
    ///
    /// Fails with `InvalidState` if the buffer is already free or belongs to
    /// another pool.
    pub fn release(&self, id: BufferId) -> Result<(), StreamError> {
        let slot = self.slot(id)?;
        for from in [SlotState::Encoding, SlotState::Enqueued] {
            if slot
                .state
                .compare_exchange(
                    from as u8,
                    SlotState::Free as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(StreamError::InvalidState(format!(
            "buffer {} is already free",
            id
        )))
    }

    /// Return every enqueued buffer to the pool. Returns how many were freed.
    pub fn release_enqueued(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.state
                    .compare_exchange(
                        SlotState::Enqueued as u8,
                        SlotState::Free as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            })
            .count()
    }

    pub fn state(&self, id: BufferId) -> Option<SlotState> {
        if !self.owns(id) {
            return None;
        }
        Some(SlotState::from_u8(
            self.slots[id.slot].state.load(Ordering::Acquire),
        ))
    }

    /// Number of buffers currently in `state`.
    pub fn count(&self, state: SlotState) -> usize {
        self.slots
            .iter()
            .filter(|slot| SlotState::from_u8(slot.state.load(Ordering::Acquire)) == state)
            .count()
    }

    fn slot(&self, id: BufferId) -> Result<&Slot, StreamError> {
        if id.generation != self.generation {
            return Err(StreamError::InvalidState(format!(
                "buffer {} belongs to a previous session",
                id
            )));
        }
        self.slots
            .get(id.slot)
            .ok_or_else(|| StreamError::InvalidState(format!("no buffer slot {}", id.slot)))
    }

    fn slot_in(&self, id: BufferId, expected: SlotState) -> Result<&Slot, StreamError> {
        let slot = self.slot(id)?;
        let actual = SlotState::from_u8(slot.state.load(Ordering::Acquire));
        if actual != expected {
            return Err(StreamError::InvalidState(format!(
                "buffer {} is {:?}, expected {:?}",
                id, actual, expected
            )));
        }
        Ok(slot)
    }

    fn transition(&self, id: BufferId, from: SlotState, to: SlotState) -> Result<&Slot, StreamError> {
        let slot = self.slot(id)?;
        slot.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| slot)
            .map_err(|actual| {
                StreamError::InvalidState(format!(
                    "buffer {} is {:?}, expected {:?}",
                    id,
                    SlotState::from_u8(actual),
                    from
                ))
            })
    }
}
