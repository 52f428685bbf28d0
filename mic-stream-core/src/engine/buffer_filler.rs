use super::capture_engine::{CaptureHandle, FillNotification};
use crate::models::error::StreamError;
use crate::processing::buffer_pool::BufferId;

/// Packs arbitrarily sized PCM chunks into the engine's fixed-size buffers.
///
/// Device backends that deliver audio in their own packet sizes push bytes
/// here from the capture thread. Each buffer is completed as soon as it is
/// full, stamped with the stream position of its first byte.
#[derive(Debug)]
pub struct BufferFiller {
    handle: CaptureHandle,
    current: Option<BufferId>,
    written: usize,
    // Stream position in bytes, including audio dropped on underrun.
    position: usize,
    buffer_start: usize,
}

impl BufferFiller {
    pub fn new(handle: CaptureHandle) -> Self {
        Self {
            handle,
            current: None,
            written: 0,
            position: 0,
            buffer_start: 0,
        }
    }

    pub fn handle(&self) -> &CaptureHandle {
        &self.handle
    }

    /// Copy `pcm` into enqueued buffers, completing each one that fills.
    ///
    /// Returns the number of buffers completed. When the hardware queue runs
    /// dry the rest of `pcm` is dropped and `BufferUnderrun` is returned; the
    /// engine counts it and warns once per starvation episode.
    pub fn push(&mut self, mut pcm: &[u8]) -> Result<usize, StreamError> {
        let mut completed = 0;

        while !pcm.is_empty() {
            if !self.handle.is_running() {
                self.current = None;
                return Ok(completed);
            }

            let id = match self.current {
                Some(id) => id,
                None => match self.handle.next_buffer() {
                    Some(id) => {
                        self.current = Some(id);
                        self.written = 0;
                        self.buffer_start = self.position;
                        id
                    }
                    None => {
                        let dropped_bytes = pcm.len();
                        self.position += dropped_bytes;
                        self.handle.report_underrun(dropped_bytes);
                        return Err(StreamError::BufferUnderrun { dropped_bytes });
                    }
                },
            };

            let taken = match self.handle.write(id, pcm) {
                Ok(taken) => taken,
                Err(e) => {
                    self.current = None;
                    return Err(e);
                }
            };
            self.written += taken;
            self.position += taken;
            pcm = &pcm[taken..];

            if self.handle.remaining(id)? == 0 {
                self.complete(id, self.written);
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Complete a partially filled buffer, trimmed to whole frames.
    ///
    /// Returns whether a buffer was handed off.
    pub fn flush(&mut self) -> bool {
        let Some(id) = self.current else {
            return false;
        };
        let block_align = self.handle.format().block_align().max(1);
        let filled = self.written - self.written % block_align;
        if filled == 0 {
            return false;
        }
        self.complete(id, filled);
        true
    }

    fn complete(&mut self, id: BufferId, filled_len: usize) {
        let timestamp = self.handle.format().duration_of(self.buffer_start);
        self.current = None;
        self.handle.complete(FillNotification {
            buffer_id: id,
            filled_len,
            timestamp,
        });
    }
}
