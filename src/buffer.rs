//! The music buffer
//!
//! A bounded budget of [`MusicChunk`]s shared by everything that produces
//! or reclaims chunks. Allocation never blocks: when the budget is
//! exhausted, `allocate` returns `None` and the caller must wait for a
//! consumer to return chunks — that is the back-pressure channel between
//! outputs, player and decoder.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::chunk::MusicChunk;

pub struct MusicBuffer {
    capacity: usize,
    inner: Mutex<BufferInner>,
}

struct BufferInner {
    /// Recycled chunks, payload allocation intact.
    free: Vec<MusicChunk>,

    /// Chunks currently out in the wild (in a pipe, in a bridge, attached
    /// as a cross-fade `other`).
    allocated: usize,
}

impl MusicBuffer {
    /// Create a buffer holding at most `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        MusicBuffer {
            capacity,
            inner: Mutex::new(BufferInner {
                free: Vec::new(),
                allocated: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks currently allocated.
    pub fn allocated(&self) -> usize {
        self.inner.lock().unwrap().allocated
    }

    /// Take a chunk from the budget, or `None` when exhausted.
    pub fn allocate(&self) -> Option<MusicChunk> {
        let mut inner = self.inner.lock().unwrap();
        if inner.allocated >= self.capacity {
            debug!(capacity = self.capacity, "music buffer exhausted");
            return None;
        }
        inner.allocated += 1;
        Some(inner.free.pop().unwrap_or_else(MusicChunk::new))
    }

    /// Return a chunk (and any attached cross-fade chunk) to the budget.
    pub fn give_back(&self, mut chunk: MusicChunk) {
        let other = chunk.other.take();
        chunk.reset();

        let mut inner = self.inner.lock().unwrap();
        inner.allocated -= 1;
        inner.free.push(chunk);

        if let Some(other) = other {
            let mut other = *other;
            debug_assert!(other.other.is_none());
            other.reset();
            inner.allocated -= 1;
            inner.free.push(other);
        }
    }

    /// Return a possibly-shared chunk to the budget.
    ///
    /// When the reference is unique, the payload allocation is recycled;
    /// otherwise the budget is released and the memory is freed when the
    /// last clone drops.
    pub fn give_back_shared(&self, chunk: Arc<MusicChunk>) {
        match Arc::try_unwrap(chunk) {
            Ok(chunk) => self.give_back(chunk),
            Err(shared) => {
                let n = 1 + shared.other.is_some() as usize;
                let mut inner = self.inner.lock().unwrap();
                inner.allocated -= n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, SampleFormat};
    use crate::time::SignedSongTime;

    #[test]
    fn test_allocate_until_exhausted() {
        let buffer = MusicBuffer::new(2);
        let a = buffer.allocate().unwrap();
        let _b = buffer.allocate().unwrap();
        assert!(buffer.allocate().is_none());
        assert_eq!(buffer.allocated(), 2);

        buffer.give_back(a);
        assert_eq!(buffer.allocated(), 1);
        assert!(buffer.allocate().is_some());
    }

    #[test]
    fn test_give_back_recycles_cleared_chunk() {
        let buffer = MusicBuffer::new(1);
        let mut chunk = buffer.allocate().unwrap();
        let format = AudioFormat::new(44100, SampleFormat::S16, 2);
        chunk.write(format, SignedSongTime::ZERO, 0, &[1u8; 64]);
        buffer.give_back(chunk);

        let recycled = buffer.allocate().unwrap();
        assert!(recycled.is_empty());
        assert!(recycled.audio_format.is_none());
    }

    #[test]
    fn test_attached_other_is_returned_too() {
        let buffer = MusicBuffer::new(2);
        let mut chunk = buffer.allocate().unwrap();
        let other = buffer.allocate().unwrap();
        chunk.other = Some(Box::new(other));
        assert_eq!(buffer.allocated(), 2);

        buffer.give_back(chunk);
        assert_eq!(buffer.allocated(), 0);
    }

    #[test]
    fn test_shared_give_back_releases_budget() {
        let buffer = MusicBuffer::new(1);
        let chunk = Arc::new(buffer.allocate().unwrap());
        let clone = Arc::clone(&chunk);
        buffer.give_back_shared(chunk);
        assert_eq!(buffer.allocated(), 0);
        drop(clone);
        assert!(buffer.allocate().is_some());
    }
}
