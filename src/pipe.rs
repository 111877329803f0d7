//! The music pipe
//!
//! A FIFO of chunks connecting producer and consumers. Two usages share
//! this type:
//!
//! - the decoder pushes into a pipe that the player drains exclusively
//!   with [`MusicPipe::shift`], taking ownership of each chunk;
//! - the player pushes decorated chunks into the outputs' pipe, where
//!   every output holds an independent [`PipeCursor`] and a chunk returns
//!   to the [`MusicBuffer`] only after every cursor has passed it.
//!
//! Chunks are delivered to each cursor in exactly the order they were
//! pushed. The pipe is bounded only because the buffer is.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::audio::AudioFormat;
use crate::buffer::MusicBuffer;
use crate::chunk::MusicChunk;

pub struct MusicPipe {
    buffer: Arc<MusicBuffer>,
    inner: Mutex<PipeInner>,
}

struct PipeInner {
    chunks: VecDeque<Arc<MusicChunk>>,

    /// Serial number of the chunk at the front of `chunks`.
    base: u64,

    /// Per-cursor position: the serial of the next chunk to read.
    cursors: HashMap<usize, u64>,

    next_cursor_id: usize,

    /// Format of the chunks in flight; pushes must match.
    audio_format: Option<AudioFormat>,
}

/// A per-consumer read position over a [`MusicPipe`].
#[derive(Debug)]
pub struct PipeCursor {
    id: usize,
}

impl MusicPipe {
    pub fn new(buffer: Arc<MusicBuffer>) -> Self {
        MusicPipe {
            buffer,
            inner: Mutex::new(PipeInner {
                chunks: VecDeque::new(),
                base: 0,
                cursors: HashMap::new(),
                next_cursor_id: 0,
                audio_format: None,
            }),
        }
    }

    /// Append a chunk at the tail.
    ///
    /// Empty chunks are only admitted when they carry a tag.
    pub fn push(&self, chunk: MusicChunk) {
        let mut inner = self.inner.lock().unwrap();

        debug_assert!(!chunk.is_empty() || chunk.tag.is_some());
        if let Some(format) = chunk.audio_format {
            debug_assert_eq!(chunk.length() % format.frame_size(), 0);
            debug_assert!(
                inner.audio_format.is_none() || inner.audio_format == Some(format),
                "pipe format changed without a clear"
            );
            inner.audio_format = Some(format);
        }

        inner.chunks.push_back(Arc::new(chunk));
    }

    /// Chunks currently buffered.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The format the pipe currently carries.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.inner.lock().unwrap().audio_format
    }

    /// Take ownership of the head chunk.
    ///
    /// Only valid while no cursors are registered (the decoder-pipe usage,
    /// where the player is the sole consumer).
    pub fn shift(&self) -> Option<MusicChunk> {
        let mut inner = self.inner.lock().unwrap();
        assert!(
            inner.cursors.is_empty(),
            "shift on a pipe with registered cursors"
        );
        let arc = inner.chunks.pop_front()?;
        inner.base += 1;
        if inner.chunks.is_empty() {
            inner.audio_format = None;
        }
        match Arc::try_unwrap(arc) {
            Ok(chunk) => Some(chunk),
            Err(_) => unreachable!("pipe chunk shared without a cursor"),
        }
    }

    /// Register a new consumer, positioned at the current head.
    pub fn open_cursor(&self) -> PipeCursor {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_cursor_id;
        inner.next_cursor_id += 1;
        let base = inner.base;
        inner.cursors.insert(id, base);
        PipeCursor { id }
    }

    /// Drop a consumer; chunks it alone was holding back are reclaimed.
    pub fn close_cursor(&self, cursor: PipeCursor) {
        let mut inner = self.inner.lock().unwrap();
        inner.cursors.remove(&cursor.id);
        self.reclaim(&mut inner);
    }

    /// The chunk at the cursor's head, without advancing.
    pub fn peek(&self, cursor: &PipeCursor) -> Option<Arc<MusicChunk>> {
        let inner = self.inner.lock().unwrap();
        let pos = inner.cursors[&cursor.id];
        let tail = inner.base + inner.chunks.len() as u64;
        if pos >= tail {
            return None;
        }
        Some(Arc::clone(&inner.chunks[(pos - inner.base) as usize]))
    }

    /// Advance this cursor past `chunk`. When every cursor has passed it,
    /// the chunk is returned to the buffer.
    pub fn consume(&self, cursor: &PipeCursor, chunk: &Arc<MusicChunk>) {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.cursors[&cursor.id];
        debug_assert!(
            inner
                .chunks
                .get((pos - inner.base) as usize)
                .map(|head| Arc::ptr_eq(head, chunk))
                .unwrap_or(false),
            "consume of a chunk that is not this cursor's head"
        );
        inner.cursors.insert(cursor.id, pos + 1);
        self.reclaim(&mut inner);
    }

    /// This cursor abandons everything it has not read yet.
    pub fn cancel_cursor(&self, cursor: &PipeCursor) {
        let mut inner = self.inner.lock().unwrap();
        let tail = inner.base + inner.chunks.len() as u64;
        inner.cursors.insert(cursor.id, tail);
        self.reclaim(&mut inner);
    }

    /// Drop all buffered chunks, returning each to the buffer, and reset
    /// every cursor to the (now empty) head.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.chunks.len() as u64;
        while let Some(chunk) = inner.chunks.pop_front() {
            self.buffer.give_back_shared(chunk);
        }
        inner.base += count;
        inner.audio_format = None;
        let base = inner.base;
        for pos in inner.cursors.values_mut() {
            *pos = base;
        }
    }

    /// Pop chunks every registered cursor has passed.
    ///
    /// Does nothing when no cursors exist: an un-cursored pipe transfers
    /// ownership through `shift` instead.
    fn reclaim(&self, inner: &mut PipeInner) {
        if inner.cursors.is_empty() {
            return;
        }
        loop {
            let min = inner.cursors.values().copied().min().unwrap_or(inner.base);
            if min <= inner.base {
                break;
            }
            match inner.chunks.pop_front() {
                Some(chunk) => {
                    inner.base += 1;
                    self.buffer.give_back_shared(chunk);
                }
                None => break,
            }
        }
        if inner.chunks.is_empty() {
            inner.audio_format = None;
        }
    }
}
