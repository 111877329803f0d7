//! Per-output streaming source
//!
//! Each output drains the shared pipe at its own rate through one of
//! these: an independent cursor plus the output's private filter chain.
//! Replay-gain state is updated lazily through the chunk serial protocol,
//! and cross-fade chunks are mixed here, on the output thread, with no
//! lock held.

use std::sync::Arc;

use crate::audio::AudioFormat;
use crate::chunk::{MusicChunk, IGNORE_REPLAY_GAIN};
use crate::error::Result;
use crate::filter::{FilterChain, PreparedFilterChain, ReplayGainFilter};
use crate::pcm::{self, PcmDither};
use crate::pipe::{MusicPipe, PipeCursor};
use crate::replay_gain::{ReplayGainConfig, ReplayGainMode};
use crate::song::Tag;

pub(crate) struct OutputSource {
    pipe: Option<Arc<MusicPipe>>,
    cursor: Option<PipeCursor>,

    /// The format the pipe currently carries.
    in_audio_format: Option<AudioFormat>,

    replay_gain_filter: Option<ReplayGainFilter>,
    replay_gain_serial: u32,

    /// Separate filter and serial for the chunk being faded in; filter
    /// state is never shared across the two songs of a cross-fade.
    other_replay_gain_filter: Option<ReplayGainFilter>,
    other_replay_gain_serial: u32,

    filter: Option<FilterChain>,

    replay_gain_mode: ReplayGainMode,

    cross_fade_dither: PcmDither,

    current_chunk: Option<Arc<MusicChunk>>,
    pending_tag: Option<Tag>,
    pending_data: Vec<u8>,
    pending_offset: usize,
}

impl OutputSource {
    pub(crate) fn new() -> Self {
        OutputSource {
            pipe: None,
            cursor: None,
            in_audio_format: None,
            replay_gain_filter: None,
            replay_gain_serial: 0,
            other_replay_gain_filter: None,
            other_replay_gain_serial: 0,
            filter: None,
            replay_gain_mode: ReplayGainMode::Off,
            cross_fade_dither: PcmDither::new(),
            current_chunk: None,
            pending_tag: None,
            pending_data: Vec::new(),
            pending_offset: 0,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.in_audio_format.is_some()
    }

    pub(crate) fn set_replay_gain_mode(&mut self, mode: ReplayGainMode) {
        self.replay_gain_mode = mode;
    }

    /// Bind to `pipe` and (re)open the filter chain for `format`.
    ///
    /// Returns the sink-facing output format. The filter chain is reopened
    /// on any input format change; a failure leaves no partially opened
    /// filters behind.
    pub(crate) fn open(
        &mut self,
        format: AudioFormat,
        pipe: &Arc<MusicPipe>,
        replay_gain_config: ReplayGainConfig,
        prepared_filter: &PreparedFilterChain,
    ) -> Result<AudioFormat> {
        debug_assert!(format.is_valid());

        let rebind = match &self.pipe {
            Some(current) => !Arc::ptr_eq(current, pipe),
            None => true,
        };
        if rebind {
            self.unbind_pipe();
            self.cursor = Some(pipe.open_cursor());
            self.pipe = Some(Arc::clone(pipe));
        }

        if self.filter.is_some() && self.in_audio_format != Some(format) {
            // The filter must be reopened on all input format changes.
            self.close_filter();
        }

        if self.filter.is_none() {
            self.open_filter(format, replay_gain_config, prepared_filter)?;
        }

        self.in_audio_format = Some(format);
        Ok(self
            .filter
            .as_ref()
            .expect("filter opened above")
            .out_audio_format())
    }

    fn open_filter(
        &mut self,
        format: AudioFormat,
        replay_gain_config: ReplayGainConfig,
        prepared_filter: &PreparedFilterChain,
    ) -> Result<()> {
        self.replay_gain_serial = 0;
        self.other_replay_gain_serial = 0;
        self.replay_gain_filter = Some(ReplayGainFilter::open(replay_gain_config, format));
        self.other_replay_gain_filter = Some(ReplayGainFilter::open(replay_gain_config, format));

        match prepared_filter.open(format) {
            Ok(chain) => {
                self.filter = Some(chain);
                Ok(())
            }
            Err(e) => {
                self.close_filter();
                Err(e)
            }
        }
    }

    fn close_filter(&mut self) {
        self.replay_gain_filter = None;
        self.other_replay_gain_filter = None;
        self.filter = None;
    }

    fn unbind_pipe(&mut self) {
        if let (Some(pipe), Some(cursor)) = (self.pipe.take(), self.cursor.take()) {
            pipe.close_cursor(cursor);
        }
    }

    pub(crate) fn close(&mut self) {
        debug_assert!(self.is_open());
        self.in_audio_format = None;
        self.cancel();
        self.close_filter();
        self.unbind_pipe();
    }

    /// Drop the chunk in flight and everything queued for this cursor;
    /// reset all filter state so the next chunk starts clean.
    pub(crate) fn cancel(&mut self) {
        self.current_chunk = None;
        self.pending_tag = None;
        self.pending_data.clear();
        self.pending_offset = 0;

        if let (Some(pipe), Some(cursor)) = (&self.pipe, &self.cursor) {
            pipe.cancel_cursor(cursor);
        }

        self.replay_gain_serial = 0;
        self.other_replay_gain_serial = 0;
        if let Some(f) = &mut self.replay_gain_filter {
            f.reset();
        }
        if let Some(f) = &mut self.other_replay_gain_filter {
            f.reset();
        }
        if let Some(f) = &mut self.filter {
            f.reset();
        }
        self.cross_fade_dither.reset();
    }

    /// Make PCM available for the sink.
    ///
    /// Returns `false` when the pipe has nothing for this cursor. On a
    /// filter failure the chunk is dropped from this source (but not
    /// consumed from the pipe) and the error propagates to the output
    /// thread.
    pub(crate) fn fill(&mut self) -> Result<bool> {
        if self.current_chunk.is_some()
            && self.pending_tag.is_none()
            && self.pending_remaining() == 0
        {
            let chunk = self.current_chunk.take().expect("checked above");
            self.consume_chunk(&chunk);
        }

        if self.current_chunk.is_some() {
            return Ok(true);
        }

        let chunk = match (&self.pipe, &self.cursor) {
            (Some(pipe), Some(cursor)) => match pipe.peek(cursor) {
                Some(chunk) => chunk,
                None => return Ok(false),
            },
            _ => return Ok(false),
        };

        self.pending_tag = chunk.tag.clone();
        self.current_chunk = Some(Arc::clone(&chunk));

        match self.filter_chunk(&chunk) {
            Ok(data) => {
                self.pending_data = data;
                self.pending_offset = 0;
                Ok(true)
            }
            Err(e) => {
                self.current_chunk = None;
                Err(e)
            }
        }
    }

    /// The tag to deliver before the next PCM write, if any.
    pub(crate) fn take_pending_tag(&mut self) -> Option<Tag> {
        self.pending_tag.take()
    }

    pub(crate) fn pending(&self) -> &[u8] {
        &self.pending_data[self.pending_offset..]
    }

    fn pending_remaining(&self) -> usize {
        self.pending_data.len() - self.pending_offset
    }

    /// The sink consumed `nbytes`; when the chunk's data is gone, advance
    /// the pipe cursor.
    pub(crate) fn consume_data(&mut self, nbytes: usize) {
        self.pending_offset += nbytes;
        if self.pending_remaining() == 0 {
            self.pending_data.clear();
            self.pending_offset = 0;
            if let Some(chunk) = self.current_chunk.take() {
                self.consume_chunk(&chunk);
            }
        }
    }

    fn consume_chunk(&self, chunk: &Arc<MusicChunk>) {
        if let (Some(pipe), Some(cursor)) = (&self.pipe, &self.cursor) {
            pipe.consume(cursor, chunk);
        }
    }

    /// Produce the PCM to write for `chunk`: replay gain, then the
    /// cross-fade mix with `chunk.other`, then the main filter chain.
    fn filter_chunk(&mut self, chunk: &MusicChunk) -> Result<Vec<u8>> {
        let format = self.in_audio_format.expect("source not open");

        let data = Self::chunk_pcm(
            chunk,
            format,
            self.replay_gain_mode,
            &mut self.replay_gain_filter,
            &mut self.replay_gain_serial,
        );
        if data.is_empty() {
            return Ok(data);
        }

        let data = match chunk.other.as_deref() {
            None => data,
            Some(other) => {
                let other_data = Self::chunk_pcm(
                    other,
                    format,
                    self.replay_gain_mode,
                    &mut self.other_replay_gain_filter,
                    &mut self.other_replay_gain_serial,
                );
                if other_data.is_empty() {
                    data
                } else {
                    // If the "other" chunk is longer, its trailer is used
                    // as-is without mixing: it is the next song fading in,
                    // and a rest means cross-fading ends here.
                    let len = data.len().min(other_data.len());

                    let mut ratio = chunk.mix_ratio;
                    if ratio >= 0.0 {
                        // The mixer's portion argument is the share of its
                        // destination, which holds the incoming song.
                        ratio = 1.0 - ratio;
                    }

                    let mut dest = other_data;
                    pcm::mix(
                        &mut self.cross_fade_dither,
                        &mut dest,
                        &data[..len],
                        format.format,
                        ratio,
                    );
                    dest
                }
            }
        };

        self.filter
            .as_mut()
            .expect("source not open")
            .filter(&data)
    }

    fn chunk_pcm(
        chunk: &MusicChunk,
        format: AudioFormat,
        mode: ReplayGainMode,
        filter: &mut Option<ReplayGainFilter>,
        serial: &mut u32,
    ) -> Vec<u8> {
        debug_assert!(chunk.check_format(&format));
        debug_assert_eq!(chunk.length() % format.frame_size(), 0);

        let data = chunk.data();
        if data.is_empty() {
            return Vec::new();
        }

        match filter {
            None => data.to_vec(),
            Some(filter) => {
                filter.set_mode(mode);

                if chunk.replay_gain_serial != *serial
                    && chunk.replay_gain_serial != IGNORE_REPLAY_GAIN
                {
                    filter.set_info(if chunk.replay_gain_serial != 0 {
                        chunk.replay_gain_info
                    } else {
                        None
                    });
                    *serial = chunk.replay_gain_serial;
                }

                filter.filter(data)
            }
        }
    }
}
