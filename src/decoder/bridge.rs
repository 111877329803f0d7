//! The decoder bridge
//!
//! What a decoder plugin talks to: it assembles submitted PCM into chunks,
//! stamps them with timestamps and replay-gain serials, pushes them into
//! the pipe, and surfaces pending player commands at chunk boundaries.
//!
//! The bridge also synthesizes the *initial* seek: when a song has a start
//! offset, the plugin sees an ordinary Seek command before any data flows,
//! without the player being involved.

use std::sync::Arc;

use tracing::warn;

use crate::audio::AudioFormat;
use crate::buffer::MusicBuffer;
use crate::chunk::MusicChunk;
use crate::decoder::control::{DecoderCommand, DecoderControl, DecoderState};
use crate::error::{Error, Result};
use crate::mixramp::MixRampInfo;
use crate::pcm;
use crate::pipe::MusicPipe;
use crate::replay_gain::{next_replay_gain_serial, ReplayGainInfo};
use crate::song::Tag;
use crate::time::{SignedSongTime, SongTime};

pub struct DecoderBridge {
    dc: Arc<DecoderControl>,
    buffer: Arc<MusicBuffer>,
    pipe: Arc<MusicPipe>,

    /// Where decoding begins (the song's start offset plus any pending
    /// seek); surfaced to the plugin as the initial Seek.
    initial_position: SongTime,

    /// The song's start offset; chunk timestamps are relative to it.
    time_base: SongTime,

    /// Zero means "play to the end of the file".
    song_end: SongTime,

    in_format: Option<AudioFormat>,
    out_format: Option<AudioFormat>,
    ready_called: bool,

    /// Stream-absolute position of the next submitted sample, in seconds.
    timestamp: f64,

    current: Option<MusicChunk>,

    replay_gain_serial: u32,
    replay_gain_info: Option<ReplayGainInfo>,

    initial_seek_pending: bool,
    initial_seek_running: bool,

    /// A bridge-side fatal condition; turns into the decode result.
    error: Option<Error>,
}

impl DecoderBridge {
    pub(crate) fn new(
        dc: Arc<DecoderControl>,
        buffer: Arc<MusicBuffer>,
        pipe: Arc<MusicPipe>,
        initial_position: SongTime,
        time_base: SongTime,
        song_end: SongTime,
    ) -> Self {
        DecoderBridge {
            dc,
            buffer,
            pipe,
            initial_position,
            time_base,
            song_end,
            in_format: None,
            out_format: None,
            ready_called: false,
            timestamp: 0.0,
            current: None,
            replay_gain_serial: 0,
            replay_gain_info: None,
            initial_seek_pending: !initial_position.is_zero(),
            initial_seek_running: false,
            error: None,
        }
    }

    pub(crate) fn was_ready(&self) -> bool {
        self.ready_called
    }

    /// Publish the stream parameters and transition the decoder to DECODE.
    ///
    /// Must be called exactly once, before any data is submitted. Fails
    /// when the configured output format would require a conversion the
    /// core cannot perform (sample-rate change).
    pub fn ready(
        &mut self,
        format: AudioFormat,
        seekable: bool,
        duration: SignedSongTime,
    ) -> Result<()> {
        assert!(!self.ready_called, "ready() called twice");

        let out = match self.dc.configured_audio_format {
            Some(configured) => {
                if configured.sample_rate != format.sample_rate {
                    return Err(Error::UnsupportedConversion {
                        from: format,
                        to: configured,
                    });
                }
                configured
            }
            None => format,
        };

        self.in_format = Some(format);
        self.out_format = Some(out);
        self.ready_called = true;

        let mut guard = self.dc.sync.lock();
        guard.decoder.in_audio_format = Some(format);
        guard.decoder.out_audio_format = Some(out);
        guard.decoder.seekable = seekable;
        guard.decoder.total_time = duration;
        guard.decoder.state = DecoderState::Decode;
        drop(guard);
        self.dc.sync.cond.notify_all();
        Ok(())
    }

    /// The command the plugin must react to, if any.
    ///
    /// A pending start offset is surfaced as a Seek before anything else.
    pub fn get_command(&mut self) -> DecoderCommand {
        if self.error.is_some() {
            return DecoderCommand::Stop;
        }

        let guard = self.dc.sync.lock();
        if guard.decoder.quit {
            return DecoderCommand::Stop;
        }
        match guard.decoder.command {
            cmd @ (DecoderCommand::Stop | DecoderCommand::Seek) => cmd,
            _ => {
                drop(guard);
                if self.initial_seek_pending {
                    self.initial_seek_pending = false;
                    self.initial_seek_running = true;
                    DecoderCommand::Seek
                } else {
                    DecoderCommand::None
                }
            }
        }
    }

    /// The target of the current Seek command, stream-absolute.
    pub fn seek_time(&self) -> SongTime {
        if self.initial_seek_running {
            return self.initial_position;
        }
        self.dc.sync.lock().decoder.seek_time
    }

    /// Acknowledge the current command.
    ///
    /// For a Seek this discards the partially filled chunk and restarts
    /// the timestamps at the target, so nothing decoded before the seek
    /// can be delivered afterwards.
    pub fn command_finished(&mut self) {
        if self.initial_seek_running {
            self.initial_seek_running = false;
            self.timestamp = self.initial_position.as_secs_f64();
            return;
        }

        let mut guard = self.dc.sync.lock();
        debug_assert_ne!(guard.decoder.command, DecoderCommand::None);
        if guard.decoder.command == DecoderCommand::Seek {
            if let Some(chunk) = self.current.take() {
                self.buffer.give_back(chunk);
            }
            self.timestamp = guard.decoder.seek_time.as_secs_f64();
        }
        guard.decoder.command = DecoderCommand::None;
        drop(guard);
        self.dc.sync.cond.notify_all();
    }

    /// Report that the requested seek is impossible.
    pub fn seek_error(&mut self) {
        if self.initial_seek_running {
            self.initial_seek_running = false;
            self.error = Some(Error::SeekFailed);
            return;
        }

        let mut guard = self.dc.sync.lock();
        debug_assert_eq!(guard.decoder.command, DecoderCommand::Seek);
        guard.decoder.seek_error = true;
        guard.decoder.command = DecoderCommand::None;
        drop(guard);
        self.dc.sync.cond.notify_all();
    }

    /// Submit decoded PCM in the stream's input format.
    ///
    /// Returns the command the plugin must handle before submitting more;
    /// [`DecoderCommand::None`] means keep decoding.
    pub fn submit_data(&mut self, data: &[u8], bit_rate: u16) -> DecoderCommand {
        let cmd = self.get_command();
        if cmd != DecoderCommand::None {
            return cmd;
        }

        let in_format = self.in_format.expect("submit_data before ready()");
        let out_format = self.out_format.expect("submit_data before ready()");

        let converted;
        let rest: &[u8] = if in_format != out_format {
            match pcm::convert(data, in_format, out_format) {
                Ok(buf) => {
                    converted = buf;
                    &converted
                }
                Err(e) => {
                    self.error = Some(e);
                    return DecoderCommand::Stop;
                }
            }
        } else {
            data
        };

        // Only whole frames enter the pipe.
        let frame_size = out_format.frame_size();
        let mut rest = &rest[..rest.len() - rest.len() % frame_size];

        while !rest.is_empty() {
            if self.current.is_none() {
                match self.allocate_chunk() {
                    Ok(chunk) => self.current = Some(chunk),
                    Err(cmd) => return cmd,
                }
            }

            let time = SignedSongTime::from_secs_f64(
                self.timestamp - self.time_base.as_secs_f64(),
            );
            let chunk = self.current.as_mut().expect("chunk allocated above");
            let n = chunk.write(out_format, time, bit_rate, rest);
            if n == 0 {
                self.flush();
                continue;
            }

            rest = &rest[n..];
            self.timestamp += n as f64 / out_format.byte_rate() as f64;

            if !self.song_end.is_zero() && self.timestamp >= self.song_end.as_secs_f64() {
                // End offset reached: this song is done.
                self.flush();
                return DecoderCommand::Stop;
            }
        }

        DecoderCommand::None
    }

    /// Publish an updated tag snapshot; it will reach the sinks before the
    /// following PCM.
    pub fn submit_tag(&mut self, tag: Tag) -> DecoderCommand {
        let cmd = self.get_command();
        if cmd != DecoderCommand::None {
            return cmd;
        }

        self.flush();
        match self.allocate_chunk() {
            Ok(mut chunk) => {
                chunk.tag = Some(tag);
                self.current = Some(chunk);
                DecoderCommand::None
            }
            Err(cmd) => cmd,
        }
    }

    /// Publish new replay-gain info (or its absence) for the following
    /// chunks. This is the only channel coordinating filter updates across
    /// threads.
    pub fn submit_replay_gain(&mut self, info: Option<ReplayGainInfo>) {
        match info {
            Some(info) if info.is_defined() => {
                self.replay_gain_serial = next_replay_gain_serial();
                self.replay_gain_info = Some(info);

                let mut guard = self.dc.sync.lock();
                let mode = guard.decoder.replay_gain_mode;
                if let Some(tuple) = info.get(mode) {
                    let scale = tuple.calc_scale(&self.dc.replay_gain_config);
                    guard.decoder.replay_gain_db = 20.0 * scale.max(f32::MIN_POSITIVE).log10();
                }
            }
            _ => {
                self.replay_gain_serial = 0;
                self.replay_gain_info = None;
            }
        }
    }

    /// Publish the song's MixRamp tags.
    pub fn submit_mix_ramp(&mut self, mix_ramp: MixRampInfo) {
        self.dc.sync.lock().decoder.mix_ramp = mix_ramp;
    }

    /// Wait for a free chunk, reacting to commands while blocked.
    fn allocate_chunk(&mut self) -> std::result::Result<MusicChunk, DecoderCommand> {
        let mut guard = self.dc.sync.lock();
        loop {
            if guard.decoder.quit {
                return Err(DecoderCommand::Stop);
            }
            match guard.decoder.command {
                cmd @ (DecoderCommand::Stop | DecoderCommand::Seek) => return Err(cmd),
                _ => {}
            }

            if let Some(mut chunk) = self.buffer.allocate() {
                chunk.replay_gain_serial = self.replay_gain_serial;
                if self.replay_gain_serial != 0 {
                    chunk.replay_gain_info = self.replay_gain_info;
                }
                return Ok(chunk);
            }

            // Buffer dry: wait for the player to report consumed chunks.
            guard = self.dc.sync.decoder_cond.wait(guard).unwrap();
        }
    }

    /// Push the current chunk into the pipe and wake the player.
    fn flush(&mut self) {
        if let Some(chunk) = self.current.take() {
            if chunk.is_empty() && chunk.tag.is_none() {
                self.buffer.give_back(chunk);
                return;
            }
            self.pipe.push(chunk);
            let _guard = self.dc.sync.lock();
            self.dc.sync.cond.notify_all();
        }
    }

    /// Finalize the decode run: flush pending data on success, fold any
    /// bridge-side failure into the result.
    pub(crate) fn finish(&mut self, result: Result<()>) -> Result<()> {
        if let Some(error) = self.error.take() {
            warn!(error = %error, "decoder bridge failure");
            return Err(error);
        }

        let result = result.and_then(|()| {
            if self.ready_called {
                Ok(())
            } else {
                Err(Error::Decode {
                    uri: String::new(),
                    message: "decoder plugin finished without becoming ready".to_string(),
                })
            }
        });

        if result.is_ok() {
            self.flush();
        }
        result
    }
}

impl Drop for DecoderBridge {
    fn drop(&mut self) {
        if let Some(chunk) = self.current.take() {
            self.buffer.give_back(chunk);
        }
    }
}
