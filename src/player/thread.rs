//! The player thread
//!
//! Owns transport state, sequences songs and orchestrates cross-fades: it
//! shifts chunks out of the decoder's pipe, decorates the tail of a song
//! with cross-fade mix state, and hands everything to the outputs. The
//! outer task loop services commands while stopped; one `Player` value
//! exists per playback session.

use std::sync::{Arc, MutexGuard};

use tracing::{debug, info, warn};

use crate::buffer::MusicBuffer;
use crate::chunk::{MusicChunk, IGNORE_REPLAY_GAIN};
use crate::decoder::{DecoderCommand, DecoderControl};
use crate::error::PlayerErrorKind;
use crate::events::IdleEvent;
use crate::pipe::MusicPipe;
use crate::player::control::{CoreState, PlayerCommand, PlayerControl, PlayerState};
use crate::song::DetachedSong;
use crate::time::{SignedSongTime, SongTime};

/// Outer loop of the player thread: services commands while stopped and
/// enters a playback session when a song arrives.
pub(crate) fn player_task(pc: Arc<PlayerControl>) {
    debug!("player thread running");
    let mut guard = pc.sync.lock();
    loop {
        match guard.player.command {
            PlayerCommand::Queue | PlayerCommand::Seek => {
                debug_assert!(guard.player.next_song.is_some());
                drop(guard);
                do_play(&pc);
                pc.listener.on_sync();
                guard = pc.sync.lock();
            }

            PlayerCommand::Stop => {
                drop(guard);
                pc.outputs.cancel();
                guard = pc.sync.lock();
                guard.player.next_song = None;
                finish_player_command(&pc, &mut guard);
            }

            PlayerCommand::Pause => {
                // No-op while stopped.
                guard.player.next_song = None;
                finish_player_command(&pc, &mut guard);
            }

            PlayerCommand::CloseAudio => {
                drop(guard);
                pc.outputs.release();
                guard = pc.sync.lock();
                guard.player.next_song = None;
                finish_player_command(&pc, &mut guard);
            }

            PlayerCommand::UpdateAudio => {
                drop(guard);
                pc.outputs.enable_disable();
                guard = pc.sync.lock();
                finish_player_command(&pc, &mut guard);
            }

            PlayerCommand::Cancel => {
                guard.player.next_song = None;
                finish_player_command(&pc, &mut guard);
            }

            PlayerCommand::Refresh => {
                finish_player_command(&pc, &mut guard);
            }

            PlayerCommand::Exit => {
                drop(guard);
                pc.dc.quit();
                pc.outputs.close();
                guard = pc.sync.lock();
                finish_player_command(&pc, &mut guard);
                debug!("player thread exiting");
                return;
            }

            PlayerCommand::None => {
                guard = pc.sync.cond.wait(guard).unwrap();
            }
        }
    }
}

fn finish_player_command(pc: &PlayerControl, guard: &mut MutexGuard<'_, CoreState>) {
    debug_assert_ne!(guard.player.command, PlayerCommand::None);
    guard.player.command = PlayerCommand::None;
    pc.sync.client_cond.notify_all();
}

fn do_play(pc: &Arc<PlayerControl>) {
    let buffer = Arc::clone(&pc.buffer);
    let pipe = Arc::new(MusicPipe::new(Arc::clone(&buffer)));
    let mut player = Player {
        pc: Arc::clone(pc),
        dc: Arc::clone(&pc.dc),
        buffer,
        pipe,
        queued: true,
        output_open: false,
        paused: false,
        song: None,
        play_audio_format: None,
        decoder_starting: false,
        buffering: true,
        xfade_state: CrossFadeState::Unknown,
        cross_fade_chunks: 0,
        cross_fade_tag: None,
        elapsed: SongTime::ZERO,
    };
    player.run();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossFadeState {
    /// Not decided yet for this song transition.
    Unknown,
    Disabled,
    Enabled,
}

struct Player {
    pc: Arc<PlayerControl>,
    dc: Arc<DecoderControl>,
    buffer: Arc<MusicBuffer>,

    /// The pipe of the song being played. The decoder may already be
    /// filling a different pipe (the next song).
    pipe: Arc<MusicPipe>,

    /// A next song is waiting to be handed to the decoder.
    queued: bool,

    output_open: bool,
    paused: bool,

    song: Option<DetachedSong>,

    /// The format the outputs were opened with (the decoder's output
    /// format of the current song).
    play_audio_format: Option<crate::audio::AudioFormat>,

    /// Between START and the decoder publishing its format.
    decoder_starting: bool,

    /// Pre-decode phase at the start of a song.
    buffering: bool,

    xfade_state: CrossFadeState,

    /// Number of tail chunks taking part in the cross-fade.
    cross_fade_chunks: usize,

    /// Tag of the incoming song, postponed until the fade completes.
    cross_fade_tag: Option<crate::song::Tag>,

    elapsed: SongTime,
}

impl Player {
    fn run(&mut self) {
        self.start_decoder(Arc::clone(&self.pipe));
        self.activate_decoder();

        {
            let mut guard = self.pc.sync.lock();
            guard.player.state = PlayerState::Play;
            if guard.player.command == PlayerCommand::Seek {
                self.elapsed = guard.player.seek_time;
                guard.player.elapsed_time = self.elapsed;
            }
            finish_player_command(&self.pc, &mut guard);
        }
        self.pc.idle.emit_lossy(IdleEvent::Player);

        let pc = Arc::clone(&self.pc);
        loop {
            let mut guard = pc.sync.lock();
            guard = self.process_command(&pc, guard);

            if matches!(
                guard.player.command,
                PlayerCommand::Stop | PlayerCommand::Exit | PlayerCommand::CloseAudio
            ) {
                break;
            }

            if guard.player.output_error_pending {
                // An output thread failed; complete the pause transition.
                guard.player.output_error_pending = false;
                drop(guard);
                self.paused = true;
                self.pc.outputs.pause();
                self.pc.idle.emit_lossy(IdleEvent::Player);
                continue;
            }
            drop(guard);

            if self.buffering {
                // Buffering at the start of the song: wait until enough
                // chunks are pre-decoded, to prevent stuttering.
                if self.pipe.size() < self.pc.buffered_before_play && !self.dc_lock_is_idle() {
                    if !self.paused
                        && self.output_open
                        && self.pc.outputs.check() < 4
                        && !self.send_silence()
                    {
                        break;
                    }
                    // Re-check under the lock so the decoder's final
                    // signal cannot slip between check and wait.
                    let guard = self.pc.sync.lock();
                    if guard.player.command == PlayerCommand::None
                        && !guard.decoder.is_idle()
                        && self.pipe.size() < self.pc.buffered_before_play
                    {
                        let _guard = self.pc.sync.cond.wait(guard).unwrap();
                    }
                    continue;
                }
                self.buffering = false;
            }

            if self.decoder_starting {
                if !self.check_decoder_startup() {
                    break;
                }
                continue;
            }

            if self.queued && self.decoder_idle_on_current_pipe() {
                // The decoder has finished the current song; let it start
                // decoding the queued one into a fresh pipe.
                let next_pipe = Arc::new(MusicPipe::new(Arc::clone(&self.buffer)));
                self.start_decoder(next_pipe);
            }

            if self.decoder_at_next_song()
                && self.xfade_state == CrossFadeState::Unknown
                && !self.dc_lock_is_starting()
            {
                self.plan_cross_fade();
            }

            if self.paused {
                let guard = self.pc.sync.lock();
                if guard.player.command == PlayerCommand::None {
                    let _guard = self.pc.sync.cond.wait(guard).unwrap();
                }
            } else if !self.pipe.is_empty() {
                if !self.play_next_chunk() {
                    break;
                }
            } else if self.decoder_at_next_song() {
                // The current song is drained and the decoder is already
                // on the next one.
                self.song_border();
            } else if self.dc_lock_is_idle() {
                // Decoder finished and the pipe is drained: session over.
                if self.pipe.is_empty() {
                    break;
                }
            } else {
                // The decoder is too slow; keep the outputs fed with
                // silence and wait for it to catch up. The idle re-check
                // under the lock avoids missing its final signal.
                if self.output_open && !self.send_silence() {
                    break;
                }
                let guard = self.pc.sync.lock();
                if guard.player.command == PlayerCommand::None
                    && !guard.decoder.is_idle()
                    && self.pipe.is_empty()
                {
                    let _guard = self.pc.sync.cond.wait(guard).unwrap();
                }
            }
        }

        self.stop_decoder();
        self.pipe.clear();
        self.cross_fade_tag = None;

        if let Some(song) = &self.song {
            info!(uri = %song.uri, "played");
        }

        {
            let mut guard = self.pc.sync.lock();
            guard.player.state = PlayerState::Stop;
        }
        self.pc.idle.emit_lossy(IdleEvent::Player);
    }

    /// Hand the queued song to the decoder, decoding into `pipe`.
    fn start_decoder(&mut self, pipe: Arc<MusicPipe>) {
        let (song, seek_time) = {
            let guard = self.pc.sync.lock();
            debug_assert!(self.queued || guard.player.command == PlayerCommand::Seek);
            let song = guard
                .player
                .next_song
                .clone()
                .expect("start_decoder without a next song");
            (song, guard.player.seek_time)
        };

        self.queued = false;
        let start = song.start_time + seek_time;
        let end = song.end_time;
        DecoderControl::start(&self.dc, song, start, end, Arc::clone(&self.buffer), pipe);
    }

    /// Make the decoder's song the current song.
    fn activate_decoder(&mut self) {
        let mut guard = self.pc.sync.lock();
        debug_assert!(
            guard.player.next_song.is_some(),
            "activate_decoder without a next song"
        );

        guard.player.tagged_song = None;
        self.song = guard.player.next_song.take();
        self.elapsed = guard.player.seek_time;
        guard.player.elapsed_time = self.elapsed;
        guard.player.bit_rate = 0;
        guard.player.audio_format = None;
        guard.player.total_time = self
            .song
            .as_ref()
            .map(song_duration_hint)
            .unwrap_or_else(SignedSongTime::negative);

        self.decoder_starting = true;
        self.buffering = true;
    }

    /// Observe decoder startup. Returns `false` when the decoder failed
    /// and the session must end.
    fn check_decoder_startup(&mut self) -> bool {
        debug_assert!(self.decoder_starting);
        let mut guard = self.pc.sync.lock();

        if guard.decoder.command == DecoderCommand::None && guard.decoder.has_failed() {
            let error = guard
                .decoder
                .error
                .clone()
                .expect("decoder ERROR without an error");
            guard.player.error = Some((PlayerErrorKind::Decoder, error));
            drop(guard);
            self.pc.idle.emit_lossy(IdleEvent::Player);
            return false;
        }

        if guard.decoder.is_starting() || guard.decoder.command != DecoderCommand::None {
            // Not ready yet; wait for the decoder to signal.
            let _guard = self.pc.sync.cond.wait(guard).unwrap();
            return true;
        }

        // The decoder is ready. If the outputs are still playing chunks of
        // the previous song, let them finish first: reopening with a new
        // format requires an empty outputs pipe.
        if self.output_open && !self.paused && self.pc.outputs.check() > 0 {
            drop(guard);
            self.wait_output_consumed(1);
            return true;
        }

        let song = self.song.as_ref().expect("startup without a current song");
        guard.player.total_time = real_song_duration(song, guard.decoder.total_time);
        guard.player.audio_format = guard.decoder.in_audio_format;
        let out_format = guard
            .decoder
            .out_audio_format
            .expect("decoder ready without a format");
        drop(guard);

        self.play_audio_format = Some(out_format);
        self.decoder_starting = false;

        if !self.paused {
            // Failure pauses the player; not fatal for the session.
            self.open_output();
        }
        true
    }

    fn wait_decoder_startup(&mut self) -> bool {
        while self.decoder_starting {
            if !self.check_decoder_startup() {
                // Forward the failure to the client waiting for the
                // command, if any.
                let mut guard = self.pc.sync.lock();
                if guard.player.command != PlayerCommand::None {
                    finish_player_command(&self.pc, &mut guard);
                }
                return false;
            }
        }
        true
    }

    fn open_output(&mut self) -> bool {
        let format = self
            .play_audio_format
            .expect("open_output without a format");
        match self.pc.outputs.open(format, &self.buffer) {
            Ok(()) => {
                self.output_open = true;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to open audio outputs");
                self.output_open = false;
                // Pause: the user may resume playback as soon as an audio
                // output becomes available.
                self.paused = true;
                let mut guard = self.pc.sync.lock();
                guard.player.error = Some((PlayerErrorKind::Output, Arc::new(e)));
                guard.player.state = PlayerState::Pause;
                drop(guard);
                self.pc.idle.emit_lossy(IdleEvent::Player);
                false
            }
        }
    }

    fn set_occupied(&self, occupied: bool) {
        let mut guard = self.pc.sync.lock();
        debug_assert_ne!(guard.player.occupied, occupied);
        guard.player.occupied = occupied;
    }

    fn dc_lock_is_idle(&self) -> bool {
        self.pc.sync.lock().decoder.is_idle()
    }

    fn dc_lock_is_starting(&self) -> bool {
        self.pc.sync.lock().decoder.is_starting()
    }

    fn decoder_at_next_song_locked(&self, state: &CoreState) -> bool {
        state
            .decoder
            .pipe
            .as_ref()
            .map(|p| !Arc::ptr_eq(p, &self.pipe))
            .unwrap_or(false)
    }

    /// The decoder is decoding (or has decoded) into a different pipe
    /// than the one being played: it is on the next song.
    fn decoder_at_next_song(&self) -> bool {
        let guard = self.pc.sync.lock();
        self.decoder_at_next_song_locked(&guard)
    }

    /// The decoder went idle while still attached to the current pipe.
    fn decoder_idle_on_current_pipe(&self) -> bool {
        let guard = self.pc.sync.lock();
        guard.decoder.is_idle()
            && guard
                .decoder
                .pipe
                .as_ref()
                .map(|p| Arc::ptr_eq(p, &self.pipe))
                .unwrap_or(false)
    }

    fn reset_cross_fade(&mut self) {
        self.xfade_state = CrossFadeState::Unknown;
        self.cross_fade_chunks = 0;
        self.cross_fade_tag = None;
    }

    /// Stop the decoder and drop whatever it decoded ahead.
    fn stop_decoder(&mut self) {
        self.set_occupied(true);
        self.dc.stop();

        let pipe = {
            let mut guard = self.pc.sync.lock();
            guard.decoder.pipe.take()
        };
        if let Some(pipe) = pipe {
            pipe.clear();
            // In case a cross-fade was in progress, cancel it.
            self.reset_cross_fade();
        }
        self.set_occupied(false);
    }

    /// Decide whether the upcoming song transition cross-fades, and over
    /// how many chunks.
    fn plan_cross_fade(&mut self) {
        let (settings, total_time, db, prev_db, start, prev_end, next_format) = {
            let guard = self.pc.sync.lock();
            (
                guard.player.cross_fade,
                guard.player.total_time,
                guard.decoder.replay_gain_db,
                guard.decoder.replay_gain_prev_db,
                guard.decoder.mix_ramp.start().map(String::from),
                guard.decoder.previous_mix_ramp.end().map(String::from),
                guard.decoder.out_audio_format,
            )
        };

        let (old_format, next_format) = match (self.play_audio_format, next_format) {
            (Some(old), Some(next)) => (old, next),
            _ => return,
        };

        let chunks = settings.calculate(
            total_time,
            db,
            prev_db,
            start.as_deref(),
            prev_end.as_deref(),
            next_format,
            old_format,
            self.buffer.capacity() * 3 / 4,
        );

        if chunks > 0 {
            self.xfade_state = CrossFadeState::Enabled;
            self.cross_fade_chunks = chunks;
            debug!(chunks, "cross-fade enabled");
        } else {
            self.xfade_state = CrossFadeState::Disabled;
        }
    }

    /// Keep the outputs busy while the decoder is not producing.
    fn send_silence(&mut self) -> bool {
        debug_assert!(self.output_open);
        let format = match self.play_audio_format {
            Some(f) => f,
            None => return true,
        };

        let mut chunk = match self.buffer.allocate() {
            Some(chunk) => chunk,
            None => return true,
        };
        // Do not disturb the replay-gain filter state.
        chunk.replay_gain_serial = IGNORE_REPLAY_GAIN;
        chunk.fill_silence(format);

        match self.pc.outputs.play(chunk) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to play silence");
                false
            }
        }
    }

    /// Wait until fewer than `threshold` chunks sit in the outputs pipe.
    fn wait_output_consumed(&self, threshold: usize) -> bool {
        let guard = self.pc.sync.lock();
        let mut result = self.pc.outputs.check() < threshold;
        if !result && guard.player.command == PlayerCommand::None {
            let _guard = self.pc.sync.cond.wait(guard).unwrap();
            result = self.pc.outputs.check() < threshold;
        }
        result
    }

    /// Move one chunk from the pipe to the outputs, decorating the song
    /// tail with cross-fade state.
    fn play_next_chunk(&mut self) -> bool {
        if !self.wait_output_consumed(64) {
            // The outputs pipe is still full; don't send another chunk.
            return true;
        }

        let mut chunk: Option<MusicChunk> = None;

        if self.xfade_state == CrossFadeState::Enabled && self.decoder_at_next_song() {
            let cross_fade_position = self.pipe.size();
            if cross_fade_position <= self.cross_fade_chunks {
                // Beginning (or middle) of the cross-fade.
                let dc_pipe = self
                    .pc
                    .sync
                    .lock()
                    .decoder
                    .pipe
                    .clone()
                    .expect("decoder at next song without a pipe");

                match dc_pipe.shift() {
                    Some(mut other) => {
                        let mut current =
                            self.pipe.shift().expect("cross-fade on an empty pipe");
                        debug_assert!(current.other.is_none());

                        // Don't send the incoming song's tag yet; postpone
                        // it until the current song is faded out.
                        if let Some(tag) = other.tag.take() {
                            self.cross_fade_tag = Some(match self.cross_fade_tag.take() {
                                Some(postponed) => postponed.merge(&tag),
                                None => tag,
                            });
                        }

                        let mixramp = {
                            let guard = self.pc.sync.lock();
                            guard.player.cross_fade.use_mixramp_ratio()
                        };
                        current.mix_ratio = if mixramp {
                            // Negative marks the MixRamp additive mode.
                            -1.0
                        } else {
                            cross_fade_position as f32 / self.cross_fade_chunks as f32
                        };

                        if other.is_empty() {
                            // A chunk that only carried a tag; its payload
                            // is gone, so skip the mix for this chunk.
                            self.buffer.give_back(other);
                        } else {
                            current.other = Some(Box::new(other));
                        }

                        chunk = Some(current);
                    }
                    None => {
                        // Not enough decoded chunks from the next song.
                        let guard = self.pc.sync.lock();
                        if guard.decoder.is_idle() {
                            // The decoder isn't running; abort the fade.
                            self.xfade_state = CrossFadeState::Disabled;
                        } else {
                            // Wait for the decoder to catch up.
                            self.pc.sync.decoder_cond.notify_all();
                            if guard.player.command == PlayerCommand::None
                                && dc_pipe.is_empty()
                            {
                                let _guard = self.pc.sync.cond.wait(guard).unwrap();
                            }
                            return true;
                        }
                    }
                }
            }
        }

        let mut chunk = match chunk {
            Some(chunk) => chunk,
            None => match self.pipe.shift() {
                Some(chunk) => chunk,
                None => return true,
            },
        };

        // Insert the postponed tag once cross-fading is over.
        if self.xfade_state != CrossFadeState::Enabled {
            if let Some(postponed) = self.cross_fade_tag.take() {
                chunk.tag = Some(match chunk.tag.take() {
                    Some(own) => postponed.merge(&own),
                    None => postponed,
                });
            }
        }

        if !self.play_chunk(chunk) {
            return true;
        }

        // Wake the decoder when its pipe has drained enough; decoding
        // larger blocks at a time is cheaper than per-chunk wakeups.
        let guard = self.pc.sync.lock();
        let dc_pipe_size = guard.decoder.pipe.as_ref().map(|p| p.size()).unwrap_or(0);
        if !guard.decoder.is_idle()
            && dc_pipe_size
                <= (self.pc.buffered_before_play + self.buffer.capacity() * 3) / 4
        {
            self.pc.sync.decoder_cond.notify_all();
        }
        true
    }

    /// Hand one chunk to the outputs, publishing its metadata.
    fn play_chunk(&mut self, chunk: MusicChunk) -> bool {
        // A tag update from the decoder: publish a retagged copy of the
        // current song for the queue owner.
        if let (Some(tag), Some(song)) = (&chunk.tag, &self.song) {
            let tagged = song.retagged(tag);
            {
                let mut guard = self.pc.sync.lock();
                guard.player.tagged_song = Some(tagged);
            }
            self.pc.idle.emit_lossy(IdleEvent::Player);
            self.pc.listener.on_tag_modified();
        }

        if chunk.is_empty() && chunk.tag.is_none() {
            self.buffer.give_back(chunk);
            return true;
        }

        {
            let mut guard = self.pc.sync.lock();
            guard.player.bit_rate = chunk.bit_rate;
            if let Some(t) = chunk.time.to_song_time() {
                self.elapsed = t;
                guard.player.elapsed_time = t;
            }
        }

        let seconds = chunk
            .audio_format
            .map(|f| chunk.length() as f64 / f.byte_rate() as f64)
            .unwrap_or(0.0);

        match self.pc.outputs.play(chunk) {
            Ok(()) => {
                let mut guard = self.pc.sync.lock();
                guard.player.total_play_time += seconds;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to hand chunk to outputs");
                self.paused = true;
                let mut guard = self.pc.sync.lock();
                guard.player.error = Some((PlayerErrorKind::Output, Arc::new(e)));
                guard.player.state = PlayerState::Pause;
                drop(guard);
                self.pc.idle.emit_lossy(IdleEvent::Player);
                false
            }
        }
    }

    /// The current song is drained: switch to the next song's pipe and
    /// make it current.
    fn song_border(&mut self) {
        if let Some(song) = &self.song {
            info!(uri = %song.uri, "played");
        }
        self.xfade_state = CrossFadeState::Unknown;
        self.cross_fade_chunks = 0;

        let next_pipe = self
            .pc
            .sync
            .lock()
            .decoder
            .pipe
            .clone()
            .expect("song border without a decoder pipe");
        self.pipe.clear();
        self.pipe = next_pipe;

        self.activate_decoder();
        self.pc.listener.on_sync();
        self.pc.idle.emit_lossy(IdleEvent::Player);

        let border_pause = {
            let mut guard = self.pc.sync.lock();
            if guard.player.border_pause {
                guard.player.state = PlayerState::Pause;
                true
            } else {
                false
            }
        };
        if border_pause {
            self.paused = true;
            self.pc.outputs.pause();
            self.pc.listener.on_border_pause();
            self.pc.idle.emit_lossy(IdleEvent::Player);
        }
    }

    /// Reposition within the current song, or restart the decoder when it
    /// is on the wrong song. Finishes the SEEK command itself.
    fn seek_decoder(&mut self) {
        let (target, seek_time) = {
            let guard = self.pc.sync.lock();
            let target = guard
                .player
                .next_song
                .clone()
                .expect("SEEK without a next song");
            (target, guard.player.seek_time)
        };
        let start_time = target.start_time;

        let on_target_song = {
            let guard = self.pc.sync.lock();
            guard.decoder.is_current_song(&target)
        };

        if !on_target_song {
            // The decoder is not on the seek target: restart it there.
            // The start offset it gets already includes the seek time.
            self.stop_decoder();
            self.pipe.clear();
            self.start_decoder(Arc::clone(&self.pipe));
            self.activate_decoder();

            if !self.wait_decoder_startup() {
                return;
            }

            self.pc.outputs.cancel();
        } else {
            if !self.decoder_at_current_song() {
                // The decoder is pre-decoding the same song file as the
                // seek target; adopt its pipe as the current one.
                let next_pipe = self
                    .pc
                    .sync
                    .lock()
                    .decoder
                    .pipe
                    .clone()
                    .expect("decoder without a pipe");
                self.pipe.clear();
                self.pipe = next_pipe;
                self.reset_cross_fade();
            }

            {
                let mut guard = self.pc.sync.lock();
                guard.player.next_song = None;
            }
            self.queued = false;

            if !self.wait_decoder_startup() {
                return;
            }

            // Clamp to the known duration before asking the decoder.
            let mut to = seek_time;
            {
                let guard = self.pc.sync.lock();
                if let Some(total) = guard.player.total_time.to_song_time() {
                    if to > total {
                        to = total;
                    }
                }
            }

            self.set_occupied(true);
            let result = self.dc.seek(to + start_time);
            self.set_occupied(false);

            match result {
                Ok(()) => {
                    // Drop everything decoded before the seek; the freed
                    // chunks may unblock the decoder, so signal it.
                    self.pipe.clear();
                    self.pc.outputs.cancel();
                    self.elapsed = to;
                    let mut guard = self.pc.sync.lock();
                    guard.player.elapsed_time = to;
                    self.pc.sync.decoder_cond.notify_all();
                }
                Err(e) => {
                    let mut guard = self.pc.sync.lock();
                    guard.player.error =
                        Some((PlayerErrorKind::Decoder, Arc::new(e)));
                    finish_player_command(&self.pc, &mut guard);
                    return;
                }
            }
        }

        {
            let mut guard = self.pc.sync.lock();
            finish_player_command(&self.pc, &mut guard);
        }

        // Refill the buffer after seeking.
        self.buffering = true;
        self.reset_cross_fade();
    }

    fn decoder_at_current_song(&self) -> bool {
        let guard = self.pc.sync.lock();
        guard
            .decoder
            .pipe
            .as_ref()
            .map(|p| Arc::ptr_eq(p, &self.pipe))
            .unwrap_or(false)
    }

    /// Handle one pending command while playing. The caller re-checks the
    /// slot for the session-ending commands.
    fn process_command<'a>(
        &mut self,
        pc: &'a Arc<PlayerControl>,
        mut guard: MutexGuard<'a, CoreState>,
    ) -> MutexGuard<'a, CoreState> {
        match guard.player.command {
            PlayerCommand::None
            | PlayerCommand::Stop
            | PlayerCommand::Exit
            | PlayerCommand::CloseAudio => guard,

            PlayerCommand::UpdateAudio => {
                drop(guard);
                pc.outputs.enable_disable();
                if self.output_open && !self.paused {
                    if let Some(format) = self.play_audio_format {
                        let _ = pc.outputs.open(format, &self.buffer);
                    }
                }
                let mut guard = pc.sync.lock();
                finish_player_command(pc, &mut guard);
                guard
            }

            PlayerCommand::Queue => {
                debug_assert!(guard.player.next_song.is_some());
                self.queued = true;
                finish_player_command(pc, &mut guard);
                guard
            }

            PlayerCommand::Pause => {
                self.paused = !self.paused;
                if self.paused {
                    drop(guard);
                    pc.outputs.pause();
                    guard = pc.sync.lock();
                    guard.player.state = PlayerState::Pause;
                } else if self.play_audio_format.is_none() {
                    // The decoder hasn't provided an audio format yet;
                    // the outputs will be opened when it becomes ready.
                    guard.player.state = PlayerState::Play;
                } else {
                    drop(guard);
                    self.open_output();
                    guard = pc.sync.lock();
                    guard.player.state = if self.paused {
                        PlayerState::Pause
                    } else {
                        PlayerState::Play
                    };
                }
                finish_player_command(pc, &mut guard);
                guard
            }

            PlayerCommand::Seek => {
                drop(guard);
                self.seek_decoder();
                pc.sync.lock()
            }

            PlayerCommand::Cancel => {
                if guard.player.next_song.is_none() {
                    // The cancel request arrived too late: the queued song
                    // is already being played. Stop everything.
                    guard.player.command = PlayerCommand::Stop;
                    return guard;
                }

                if self.decoder_at_next_song_locked(&guard) {
                    // The decoder already started the queued song; stop it
                    // and drop what it produced.
                    drop(guard);
                    self.stop_decoder();
                    guard = pc.sync.lock();
                }

                guard.player.next_song = None;
                self.queued = false;
                finish_player_command(pc, &mut guard);
                guard
            }

            PlayerCommand::Refresh => {
                guard.player.elapsed_time = self.elapsed;
                finish_player_command(pc, &mut guard);
                guard
            }
        }
    }
}

/// Duration as knowable from the song itself, before the decoder reports.
fn song_duration_hint(song: &DetachedSong) -> SignedSongTime {
    if !song.end_time.is_zero() {
        SignedSongTime::from(song.end_time - song.start_time)
    } else {
        SignedSongTime::negative()
    }
}

/// The duration the user cares about: play range applied to the decoder's
/// total.
fn real_song_duration(song: &DetachedSong, decoder_total: SignedSongTime) -> SignedSongTime {
    if !song.end_time.is_zero() {
        return SignedSongTime::from(song.end_time - song.start_time);
    }
    if !song.start_time.is_zero() {
        if let Some(total) = decoder_total.to_song_time() {
            return SignedSongTime::from(total - song.start_time);
        }
    }
    decoder_total
}
