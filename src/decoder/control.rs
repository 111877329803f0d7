//! Decoder thread control
//!
//! The decoder's shared state lives under the *player's* mutex so that
//! both threads can coordinate with a pair of condition variables: the
//! decoder waits on its own condvar; the decoder's "client" condvar is the
//! player's, so finishing a command wakes the player directly.
//!
//! The command protocol: the player sets `command`, signals the decoder,
//! and (for the synchronous variants) waits until the decoder has cleared
//! it at a safe observation point. `DECODE` is ongoing by design — the
//! acknowledgement only means the command was taken, not that decoding is
//! complete.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::audio::AudioFormat;
use crate::buffer::MusicBuffer;
use crate::decoder::plugin::DecoderPlugin;
use crate::decoder::thread::decoder_thread;
use crate::error::{Error, Result};
use crate::mixramp::MixRampInfo;
use crate::pipe::MusicPipe;
use crate::player::{CoreState, CoreSync};
use crate::replay_gain::{ReplayGainConfig, ReplayGainMode};
use crate::song::DetachedSong;
use crate::time::{SignedSongTime, SongTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Stop,
    Start,
    Decode,

    /// The last START failed: I/O error or no plugin could decode the
    /// song. Only reachable from START; once DECODE is reached, no such
    /// error can occur.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderCommand {
    None,
    Start,
    Stop,
    Seek,
}

/// Decoder state guarded by the shared core mutex.
pub(crate) struct DecoderInner {
    pub(crate) state: DecoderState,
    pub(crate) command: DecoderCommand,

    /// Valid only in state [`DecoderState::Error`]; cleared when leaving
    /// that state.
    pub(crate) error: Option<Arc<Error>>,

    pub(crate) quit: bool,

    pub(crate) seek_error: bool,
    pub(crate) seekable: bool,
    pub(crate) seek_time: SongTime,

    /// The format of the song file.
    pub(crate) in_audio_format: Option<AudioFormat>,

    /// The format being written into the pipe.
    pub(crate) out_audio_format: Option<AudioFormat>,

    /// The song being decoded; set by the player with the START command.
    pub(crate) song: Option<DetachedSong>,
    pub(crate) start_time: SongTime,
    pub(crate) end_time: SongTime,
    pub(crate) total_time: SignedSongTime,

    /// Chunk allocator and destination pipe, provided by the player.
    pub(crate) buffer: Option<Arc<MusicBuffer>>,
    pub(crate) pipe: Option<Arc<MusicPipe>>,

    pub(crate) replay_gain_mode: ReplayGainMode,

    /// The dB actually applied to the current / previous song; feeds the
    /// MixRamp threshold adjustment.
    pub(crate) replay_gain_db: f32,
    pub(crate) replay_gain_prev_db: f32,

    pub(crate) mix_ramp: MixRampInfo,
    pub(crate) previous_mix_ramp: MixRampInfo,
}

impl DecoderInner {
    pub(crate) fn new(replay_gain_mode: ReplayGainMode) -> Self {
        DecoderInner {
            state: DecoderState::Stop,
            command: DecoderCommand::None,
            error: None,
            quit: false,
            seek_error: false,
            seekable: false,
            seek_time: SongTime::ZERO,
            in_audio_format: None,
            out_audio_format: None,
            song: None,
            start_time: SongTime::ZERO,
            end_time: SongTime::ZERO,
            total_time: SignedSongTime::negative(),
            buffer: None,
            pipe: None,
            replay_gain_mode,
            replay_gain_db: 0.0,
            replay_gain_prev_db: 0.0,
            mix_ramp: MixRampInfo::default(),
            previous_mix_ramp: MixRampInfo::default(),
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.state, DecoderState::Stop | DecoderState::Error)
    }

    pub(crate) fn is_starting(&self) -> bool {
        self.state == DecoderState::Start
    }

    pub(crate) fn has_failed(&self) -> bool {
        debug_assert_eq!(self.command, DecoderCommand::None);
        self.state == DecoderState::Error
    }

    /// Leaving ERROR goes through STOP.
    pub(crate) fn clear_error(&mut self) {
        if self.state == DecoderState::Error {
            self.error = None;
            self.state = DecoderState::Stop;
        }
    }

    /// Whether `song` is the one currently being decoded (or started).
    pub(crate) fn is_current_song(&self, song: &DetachedSong) -> bool {
        match self.state {
            DecoderState::Start | DecoderState::Decode => self
                .song
                .as_ref()
                .map(|current| current.is_same_song(song))
                .unwrap_or(false),
            DecoderState::Stop | DecoderState::Error => false,
        }
    }

    /// Move the end ramp to "previous" and clear the current pair; called
    /// when decoding of the next song begins.
    pub(crate) fn cycle_mix_ramp(&mut self) {
        self.previous_mix_ramp = std::mem::take(&mut self.mix_ramp);
    }
}

/// Handle owned by the player controlling the decoder thread.
pub struct DecoderControl {
    pub(crate) sync: Arc<CoreSync>,
    pub(crate) plugins: Vec<Arc<dyn DecoderPlugin>>,
    pub(crate) configured_audio_format: Option<AudioFormat>,
    pub(crate) replay_gain_config: ReplayGainConfig,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DecoderControl {
    pub(crate) fn new(
        sync: Arc<CoreSync>,
        plugins: Vec<Arc<dyn DecoderPlugin>>,
        configured_audio_format: Option<AudioFormat>,
        replay_gain_config: ReplayGainConfig,
    ) -> Arc<Self> {
        Arc::new(DecoderControl {
            sync,
            plugins,
            configured_audio_format,
            replay_gain_config,
            thread: Mutex::new(None),
        })
    }

    pub(crate) fn select_plugin(&self, uri: &str) -> Option<Arc<dyn DecoderPlugin>> {
        self.plugins.iter().find(|p| p.supports_uri(uri)).cloned()
    }

    fn ensure_thread(this: &Arc<Self>) {
        let mut thread = this.thread.lock().unwrap();
        if thread.is_none() {
            let dc = Arc::clone(this);
            *thread = Some(
                std::thread::Builder::new()
                    .name("decoder".to_string())
                    .spawn(move || decoder_thread(dc))
                    .expect("spawning the decoder thread"),
            );
            info!("decoder thread started");
        }
    }

    fn synchronous_command<'a>(
        &self,
        mut guard: MutexGuard<'a, CoreState>,
        command: DecoderCommand,
    ) -> MutexGuard<'a, CoreState> {
        guard.decoder.command = command;
        self.sync.decoder_cond.notify_all();
        while guard.decoder.command != DecoderCommand::None {
            guard = self.sync.cond.wait(guard).unwrap();
        }
        guard
    }

    /// Start decoding `song` into `pipe`. Returns once the decoder thread
    /// has taken the command; startup completion is observed separately
    /// via the state (DECODE or ERROR).
    pub(crate) fn start(
        this: &Arc<Self>,
        song: DetachedSong,
        start_time: SongTime,
        end_time: SongTime,
        buffer: Arc<MusicBuffer>,
        pipe: Arc<MusicPipe>,
    ) {
        Self::ensure_thread(this);

        let mut guard = this.sync.lock();
        debug_assert!(guard.decoder.is_idle());
        guard.decoder.clear_error();
        debug!(uri = %song.uri, "starting decoder");
        guard.decoder.song = Some(song);
        guard.decoder.start_time = start_time;
        guard.decoder.end_time = end_time;
        guard.decoder.buffer = Some(buffer);
        guard.decoder.pipe = Some(pipe);
        let _guard = this.synchronous_command(guard, DecoderCommand::Start);
    }

    pub(crate) fn stop(&self) {
        let mut guard = self.sync.lock();

        if guard.decoder.command != DecoderCommand::None {
            // Cancel whatever is pending; if the decoder was already
            // executing it, the second STOP below still applies.
            guard = self.synchronous_command(guard, DecoderCommand::Stop);
        }

        if !guard.decoder.is_idle() {
            let _guard = self.synchronous_command(guard, DecoderCommand::Stop);
        }
    }

    /// Ask the decoder to reposition. The acknowledgement guarantees that
    /// no chunk decoded before `t` will be pushed afterwards.
    pub(crate) fn seek(&self, t: SongTime) -> Result<()> {
        let mut guard = self.sync.lock();
        debug_assert!(matches!(
            guard.decoder.state,
            DecoderState::Decode | DecoderState::Start
        ));

        if !guard.decoder.seekable {
            return Err(Error::NotSeekable);
        }

        guard.decoder.seek_time = t;
        guard.decoder.seek_error = false;
        guard = self.synchronous_command(guard, DecoderCommand::Seek);

        if guard.decoder.seek_error {
            Err(Error::SeekFailed)
        } else {
            Ok(())
        }
    }

    /// Terminate the decoder thread.
    pub(crate) fn quit(&self) {
        {
            let mut guard = self.sync.lock();
            guard.decoder.quit = true;
            self.sync.decoder_cond.notify_all();
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
            info!("decoder thread joined");
        }
    }
}
