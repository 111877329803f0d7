//! Player control surface
//!
//! The external face of the core: client threads issue commands under the
//! shared mutex, the player thread acknowledges by clearing the command
//! slot and signalling `client_cond`. The same mutex also guards the
//! decoder's state, which is what makes the cross-thread handshakes (seek,
//! startup, back-pressure) single-lock affairs.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

use serde::Serialize;
use tracing::info;

use crate::audio::AudioFormat;
use crate::buffer::MusicBuffer;
use crate::config::PlayerSettings;
use crate::crossfade::CrossFadeSettings;
use crate::decoder::{default_decoder_plugins, DecoderControl, DecoderInner, DecoderPlugin};
use crate::error::{Error, PlayerErrorKind, Result};
use crate::events::{EventBus, IdleEvent, PlayerListener};
use crate::filter::{PreparedFilterChain, PreparedNormalizeFilter};
use crate::output::{AudioOutputClient, MultipleOutputs, OutputPlugin};
use crate::player::thread::player_task;
use crate::replay_gain::ReplayGainMode;
use crate::song::DetachedSong;
use crate::time::{SignedSongTime, SongTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Stop,
    Pause,
    Play,
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Stop => write!(f, "stop"),
            PlayerState::Pause => write!(f, "pause"),
            PlayerState::Play => write!(f, "play"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlayerCommand {
    None,
    Exit,

    /// Stop playback but keep the outputs configured.
    Stop,

    /// Toggle pause (no-op while stopped).
    Pause,

    /// Seek within `next_song`; also used to change the current song and
    /// to start playback.
    Seek,

    /// Stop and release the outputs.
    CloseAudio,

    /// At least one output's enabled flag changed; reconcile.
    UpdateAudio,

    /// `next_song` has been updated.
    Queue,

    /// Cancel the pre-decoded `next_song`; if the player already started
    /// it, stop completely.
    Cancel,

    /// Refresh status fields (elapsed time etc.) from worker state.
    Refresh,
}

/// Player state guarded by the shared core mutex.
pub(crate) struct PlayerInner {
    pub(crate) command: PlayerCommand,
    pub(crate) state: PlayerState,

    pub(crate) error: Option<(PlayerErrorKind, Arc<Error>)>,

    /// An output thread reported a failure; the player thread picks this
    /// up and pauses.
    pub(crate) output_error_pending: bool,

    /// The upcoming song handed over by the external queue; owned
    /// exclusively until the player thread takes it.
    pub(crate) next_song: Option<DetachedSong>,

    /// A tag-updated copy of the current song, published for the queue
    /// owner and consumed via `read_tagged_song`.
    pub(crate) tagged_song: Option<DetachedSong>,

    pub(crate) replay_gain_mode: ReplayGainMode,

    /// Auto-pause at the end of the song, before the next one starts.
    pub(crate) border_pause: bool,

    /// The player thread is committed to a long-running step (decoder
    /// seek, output drain); status reads skip REFRESH meanwhile.
    pub(crate) occupied: bool,

    pub(crate) audio_format: Option<AudioFormat>,
    pub(crate) bit_rate: u16,
    pub(crate) total_time: SignedSongTime,
    pub(crate) elapsed_time: SongTime,
    pub(crate) seek_time: SongTime,

    pub(crate) cross_fade: CrossFadeSettings,

    /// Cumulative seconds of decoded audio handed to the outputs.
    pub(crate) total_play_time: f64,
}

impl PlayerInner {
    fn new(replay_gain_mode: ReplayGainMode) -> Self {
        PlayerInner {
            command: PlayerCommand::None,
            state: PlayerState::Stop,
            error: None,
            output_error_pending: false,
            next_song: None,
            tagged_song: None,
            replay_gain_mode,
            border_pause: false,
            occupied: false,
            audio_format: None,
            bit_rate: 0,
            total_time: SignedSongTime::negative(),
            elapsed_time: SongTime::ZERO,
            seek_time: SongTime::ZERO,
            cross_fade: CrossFadeSettings::default(),
            total_play_time: 0.0,
        }
    }
}

/// Everything guarded by the single shared mutex.
pub(crate) struct CoreState {
    pub(crate) player: PlayerInner,
    pub(crate) decoder: DecoderInner,
}

/// The shared mutex and its three condition variables.
///
/// - `cond`: the player thread waits here; clients signal it after
///   setting a command, the decoder signals it as its client condvar, and
///   outputs signal it when chunks are consumed.
/// - `client_cond`: command issuers wait here for completion.
/// - `decoder_cond`: the decoder thread waits here.
pub(crate) struct CoreSync {
    pub(crate) state: Mutex<CoreState>,
    pub(crate) cond: Condvar,
    pub(crate) client_cond: Condvar,
    pub(crate) decoder_cond: Condvar,
}

impl CoreSync {
    pub(crate) fn new(replay_gain_mode: ReplayGainMode) -> Arc<Self> {
        Arc::new(CoreSync {
            state: Mutex::new(CoreState {
                player: PlayerInner::new(replay_gain_mode),
                decoder: DecoderInner::new(replay_gain_mode),
            }),
            cond: Condvar::new(),
            client_cond: Condvar::new(),
            decoder_cond: Condvar::new(),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap()
    }
}

/// A snapshot of the player for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub bit_rate: u16,
    pub audio_format: Option<AudioFormat>,
    pub total_time: SignedSongTime,
    pub elapsed_time: SongTime,
}

/// The player: owns the worker threads, the chunk buffer and the outputs.
///
/// Construct with [`PlayerControl::new`]; the instance must be shut down
/// with [`PlayerControl::kill`] before the process exits, since the player
/// thread keeps a reference alive.
pub struct PlayerControl {
    pub(crate) sync: Arc<CoreSync>,
    pub(crate) dc: Arc<DecoderControl>,
    pub(crate) outputs: Arc<MultipleOutputs>,
    pub(crate) buffer: Arc<MusicBuffer>,

    /// Queue-owner callbacks; invoked from the player thread, so the
    /// implementation must not call blocking player commands.
    pub(crate) listener: Box<dyn PlayerListener>,

    pub(crate) idle: EventBus,

    pub(crate) buffered_before_play: usize,

    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerControl {
    /// Build the whole core from settings: buffer, decoder thread (lazy),
    /// output threads, player thread.
    pub fn new(
        settings: &PlayerSettings,
        decoder_plugins: Vec<Arc<dyn DecoderPlugin>>,
        output_plugins: &[Arc<dyn OutputPlugin>],
        listener: Box<dyn PlayerListener>,
        idle: EventBus,
    ) -> Result<Arc<PlayerControl>> {
        let sync = CoreSync::new(settings.replay_gain_mode);

        let dc = DecoderControl::new(
            Arc::clone(&sync),
            decoder_plugins,
            settings.configured_audio_format,
            settings.replay_gain_config,
        );

        let mut prepared_filter = PreparedFilterChain::new();
        if settings.volume_normalization {
            prepared_filter.push(PreparedNormalizeFilter::new());
        }
        let outputs = Arc::new(MultipleOutputs::new(
            &settings.outputs,
            output_plugins,
            settings.replay_gain_config,
            prepared_filter,
        )?);
        outputs.set_replay_gain_mode(settings.replay_gain_mode);

        let pc = Arc::new(PlayerControl {
            sync,
            dc,
            outputs,
            buffer: Arc::new(MusicBuffer::new(settings.buffer_chunks)),
            listener,
            idle,
            buffered_before_play: settings.buffered_before_play,
            thread: Mutex::new(None),
        });

        let pc_trait: Arc<dyn AudioOutputClient> = Arc::clone(&pc) as Arc<dyn AudioOutputClient>;
        let client: Weak<dyn AudioOutputClient> = Arc::downgrade(&pc_trait);
        pc.outputs.set_client(client);

        let task_pc = Arc::clone(&pc);
        let handle = std::thread::Builder::new()
            .name("player".to_string())
            .spawn(move || player_task(task_pc))
            .expect("spawning the player thread");
        *pc.thread.lock().unwrap() = Some(handle);
        info!(
            buffer_chunks = settings.buffer_chunks,
            buffered_before_play = settings.buffered_before_play,
            "player started"
        );

        Ok(pc)
    }

    /// Convenience constructor with the built-in plugin sets.
    pub fn with_defaults(
        settings: &PlayerSettings,
        listener: Box<dyn PlayerListener>,
        idle: EventBus,
    ) -> Result<Arc<PlayerControl>> {
        PlayerControl::new(
            settings,
            default_decoder_plugins(),
            &crate::output::default_output_plugins(),
            listener,
            idle,
        )
    }

    pub fn idle_bus(&self) -> &EventBus {
        &self.idle
    }

    pub fn outputs(&self) -> &Arc<MultipleOutputs> {
        &self.outputs
    }

    /// The shared chunk budget, exposed for diagnostics.
    pub fn buffer(&self) -> &Arc<MusicBuffer> {
        &self.buffer
    }

    /// Wake the player thread. The object is locked briefly.
    pub(crate) fn lock_signal(&self) {
        let _guard = self.sync.lock();
        self.sync.cond.notify_all();
    }

    /// Send a command and wait until the player thread has finished it.
    ///
    /// Multiple client threads may race here; each one waits for the slot
    /// to free up first, so `command == NONE` holds before and after every
    /// successful call as observed by the issuer.
    fn synchronous_command<'a>(
        &self,
        mut guard: MutexGuard<'a, CoreState>,
        command: PlayerCommand,
    ) -> MutexGuard<'a, CoreState> {
        while guard.player.command != PlayerCommand::None {
            guard = self.sync.client_cond.wait(guard).unwrap();
        }
        guard.player.command = command;
        self.sync.cond.notify_all();
        while guard.player.command != PlayerCommand::None {
            guard = self.sync.client_cond.wait(guard).unwrap();
        }
        guard
    }

    /// Play `song` from its beginning, unpausing if necessary.
    pub fn play(&self, song: DetachedSong) -> Result<()> {
        let guard = self.sync.lock();
        let (guard, result) = self.seek_locked(guard, song, SongTime::ZERO);
        result?;

        if guard.player.state == PlayerState::Pause {
            let _guard = self.pause_locked(guard);
        }
        self.idle.emit_lossy(IdleEvent::Player);
        Ok(())
    }

    fn seek_locked<'a>(
        &self,
        mut guard: MutexGuard<'a, CoreState>,
        song: DetachedSong,
        t: SongTime,
    ) -> (MutexGuard<'a, CoreState>, Result<()>) {
        // To issue the SEEK command below, the "next_song" attribute must
        // be cleared with CANCEL first.
        if guard.player.next_song.is_some() {
            guard = self.synchronous_command(guard, PlayerCommand::Cancel);
            debug_assert!(guard.player.next_song.is_none());
        }

        guard.player.error = None;
        guard.player.next_song = Some(song);
        guard.player.seek_time = t;
        guard = self.synchronous_command(guard, PlayerCommand::Seek);
        debug_assert!(guard.player.next_song.is_none());

        let result = match &guard.player.error {
            Some((kind, error)) => Err(Error::rethrow(*kind, error)),
            None => Ok(()),
        };
        (guard, result)
    }

    /// Seek `song` to `t` and start playback there.
    pub fn seek(&self, song: DetachedSong, t: SongTime) -> Result<()> {
        {
            let guard = self.sync.lock();
            let (_guard, result) = self.seek_locked(guard, song, t);
            result?;
        }
        self.idle.emit_lossy(IdleEvent::Player);
        Ok(())
    }

    /// Hand over the upcoming song for pre-decoding.
    pub fn enqueue(&self, song: DetachedSong) -> Result<()> {
        let mut guard = self.sync.lock();
        if guard.player.next_song.is_some() {
            return Err(Error::InvalidState(
                "a next song is already queued".to_string(),
            ));
        }
        guard.player.next_song = Some(song);
        guard.player.seek_time = SongTime::ZERO;
        let _guard = self.synchronous_command(guard, PlayerCommand::Queue);
        Ok(())
    }

    /// Drop the pre-decoded next song.
    pub fn cancel(&self) {
        let guard = self.sync.lock();
        let guard = self.synchronous_command(guard, PlayerCommand::Cancel);
        debug_assert!(guard.player.next_song.is_none());
    }

    /// Stop playback; outputs stay configured.
    pub fn stop(&self) {
        {
            let guard = self.sync.lock();
            let guard = self.synchronous_command(guard, PlayerCommand::Stop);
            debug_assert!(guard.player.next_song.is_none());
        }
        self.idle.emit_lossy(IdleEvent::Player);
    }

    /// Stop playback and release the outputs.
    pub fn close_audio(&self) {
        {
            let guard = self.sync.lock();
            let guard = self.synchronous_command(guard, PlayerCommand::CloseAudio);
            debug_assert!(guard.player.next_song.is_none());
        }
        self.idle.emit_lossy(IdleEvent::Player);
    }

    /// Some output was enabled or disabled; make the outputs reconcile.
    pub fn update_audio(&self) {
        let guard = self.sync.lock();
        let _guard = self.synchronous_command(guard, PlayerCommand::UpdateAudio);
    }

    fn pause_locked<'a>(&self, guard: MutexGuard<'a, CoreState>) -> MutexGuard<'a, CoreState> {
        if guard.player.state == PlayerState::Stop {
            return guard;
        }
        let guard = self.synchronous_command(guard, PlayerCommand::Pause);
        self.idle.emit_lossy(IdleEvent::Player);
        guard
    }

    /// Toggle pause.
    pub fn pause(&self) {
        let guard = self.sync.lock();
        let _guard = self.pause_locked(guard);
    }

    /// Set the pause state explicitly; a no-op while stopped or when the
    /// state already matches.
    pub fn set_pause(&self, pause: bool) {
        let guard = self.sync.lock();
        match (guard.player.state, pause) {
            (PlayerState::Play, true) | (PlayerState::Pause, false) => {
                let _guard = self.pause_locked(guard);
            }
            _ => {}
        }
    }

    pub fn set_border_pause(&self, border_pause: bool) {
        let mut guard = self.sync.lock();
        guard.player.border_pause = border_pause;
    }

    /// Terminate the player thread (and with it the decoder and output
    /// threads). Must be called exactly once before dropping the last
    /// reference.
    pub fn kill(&self) {
        {
            let guard = self.sync.lock();
            let _guard = self.synchronous_command(guard, PlayerCommand::Exit);
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
            info!("player thread joined");
        }
        self.idle.emit_lossy(IdleEvent::Player);
    }

    /// Current status. Issues REFRESH unless the player is occupied with a
    /// long-running step, in which case slightly stale fields are fine
    /// (`state` is always current).
    pub fn status(&self) -> PlayerStatus {
        let mut guard = self.sync.lock();
        if !guard.player.occupied {
            guard = self.synchronous_command(guard, PlayerCommand::Refresh);
        }

        let p = &guard.player;
        if p.state == PlayerState::Stop {
            PlayerStatus {
                state: PlayerState::Stop,
                bit_rate: 0,
                audio_format: None,
                total_time: SignedSongTime::negative(),
                elapsed_time: SongTime::ZERO,
            }
        } else {
            PlayerStatus {
                state: p.state,
                bit_rate: p.bit_rate,
                audio_format: p.audio_format,
                total_time: p.total_time,
                elapsed_time: p.elapsed_time,
            }
        }
    }

    pub fn state(&self) -> PlayerState {
        self.sync.lock().player.state
    }

    pub fn error_kind(&self) -> Option<PlayerErrorKind> {
        self.sync.lock().player.error.as_ref().map(|(kind, _)| *kind)
    }

    /// Rethrow a captured worker error, if any.
    pub fn check_rethrow_error(&self) -> Result<()> {
        match &self.sync.lock().player.error {
            Some((kind, error)) => Err(Error::rethrow(*kind, error)),
            None => Ok(()),
        }
    }

    pub fn clear_error(&self) {
        let mut guard = self.sync.lock();
        guard.player.error = None;
    }

    /// Take the tag-updated copy of the current song, if the decoder
    /// published one.
    pub fn read_tagged_song(&self) -> Option<DetachedSong> {
        self.sync.lock().player.tagged_song.take()
    }

    pub fn set_cross_fade(&self, seconds: f32) {
        let mut guard = self.sync.lock();
        guard.player.cross_fade.duration = seconds.max(0.0);
        drop(guard);
        self.idle.emit_lossy(IdleEvent::Options);
    }

    pub fn cross_fade(&self) -> f32 {
        self.sync.lock().player.cross_fade.duration
    }

    pub fn set_mixramp_db(&self, db: f32) {
        let mut guard = self.sync.lock();
        guard.player.cross_fade.mixramp_db = db;
        drop(guard);
        self.idle.emit_lossy(IdleEvent::Options);
    }

    pub fn mixramp_db(&self) -> f32 {
        self.sync.lock().player.cross_fade.mixramp_db
    }

    pub fn set_mixramp_delay(&self, seconds: f32) {
        let mut guard = self.sync.lock();
        guard.player.cross_fade.mixramp_delay = seconds;
        drop(guard);
        self.idle.emit_lossy(IdleEvent::Options);
    }

    pub fn mixramp_delay(&self) -> f32 {
        self.sync.lock().player.cross_fade.mixramp_delay
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        let mut guard = self.sync.lock();
        guard.player.replay_gain_mode = mode;
        guard.decoder.replay_gain_mode = mode;
        drop(guard);
        self.outputs.set_replay_gain_mode(mode);
        self.idle.emit_lossy(IdleEvent::Options);
    }

    pub fn total_play_time(&self) -> f64 {
        self.sync.lock().player.total_play_time
    }
}

impl AudioOutputClient for PlayerControl {
    fn chunks_consumed(&self) {
        self.lock_signal();
    }

    fn apply_enabled(&self) {
        self.update_audio();
    }

    fn set_output_error(&self, error: Arc<Error>) {
        let mut guard = self.sync.lock();
        guard.player.error = Some((PlayerErrorKind::Output, error));
        guard.player.output_error_pending = true;
        // Pause, so the user can resume as soon as an output is available
        // again; the player thread completes the transition.
        if guard.player.state == PlayerState::Play {
            guard.player.state = PlayerState::Pause;
        }
        self.sync.cond.notify_all();
        drop(guard);
        self.idle.emit_lossy(IdleEvent::Player);
    }
}
