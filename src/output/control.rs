//! Per-output thread control
//!
//! Every configured output runs its own thread owning the sink and the
//! [`OutputSource`]. Commands cross a small per-output mutex with a
//! condvar pair (one wakes the thread, one wakes the issuer); PCM pulls,
//! filtering and sink writes all happen with no lock held.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::audio::AudioFormat;
use crate::error::{Error, Result};
use crate::filter::PreparedFilterChain;
use crate::output::multiple::AudioOutputClient;
use crate::output::sink::Sink;
use crate::output::source::OutputSource;
use crate::pipe::MusicPipe;
use crate::replay_gain::{ReplayGainConfig, ReplayGainMode};

#[derive(Clone)]
pub(crate) enum OutputCommand {
    None,
    Open {
        format: AudioFormat,
        pipe: Arc<MusicPipe>,
    },
    Close,
    Cancel,
    Kill,
}

pub(crate) struct OutputState {
    command: OutputCommand,

    /// Written by the thread: the sink is open and playable.
    open: bool,

    pause: bool,

    /// Desired by configuration / the user; reconciled by UPDATE_AUDIO.
    enabled: bool,

    /// New chunks arrived while the thread was not looking; consumed by
    /// the play loop before it decides to sleep.
    wakeup: bool,

    last_error: Option<Arc<Error>>,

    replay_gain_mode: ReplayGainMode,
}

pub(crate) struct AudioOutputControl {
    name: String,
    state: Mutex<OutputState>,

    /// Wakes the output thread (commands, new chunks, pause toggles).
    cond: Condvar,

    /// Wakes whoever issued a command.
    client_cond: Condvar,

    pub(crate) client: OnceLock<Weak<dyn AudioOutputClient>>,

    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioOutputControl {
    pub(crate) fn new(
        name: String,
        sink: Box<dyn Sink>,
        replay_gain_config: ReplayGainConfig,
        prepared_filter: PreparedFilterChain,
        enabled: bool,
    ) -> Arc<Self> {
        let control = Arc::new(AudioOutputControl {
            name: name.clone(),
            state: Mutex::new(OutputState {
                command: OutputCommand::None,
                open: false,
                pause: false,
                enabled,
                wakeup: false,
                last_error: None,
                replay_gain_mode: ReplayGainMode::Off,
            }),
            cond: Condvar::new(),
            client_cond: Condvar::new(),
            client: OnceLock::new(),
            thread: Mutex::new(None),
        });

        let worker = OutputWorker {
            ctl: Arc::clone(&control),
            sink,
            source: OutputSource::new(),
            prepared_filter,
            replay_gain_config,
            open_format: None,
        };
        let handle = std::thread::Builder::new()
            .name(format!("output:{}", name))
            .spawn(move || worker.run())
            .expect("spawning an output thread");
        *control.thread.lock().unwrap() = Some(handle);
        info!(name = %name, "output thread started");

        control
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn lock_command(&self, command: OutputCommand) {
        let mut guard = self.state.lock().unwrap();
        debug_assert!(matches!(guard.command, OutputCommand::None));
        guard.command = command;
        self.cond.notify_all();
        while !matches!(guard.command, OutputCommand::None) {
            guard = self.client_cond.wait(guard).unwrap();
        }
    }

    /// Open (or unpause) this output for `format`.
    pub(crate) fn open(&self, format: AudioFormat, pipe: Arc<MusicPipe>) -> Result<()> {
        self.lock_command(OutputCommand::Open { format, pipe });

        let guard = self.state.lock().unwrap();
        if guard.open {
            Ok(())
        } else {
            let message = guard
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "failed to open".to_string());
            Err(Error::Output {
                name: self.name.clone(),
                message,
            })
        }
    }

    pub(crate) fn close(&self) {
        self.lock_command(OutputCommand::Close);
    }

    pub(crate) fn cancel(&self) {
        self.lock_command(OutputCommand::Cancel);
    }

    pub(crate) fn kill(&self) {
        self.lock_command(OutputCommand::Kill);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
            debug!(name = %self.name, "output thread joined");
        }
    }

    pub(crate) fn set_pause(&self, pause: bool) {
        let mut guard = self.state.lock().unwrap();
        guard.pause = pause;
        self.cond.notify_all();
    }

    /// New chunks are available in the pipe.
    pub(crate) fn wake(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.wakeup = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    /// Returns true when the flag actually changed.
    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        let mut guard = self.state.lock().unwrap();
        let changed = guard.enabled != enabled;
        guard.enabled = enabled;
        changed
    }

    pub(crate) fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        let mut guard = self.state.lock().unwrap();
        guard.replay_gain_mode = mode;
        self.cond.notify_all();
    }
}

struct OutputWorker {
    ctl: Arc<AudioOutputControl>,
    sink: Box<dyn Sink>,
    source: OutputSource,
    prepared_filter: PreparedFilterChain,
    replay_gain_config: ReplayGainConfig,

    /// Format the sink was opened with, to skip redundant reopens.
    open_format: Option<AudioFormat>,
}

impl OutputWorker {
    fn run(mut self) {
        let ctl = Arc::clone(&self.ctl);
        let mut guard = ctl.state.lock().unwrap();
        loop {
            match guard.command.clone() {
                OutputCommand::None => {
                    guard = self.idle_or_play(&ctl, guard);
                }
                OutputCommand::Open { format, pipe } => {
                    guard = self.handle_open(&ctl, guard, format, pipe);
                    finish_command(&ctl, &mut guard);
                }
                OutputCommand::Close => {
                    drop(guard);
                    self.do_close();
                    guard = ctl.state.lock().unwrap();
                    guard.open = false;
                    finish_command(&ctl, &mut guard);
                }
                OutputCommand::Cancel => {
                    if self.source.is_open() {
                        self.source.cancel();
                    }
                    self.sink.cancel();
                    finish_command(&ctl, &mut guard);
                }
                OutputCommand::Kill => {
                    drop(guard);
                    self.do_close();
                    guard = ctl.state.lock().unwrap();
                    guard.open = false;
                    finish_command(&ctl, &mut guard);
                    debug!(name = %ctl.name, "output thread exiting");
                    return;
                }
            }
        }
    }

    fn handle_open<'a>(
        &mut self,
        ctl: &'a Arc<AudioOutputControl>,
        guard: MutexGuard<'a, OutputState>,
        format: AudioFormat,
        pipe: Arc<MusicPipe>,
    ) -> MutexGuard<'a, OutputState> {
        if guard.open && self.open_format == Some(format) {
            // Already open with this format: just resume.
            let mut guard = guard;
            guard.pause = false;
            return guard;
        }

        drop(guard);
        let result = self
            .source
            .open(format, &pipe, self.replay_gain_config, &self.prepared_filter)
            .and_then(|out_format| {
                self.sink.open(&out_format)?;
                Ok(())
            });

        let mut guard = ctl.state.lock().unwrap();
        match result {
            Ok(()) => {
                self.open_format = Some(format);
                guard.open = true;
                guard.pause = false;
                guard.last_error = None;
            }
            Err(e) => {
                warn!(name = %ctl.name, error = %e, "failed to open output");
                self.open_format = None;
                guard.open = false;
                guard.last_error = Some(Arc::new(e));
            }
        }
        guard
    }

    fn do_close(&mut self) {
        if self.source.is_open() {
            self.source.close();
        }
        if self.open_format.take().is_some() {
            self.sink.close();
        }
    }

    fn idle_or_play<'a>(
        &mut self,
        ctl: &'a Arc<AudioOutputControl>,
        guard: MutexGuard<'a, OutputState>,
    ) -> MutexGuard<'a, OutputState> {
        if !guard.open || guard.pause {
            return ctl.cond.wait(guard).unwrap();
        }

        let mode = guard.replay_gain_mode;
        drop(guard);
        self.source.set_replay_gain_mode(mode);

        match self.play_batch() {
            Ok(true) => {
                if let Some(client) = self.client() {
                    client.chunks_consumed();
                }
                ctl.state.lock().unwrap()
            }
            Ok(false) => {
                // Nothing in the pipe for this cursor; sleep until the
                // player pushes more or a command arrives. A push that
                // raced with the empty probe left the wakeup flag set.
                let mut guard = ctl.state.lock().unwrap();
                while !guard.wakeup
                    && matches!(guard.command, OutputCommand::None)
                    && guard.open
                    && !guard.pause
                {
                    guard = ctl.cond.wait(guard).unwrap();
                }
                guard.wakeup = false;
                guard
            }
            Err(e) => {
                warn!(name = %ctl.name, error = %e, "output failed, closing");
                // Keep the source position: the cursor must not advance
                // past the failing write.
                self.sink.close();
                self.open_format = None;
                let error = Arc::new(e);

                let mut guard = ctl.state.lock().unwrap();
                guard.open = false;
                guard.last_error = Some(Arc::clone(&error));
                drop(guard);

                if let Some(client) = self.client() {
                    client.set_output_error(error);
                }
                ctl.state.lock().unwrap()
            }
        }
    }

    /// One pull-filter-write step. `Ok(true)` means progress was made.
    fn play_batch(&mut self) -> Result<bool> {
        if !self.source.fill()? {
            return Ok(false);
        }

        if let Some(tag) = self.source.take_pending_tag() {
            self.sink.send_tag(&tag)?;
        }

        let pending = self.source.pending();
        if pending.is_empty() {
            // A filter may legally produce zero bytes; the chunk counts as
            // consumed without touching the sink.
            self.source.consume_data(0);
            return Ok(true);
        }

        let n = self.sink.write(pending)?;
        self.source.consume_data(n);
        Ok(true)
    }

    fn client(&self) -> Option<Arc<dyn AudioOutputClient>> {
        self.ctl.client.get().and_then(Weak::upgrade)
    }
}

fn finish_command(ctl: &AudioOutputControl, guard: &mut MutexGuard<'_, OutputState>) {
    guard.command = OutputCommand::None;
    ctl.client_cond.notify_all();
}
