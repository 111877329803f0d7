//! Output fan-out
//!
//! One logical stream to N physical outputs: the player pushes decorated
//! chunks into the shared outputs pipe, and every output thread drains it
//! through its own cursor at its own cadence. Back-edges to the player
//! (chunk consumption, enable changes, write failures) go through the
//! narrow [`AudioOutputClient`] capability; the client must outlive the
//! outputs.

use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tracing::warn;

use crate::audio::AudioFormat;
use crate::buffer::MusicBuffer;
use crate::chunk::MusicChunk;
use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::filter::PreparedFilterChain;
use crate::output::control::AudioOutputControl;
use crate::output::sink::OutputPlugin;
use crate::pipe::MusicPipe;
use crate::replay_gain::{ReplayGainConfig, ReplayGainMode};

/// Callbacks from output threads into the player.
pub trait AudioOutputClient: Send + Sync {
    /// An output consumed chunks; whoever waits for pipe space should
    /// re-check.
    fn chunks_consumed(&self);

    /// An output's enabled flag changed; the player should reconcile.
    fn apply_enabled(&self);

    /// An output failed a write; the player records it and pauses.
    fn set_output_error(&self, error: Arc<Error>);
}

/// A snapshot of one output for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub name: String,
    pub enabled: bool,
    pub open: bool,
}

pub struct MultipleOutputs {
    outputs: Vec<Arc<AudioOutputControl>>,
    pipe: Mutex<Option<Arc<MusicPipe>>>,
}

impl MultipleOutputs {
    pub fn new(
        configs: &[OutputConfig],
        plugins: &[Arc<dyn OutputPlugin>],
        replay_gain_config: ReplayGainConfig,
        prepared_filter: PreparedFilterChain,
    ) -> Result<Self> {
        let mut outputs = Vec::with_capacity(configs.len());
        for config in configs {
            let plugin = plugins
                .iter()
                .find(|p| p.name() == config.plugin)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "unknown audio_output type \"{}\" for \"{}\"",
                        config.plugin, config.name
                    ))
                })?;
            let sink = plugin.create(config)?;
            outputs.push(AudioOutputControl::new(
                config.name.clone(),
                sink,
                replay_gain_config,
                prepared_filter.clone(),
                config.enabled,
            ));
        }

        Ok(MultipleOutputs {
            outputs,
            pipe: Mutex::new(None),
        })
    }

    /// Install the back-edge; called once by the player that owns us.
    pub(crate) fn set_client(&self, client: Weak<dyn AudioOutputClient>) {
        for output in &self.outputs {
            let _ = output.client.set(Weak::clone(&client));
        }
    }

    fn pipe(&self) -> Option<Arc<MusicPipe>> {
        self.pipe.lock().unwrap().clone()
    }

    /// Open every enabled output for `format`. Succeeds when at least one
    /// output is playable; individual failures are logged and kept in the
    /// per-output error slot.
    pub fn open(&self, format: AudioFormat, buffer: &Arc<MusicBuffer>) -> Result<()> {
        let pipe = {
            let mut slot = self.pipe.lock().unwrap();
            slot.get_or_insert_with(|| Arc::new(MusicPipe::new(Arc::clone(buffer))))
                .clone()
        };

        let mut opened = 0usize;
        let mut first_error = None;
        for output in &self.outputs {
            if !output.is_enabled() {
                if output.is_open() {
                    output.close();
                }
                continue;
            }
            match output.open(format, Arc::clone(&pipe)) {
                Ok(()) => opened += 1,
                Err(e) => {
                    warn!(name = output.name(), error = %e, "output not available");
                    first_error.get_or_insert(e);
                }
            }
        }

        if opened == 0 {
            Err(first_error.unwrap_or(Error::AllOutputsFailed))
        } else {
            Ok(())
        }
    }

    /// Hand one decorated chunk to the outputs.
    pub(crate) fn play(&self, chunk: MusicChunk) -> Result<()> {
        let pipe = self
            .pipe()
            .ok_or_else(|| Error::InvalidState("outputs are not open".to_string()))?;
        pipe.push(chunk);
        for output in &self.outputs {
            output.wake();
        }
        Ok(())
    }

    /// Chunks still buffered across all cursors; the player's
    /// back-pressure probe.
    pub fn check(&self) -> usize {
        self.pipe().map(|pipe| pipe.size()).unwrap_or(0)
    }

    pub fn pause(&self) {
        for output in &self.outputs {
            output.set_pause(true);
        }
    }

    /// Drop everything queued; already-written bytes at the sinks are not
    /// rewound.
    pub fn cancel(&self) {
        // Every output acknowledges first, so none is mid-pull while the
        // pipe is cleared.
        for output in &self.outputs {
            if output.is_open() {
                output.cancel();
            }
        }
        if let Some(pipe) = self.pipe() {
            pipe.clear();
        }
    }

    /// Close the sinks but keep outputs configured (CLOSE_AUDIO).
    pub fn release(&self) {
        for output in &self.outputs {
            if output.is_open() {
                output.close();
            }
        }
        if let Some(pipe) = self.pipe() {
            pipe.clear();
        }
    }

    /// Terminate all output threads; the object is unusable afterwards.
    pub fn close(&self) {
        self.release();
        for output in &self.outputs {
            output.kill();
        }
    }

    /// Reconcile the enabled flags (UPDATE_AUDIO): disabled outputs are
    /// closed now, newly enabled ones open on the next player open.
    pub fn enable_disable(&self) {
        for output in &self.outputs {
            if !output.is_enabled() && output.is_open() {
                output.close();
            }
        }
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        for output in &self.outputs {
            output.set_replay_gain_mode(mode);
        }
    }

    /// External surface: flip an output's enabled flag by name. A change
    /// is pushed back to the player through the client's `apply_enabled`,
    /// which issues UPDATE_AUDIO.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let output = self
            .outputs
            .iter()
            .find(|o| o.name() == name)
            .ok_or_else(|| Error::Config(format!("no such audio output \"{}\"", name)))?;
        let changed = output.set_enabled(enabled);
        if changed {
            if let Some(client) = output.client.get().and_then(Weak::upgrade) {
                client.apply_enabled();
            }
        }
        Ok(changed)
    }

    pub fn summaries(&self) -> Vec<OutputSummary> {
        self.outputs
            .iter()
            .map(|o| OutputSummary {
                name: o.name().to_string(),
                enabled: o.is_enabled(),
                open: o.is_open(),
            })
            .collect()
    }
}
