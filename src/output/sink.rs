//! Output sinks
//!
//! The black-box side of an audio output: once opened with a fixed
//! [`AudioFormat`], a sink accepts repeated PCM writes, tag records and
//! cancellation. Closing may block for drain.
//!
//! The built-in null sink discards everything; its `sync` parameter paces
//! consumption against wall-clock so the rest of the core behaves as if a
//! real device were attached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::audio::AudioFormat;
use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::song::Tag;

pub trait Sink: Send {
    fn open(&mut self, format: &AudioFormat) -> Result<()>;

    /// Write PCM, returning how many bytes were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    fn send_tag(&mut self, _tag: &Tag) -> Result<()> {
        Ok(())
    }

    /// Drop already-buffered device data; nothing is rewound upstream.
    fn cancel(&mut self) {}

    /// Close the sink; may block while the device drains.
    fn close(&mut self);
}

/// Factory for sinks of one plugin type.
pub trait OutputPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(&self, config: &OutputConfig) -> Result<Box<dyn Sink>>;
}

/// The output plugins compiled into this build.
pub fn default_output_plugins() -> Vec<Arc<dyn OutputPlugin>> {
    vec![Arc::new(NullOutputPlugin)]
}

pub struct NullOutputPlugin;

impl OutputPlugin for NullOutputPlugin {
    fn name(&self) -> &'static str {
        "null"
    }

    fn create(&self, config: &OutputConfig) -> Result<Box<dyn Sink>> {
        let sync = config.param.block_bool("sync", true)?;
        Ok(Box::new(NullSink {
            name: config.name.clone(),
            sync,
            format: None,
            clock: None,
            played_bytes: 0,
        }))
    }
}

/// Discards PCM; with `sync` enabled, consumption is paced to real time.
pub struct NullSink {
    name: String,
    sync: bool,
    format: Option<AudioFormat>,
    clock: Option<Instant>,
    played_bytes: u64,
}

impl Sink for NullSink {
    fn open(&mut self, format: &AudioFormat) -> Result<()> {
        debug!(name = %self.name, %format, "null output opened");
        self.format = Some(*format);
        self.clock = Some(Instant::now());
        self.played_bytes = 0;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let format = self.format.ok_or_else(|| Error::Output {
            name: self.name.clone(),
            message: "write on closed output".to_string(),
        })?;

        if self.sync {
            let clock = self.clock.get_or_insert_with(Instant::now);
            let ahead = Duration::from_secs_f64(
                self.played_bytes as f64 / format.byte_rate() as f64,
            )
            .saturating_sub(clock.elapsed());
            if !ahead.is_zero() {
                std::thread::sleep(ahead.min(Duration::from_millis(50)));
            }
        }

        self.played_bytes += data.len() as u64;
        Ok(data.len())
    }

    fn cancel(&mut self) {
        self.clock = Some(Instant::now());
        self.played_bytes = 0;
    }

    fn close(&mut self) {
        debug!(name = %self.name, "null output closed");
        self.format = None;
        self.clock = None;
    }
}
