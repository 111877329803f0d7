//! The replay-gain filter
//!
//! One instance per output stream (two during a cross-fade: one for each
//! song). The owning output source decides *when* to load new info using
//! the chunk serial protocol; this filter only turns mode + info into a
//! scale factor and applies it.

use tracing::debug;

use crate::audio::AudioFormat;
use crate::pcm::{apply_volume, PcmDither};
use crate::replay_gain::{ReplayGainConfig, ReplayGainInfo, ReplayGainMode};

pub struct ReplayGainFilter {
    format: AudioFormat,
    config: ReplayGainConfig,
    mode: ReplayGainMode,
    info: Option<ReplayGainInfo>,
    scale: f32,
    dither: PcmDither,
}

impl ReplayGainFilter {
    /// Opening cannot fail; a fresh instance applies unity gain until the
    /// first info arrives.
    pub fn open(config: ReplayGainConfig, format: AudioFormat) -> Self {
        ReplayGainFilter {
            format,
            config,
            mode: ReplayGainMode::Off,
            info: None,
            scale: 1.0,
            dither: PcmDither::new(),
        }
    }

    pub fn set_mode(&mut self, mode: ReplayGainMode) {
        if self.mode != mode {
            self.mode = mode;
            self.update();
        }
    }

    /// Load new replay-gain info, or clear it with `None`.
    pub fn set_info(&mut self, info: Option<ReplayGainInfo>) {
        self.info = info;
        self.update();
    }

    fn update(&mut self) {
        self.scale = match self.mode {
            ReplayGainMode::Off => 1.0,
            mode => match self.info.as_ref().and_then(|info| info.get(mode)) {
                Some(tuple) => tuple.calc_scale(&self.config),
                None => self.config.missing_preamp,
            },
        };
        debug!(scale = self.scale, mode = ?self.mode, "replay gain updated");
    }

    pub fn filter(&mut self, src: &[u8]) -> Vec<u8> {
        let mut data = src.to_vec();
        if (self.scale - 1.0).abs() > f32::EPSILON {
            apply_volume(&mut self.dither, &mut data, self.format.format, self.scale);
        }
        data
    }

    pub fn reset(&mut self) {
        self.info = None;
        self.dither.reset();
        self.update();
    }
}
