//! Replay-gain data model
//!
//! Gain/peak pairs attached to chunks by the decoder, the configuration
//! that turns them into a linear scale factor, and the process-wide serial
//! allocator used by the chunk-level update protocol.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::chunk::IGNORE_REPLAY_GAIN;
use crate::error::Error;

/// Which replay-gain value to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
    /// Pick track or album depending on how the queue is being played.
    /// That heuristic lives outside the core; at the filter this behaves
    /// like track-preferring.
    Auto,
}

impl FromStr for ReplayGainMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "off" => Ok(ReplayGainMode::Off),
            "track" => Ok(ReplayGainMode::Track),
            "album" => Ok(ReplayGainMode::Album),
            "auto" => Ok(ReplayGainMode::Auto),
            _ => Err(Error::Config(format!(
                "replaygain mode \"{}\" is not off, track, album or auto",
                s
            ))),
        }
    }
}

/// Immutable replay-gain configuration.
///
/// Pre-amps are stored as linear factors; [`ReplayGainConfig::with_preamp_db`]
/// converts from the configuration file's decibel value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayGainConfig {
    /// Applied on top of a song's gain.
    pub preamp: f32,

    /// Applied when a song carries no replay-gain info.
    pub missing_preamp: f32,

    /// Prevent clipping: never scale above `1 / peak`.
    pub limit: bool,
}

impl Default for ReplayGainConfig {
    fn default() -> Self {
        ReplayGainConfig {
            preamp: 1.0,
            missing_preamp: 1.0,
            limit: true,
        }
    }
}

impl ReplayGainConfig {
    pub fn with_preamp_db(preamp_db: f32, missing_preamp_db: f32, limit: bool) -> Self {
        ReplayGainConfig {
            preamp: db_to_scale(preamp_db),
            missing_preamp: db_to_scale(missing_preamp_db),
            limit,
        }
    }
}

fn db_to_scale(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// One gain/peak measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainTuple {
    /// Gain relative to reference loudness, in dB.
    pub gain_db: f32,

    /// Peak sample amplitude, 1.0 = full scale. Zero means unknown.
    pub peak: f32,
}

impl ReplayGainTuple {
    pub fn new(gain_db: f32, peak: f32) -> Self {
        ReplayGainTuple { gain_db, peak }
    }

    /// The linear scale factor this tuple asks for under `config`.
    pub fn calc_scale(&self, config: &ReplayGainConfig) -> f32 {
        let mut scale = db_to_scale(self.gain_db) * config.preamp;
        if config.limit && self.peak > 0.0 && scale * self.peak > 1.0 {
            scale = 1.0 / self.peak;
        }
        scale
    }
}

/// Track and album measurements for one song.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainInfo {
    pub track: Option<ReplayGainTuple>,
    pub album: Option<ReplayGainTuple>,
}

impl ReplayGainInfo {
    pub fn is_defined(&self) -> bool {
        self.track.is_some() || self.album.is_some()
    }

    /// Select the tuple for `mode`, falling back to the other measurement
    /// when the preferred one is missing.
    pub fn get(&self, mode: ReplayGainMode) -> Option<ReplayGainTuple> {
        match mode {
            ReplayGainMode::Off => None,
            ReplayGainMode::Album => self.album.or(self.track),
            ReplayGainMode::Track | ReplayGainMode::Auto => self.track.or(self.album),
        }
    }

    /// The gain in dB that would be applied under `mode`, before pre-amp.
    /// Used by the MixRamp overlap computation.
    pub fn applied_db(&self, mode: ReplayGainMode) -> f32 {
        self.get(mode).map(|t| t.gain_db).unwrap_or(0.0)
    }
}

static NEXT_SERIAL: AtomicU32 = AtomicU32::new(1);

/// Allocate a fresh chunk-level replay-gain serial.
///
/// Never returns `0` ("no info, clear the filter") or
/// [`IGNORE_REPLAY_GAIN`] ("leave the filter alone").
pub fn next_replay_gain_serial() -> u32 {
    loop {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        if serial != 0 && serial != IGNORE_REPLAY_GAIN {
            return serial;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("track".parse::<ReplayGainMode>().unwrap(), ReplayGainMode::Track);
        assert_eq!("off".parse::<ReplayGainMode>().unwrap(), ReplayGainMode::Off);
        assert!("loud".parse::<ReplayGainMode>().is_err());
    }

    #[test]
    fn test_scale_from_db() {
        let config = ReplayGainConfig::default();
        let tuple = ReplayGainTuple::new(-6.0, 0.0);
        let scale = tuple.calc_scale(&config);
        assert!((scale - 0.501).abs() < 0.01);
    }

    #[test]
    fn test_peak_limit() {
        let config = ReplayGainConfig::default();
        // +12 dB on a song peaking at 0.5 would clip; the limiter caps the
        // scale at 1/peak = 2.0.
        let tuple = ReplayGainTuple::new(12.0, 0.5);
        assert!((tuple.calc_scale(&config) - 2.0).abs() < 1e-6);

        let unlimited = ReplayGainConfig {
            limit: false,
            ..ReplayGainConfig::default()
        };
        assert!(tuple.calc_scale(&unlimited) > 3.9);
    }

    #[test]
    fn test_mode_fallback() {
        let info = ReplayGainInfo {
            track: Some(ReplayGainTuple::new(-3.0, 1.0)),
            album: None,
        };
        assert!(info.get(ReplayGainMode::Album).is_some());
        assert!(info.get(ReplayGainMode::Off).is_none());
        assert_eq!(info.applied_db(ReplayGainMode::Track), -3.0);
    }

    #[test]
    fn test_serial_allocator_skips_sentinels() {
        for _ in 0..64 {
            let serial = next_replay_gain_serial();
            assert_ne!(serial, 0);
            assert_ne!(serial, IGNORE_REPLAY_GAIN);
        }
    }
}
