//! Volume normalization filter
//!
//! A small automatic gain control enabled by the `volume_normalization`
//! setting: quiet material is boosted toward a target peak, with the gain
//! smoothed across buffers so level changes are not audible as steps.
//! Only S16 streams are supported.

use std::sync::Arc;

use crate::audio::{AudioFormat, SampleFormat};
use crate::error::{Error, Result};
use crate::filter::{Filter, PreparedFilter};
use crate::pcm::{apply_volume, PcmDither};

/// Target peak after normalization, in S16 sample units.
const TARGET_PEAK: f32 = 16384.0;

/// Never amplify by more than this factor.
const MAX_GAIN: f32 = 4.0;

/// Fraction of the gain gap closed per processed buffer.
const SMOOTHING: f32 = 0.12;

pub struct PreparedNormalizeFilter;

impl PreparedNormalizeFilter {
    pub fn new() -> Arc<dyn PreparedFilter> {
        Arc::new(PreparedNormalizeFilter)
    }
}

impl PreparedFilter for PreparedNormalizeFilter {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn Filter>> {
        if format.format != SampleFormat::S16 {
            return Err(Error::Filter(format!(
                "volume normalization requires 16 bit audio, got {}",
                format
            )));
        }
        Ok(Box::new(NormalizeFilter {
            format,
            gain: 1.0,
            dither: PcmDither::new(),
        }))
    }
}

struct NormalizeFilter {
    format: AudioFormat,
    gain: f32,
    dither: PcmDither,
}

impl Filter for NormalizeFilter {
    fn out_audio_format(&self) -> AudioFormat {
        self.format
    }

    fn filter(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        let peak = src
            .chunks_exact(2)
            .map(|b| (i16::from_ne_bytes([b[0], b[1]]) as i32).unsigned_abs())
            .max()
            .unwrap_or(0);

        let desired = if peak == 0 {
            self.gain
        } else {
            (TARGET_PEAK / peak as f32).clamp(1.0, MAX_GAIN)
        };
        self.gain += (desired - self.gain) * SMOOTHING;

        let mut data = src.to_vec();
        if (self.gain - 1.0).abs() > f32::EPSILON {
            apply_volume(&mut self.dither, &mut data, self.format.format, self.gain);
        }
        Ok(data)
    }

    fn reset(&mut self) {
        self.gain = 1.0;
        self.dither.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Box<dyn Filter> {
        PreparedNormalizeFilter::new()
            .open(AudioFormat::new(44100, SampleFormat::S16, 2))
            .unwrap()
    }

    fn buf(sample: i16, frames: usize) -> Vec<u8> {
        std::iter::repeat(sample)
            .take(frames * 2)
            .flat_map(|s| s.to_ne_bytes())
            .collect()
    }

    #[test]
    fn test_quiet_audio_is_boosted() {
        let mut filter = open();
        let quiet = buf(1000, 64);

        // Feed several buffers so the smoothed gain settles.
        let mut out = Vec::new();
        for _ in 0..64 {
            out = filter.filter(&quiet).unwrap();
        }
        let sample = i16::from_ne_bytes([out[0], out[1]]);
        assert!(sample > 3000, "got {}", sample);
    }

    #[test]
    fn test_loud_audio_is_untouched() {
        let mut filter = open();
        let loud = buf(20000, 64);
        let out = filter.filter(&loud).unwrap();
        assert_eq!(out, loud);
    }

    #[test]
    fn test_gain_is_capped() {
        let mut filter = open();
        let faint = buf(10, 64);
        let mut out = Vec::new();
        for _ in 0..128 {
            out = filter.filter(&faint).unwrap();
        }
        let sample = i16::from_ne_bytes([out[0], out[1]]);
        assert!(sample <= (10.0 * MAX_GAIN) as i16 + 1, "got {}", sample);
    }

    #[test]
    fn test_rejects_non_s16() {
        let err = PreparedNormalizeFilter::new()
            .open(AudioFormat::new(44100, SampleFormat::F32, 2));
        assert!(err.is_err());
    }
}
