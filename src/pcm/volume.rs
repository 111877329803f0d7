//! PCM gain scaling
//!
//! In-place gain for the replay-gain filter. Integer formats go through
//! fixed-point math with dithering; float samples are multiplied directly.

use crate::audio::SampleFormat;
use crate::pcm::{clamp_for, PcmDither, VOLUME_BITS, VOLUME_ONE};

/// Scale every sample in `data` by `scale` (1.0 = unity).
///
/// `data` must be frame-aligned in `format`.
pub fn apply_volume(dither: &mut PcmDither, data: &mut [u8], format: SampleFormat, scale: f32) {
    let vol = (scale as f64 * VOLUME_ONE as f64).round() as i64;

    match format {
        SampleFormat::S8 => {
            for b in data.chunks_exact_mut(1) {
                let sample = i8::from_ne_bytes([b[0]]) as i64;
                let scaled = dither.dither_shift(sample * vol, VOLUME_BITS);
                b[0] = (clamp_for(format, scaled) as i8).to_ne_bytes()[0];
            }
        }
        SampleFormat::S16 => {
            for b in data.chunks_exact_mut(2) {
                let sample = i16::from_ne_bytes([b[0], b[1]]) as i64;
                let scaled = dither.dither_shift(sample * vol, VOLUME_BITS);
                b.copy_from_slice(&(clamp_for(format, scaled) as i16).to_ne_bytes());
            }
        }
        SampleFormat::S24P32 | SampleFormat::S32 => {
            for b in data.chunks_exact_mut(4) {
                let sample = i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i64;
                let scaled = dither.dither_shift(sample * vol, VOLUME_BITS);
                b.copy_from_slice(&(clamp_for(format, scaled) as i32).to_ne_bytes());
            }
        }
        SampleFormat::F32 => {
            for b in data.chunks_exact_mut(4) {
                let sample = f32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
                b.copy_from_slice(&(sample * scale).to_ne_bytes());
            }
        }
    }
}
