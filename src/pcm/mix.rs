//! Cross-fade mixing
//!
//! Mixes one PCM buffer into another. A non-negative portion performs a
//! linear cross-fade (`dest * portion + src * (1 - portion)`); a negative
//! portion is the MixRamp mode, where both signals are summed at full
//! volume because the encoder's analysis already guarantees headroom.

use crate::audio::SampleFormat;
use crate::pcm::{clamp_for, PcmDither, VOLUME_BITS, VOLUME_ONE};

/// Mix `src` into `dest` in place.
///
/// Only the first `src.len()` bytes of `dest` are mixed; any trailer in
/// `dest` is left untouched. `portion1` is the share of `dest` in the
/// result; negative selects the MixRamp additive mode.
///
/// Both buffers must be frame-aligned in `format`.
pub fn mix(
    dither: &mut PcmDither,
    dest: &mut [u8],
    src: &[u8],
    format: SampleFormat,
    portion1: f32,
) {
    assert!(src.len() <= dest.len());
    let dest = &mut dest[..src.len()];

    match format {
        SampleFormat::S8 => mix_int::<1>(dither, dest, src, format, portion1, read_s8, write_s8),
        SampleFormat::S16 => mix_int::<2>(dither, dest, src, format, portion1, read_s16, write_s16),
        SampleFormat::S24P32 | SampleFormat::S32 => {
            mix_int::<4>(dither, dest, src, format, portion1, read_s32, write_s32)
        }
        SampleFormat::F32 => mix_f32(dest, src, portion1),
    }
}

fn volume_steps(portion1: f32) -> (i64, i64) {
    let vol1 = ((portion1 * VOLUME_ONE as f32).round() as i64).clamp(0, VOLUME_ONE);
    (vol1, VOLUME_ONE - vol1)
}

fn mix_int<const N: usize>(
    dither: &mut PcmDither,
    dest: &mut [u8],
    src: &[u8],
    format: SampleFormat,
    portion1: f32,
    read: fn(&[u8]) -> i64,
    write: fn(&mut [u8], i64),
) {
    debug_assert_eq!(dest.len() % N, 0);

    if portion1 < 0.0 {
        for (d, s) in dest.chunks_exact_mut(N).zip(src.chunks_exact(N)) {
            let sum = read(d) + read(s);
            write(d, clamp_for(format, sum));
        }
        return;
    }

    let (vol1, vol2) = volume_steps(portion1);
    for (d, s) in dest.chunks_exact_mut(N).zip(src.chunks_exact(N)) {
        let mixed = read(d) * vol1 + read(s) * vol2;
        let value = dither.dither_shift(mixed, VOLUME_BITS);
        write(d, clamp_for(format, value));
    }
}

fn mix_f32(dest: &mut [u8], src: &[u8], portion1: f32) {
    let additive = portion1 < 0.0;
    let portion2 = 1.0 - portion1;

    for (d, s) in dest.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = f32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
        let b = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
        let mixed = if additive {
            a + b
        } else {
            a * portion1 + b * portion2
        };
        d.copy_from_slice(&mixed.to_ne_bytes());
    }
}

fn read_s8(b: &[u8]) -> i64 {
    i8::from_ne_bytes([b[0]]) as i64
}

fn write_s8(b: &mut [u8], v: i64) {
    b.copy_from_slice(&(v as i8).to_ne_bytes());
}

fn read_s16(b: &[u8]) -> i64 {
    i16::from_ne_bytes([b[0], b[1]]) as i64
}

fn write_s16(b: &mut [u8], v: i64) {
    b.copy_from_slice(&(v as i16).to_ne_bytes());
}

fn read_s32(b: &[u8]) -> i64 {
    i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i64
}

fn write_s32(b: &mut [u8], v: i64) {
    b.copy_from_slice(&(v as i32).to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16_buf(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn s16_samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_full_portion_keeps_dest() {
        let mut dither = PcmDither::new();
        let mut dest = s16_buf(&[1000, -1000, 500]);
        let src = s16_buf(&[30000, 30000, 30000]);
        mix(&mut dither, &mut dest, &src, SampleFormat::S16, 1.0);
        assert_eq!(s16_samples(&dest), vec![1000, -1000, 500]);
    }

    #[test]
    fn test_zero_portion_takes_src() {
        let mut dither = PcmDither::new();
        let mut dest = s16_buf(&[1000, -1000]);
        let src = s16_buf(&[4000, 8000]);
        mix(&mut dither, &mut dest, &src, SampleFormat::S16, 0.0);
        assert_eq!(s16_samples(&dest), vec![4000, 8000]);
    }

    #[test]
    fn test_half_portion_averages() {
        let mut dither = PcmDither::new();
        let mut dest = s16_buf(&[2000; 8]);
        let src = s16_buf(&[1000; 8]);
        mix(&mut dither, &mut dest, &src, SampleFormat::S16, 0.5);
        for sample in s16_samples(&dest) {
            assert!((sample - 1500).abs() <= 1, "got {}", sample);
        }
    }

    #[test]
    fn test_negative_portion_adds() {
        let mut dither = PcmDither::new();
        let mut dest = s16_buf(&[100, -200]);
        let src = s16_buf(&[50, -50]);
        mix(&mut dither, &mut dest, &src, SampleFormat::S16, -1.0);
        assert_eq!(s16_samples(&dest), vec![150, -250]);
    }

    #[test]
    fn test_additive_clamps() {
        let mut dither = PcmDither::new();
        let mut dest = s16_buf(&[30000]);
        let src = s16_buf(&[30000]);
        mix(&mut dither, &mut dest, &src, SampleFormat::S16, -1.0);
        assert_eq!(s16_samples(&dest), vec![i16::MAX]);
    }

    #[test]
    fn test_src_shorter_leaves_trailer() {
        let mut dither = PcmDither::new();
        let mut dest = s16_buf(&[100, 200, 300, 400]);
        let src = s16_buf(&[0, 0]);
        mix(&mut dither, &mut dest, &src, SampleFormat::S16, 0.0);
        assert_eq!(s16_samples(&dest), vec![0, 0, 300, 400]);
    }

    #[test]
    fn test_f32_mix() {
        let mut dither = PcmDither::new();
        let mut dest: Vec<u8> = [0.8f32, -0.8]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        let src: Vec<u8> = [0.2f32, 0.2].iter().flat_map(|s| s.to_ne_bytes()).collect();
        mix(&mut dither, &mut dest, &src, SampleFormat::F32, 0.25);

        let out: Vec<f32> = dest
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert!((out[0] - 0.35).abs() < 1e-6);
        assert!((out[1] - (-0.05)).abs() < 1e-6);
    }

    #[test]
    fn test_s24_clamp_range() {
        let mut dither = PcmDither::new();
        let max24 = (1i32 << 23) - 1;
        let mut dest: Vec<u8> = max24.to_ne_bytes().to_vec();
        let src: Vec<u8> = max24.to_ne_bytes().to_vec();
        mix(&mut dither, &mut dest, &src, SampleFormat::S24P32, -1.0);
        let out = i32::from_ne_bytes([dest[0], dest[1], dest[2], dest[3]]);
        assert_eq!(out, max24);
    }
}
