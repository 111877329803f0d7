//! Sample-format and channel conversion
//!
//! Used by the decoder bridge when `audio_output_format` differs from the
//! source format. Conversions go through a normalized f64 intermediate;
//! channel mapping supports mono↔stereo. Sample-rate conversion is not a
//! core concern and is reported as an unsupported conversion.

use crate::audio::{AudioFormat, SampleFormat};
use crate::error::{Error, Result};

/// Convert a frame-aligned PCM buffer from one format to another.
///
/// Rates must match; channel mapping is limited to mono↔stereo.
pub fn convert(src: &[u8], from: AudioFormat, to: AudioFormat) -> Result<Vec<u8>> {
    if from == to {
        return Ok(src.to_vec());
    }

    if from.sample_rate != to.sample_rate
        || !channel_map_supported(from.channels, to.channels)
    {
        return Err(Error::UnsupportedConversion { from, to });
    }

    debug_assert_eq!(src.len() % from.frame_size(), 0);

    let samples = decode_samples(src, from.format);
    let samples = map_channels(&samples, from.channels, to.channels);
    Ok(encode_samples(&samples, to.format))
}

fn channel_map_supported(from: u8, to: u8) -> bool {
    from == to || (from == 1 && to == 2) || (from == 2 && to == 1)
}

fn decode_samples(src: &[u8], format: SampleFormat) -> Vec<f64> {
    match format {
        SampleFormat::S8 => src
            .iter()
            .map(|&b| i8::from_ne_bytes([b]) as f64 / 128.0)
            .collect(),
        SampleFormat::S16 => src
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]) as f64 / 32768.0)
            .collect(),
        SampleFormat::S24P32 => src
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64 / 8_388_608.0)
            .collect(),
        SampleFormat::S32 => src
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64 / 2_147_483_648.0)
            .collect(),
        SampleFormat::F32 => src
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect(),
    }
}

/// Encode normalized samples (`-1.0..1.0`) into `format`.
pub(crate) fn encode_samples(samples: &[f64], format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * format.sample_size());
    for &s in samples {
        match format {
            SampleFormat::S8 => {
                let v = (s * 128.0).round().clamp(i8::MIN as f64, i8::MAX as f64) as i8;
                out.extend_from_slice(&v.to_ne_bytes());
            }
            SampleFormat::S16 => {
                let v = (s * 32768.0)
                    .round()
                    .clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                out.extend_from_slice(&v.to_ne_bytes());
            }
            SampleFormat::S24P32 => {
                let v = (s * 8_388_608.0)
                    .round()
                    .clamp(-8_388_608.0, 8_388_607.0) as i32;
                out.extend_from_slice(&v.to_ne_bytes());
            }
            SampleFormat::S32 => {
                let v = (s * 2_147_483_648.0)
                    .round()
                    .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                out.extend_from_slice(&v.to_ne_bytes());
            }
            SampleFormat::F32 => {
                out.extend_from_slice(&(s as f32).to_ne_bytes());
            }
        }
    }
    out
}

fn map_channels(samples: &[f64], from: u8, to: u8) -> Vec<f64> {
    match (from, to) {
        (1, 2) => samples.iter().flat_map(|&s| [s, s]).collect(),
        (2, 1) => samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect(),
        _ => samples.to_vec(),
    }
}
