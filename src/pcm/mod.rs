//! PCM sample plumbing
//!
//! The byte-level operations behind the per-output filter chain: mixing for
//! cross-fades, gain scaling for replay gain, dithering when integer math
//! shifts back down to sample width, and the format/channel conversions the
//! decoder applies to honor `audio_output_format`.
//!
//! Sample-rate conversion is deliberately absent; resampling belongs to
//! decoder plugins.

mod convert;
mod dither;
mod mix;
mod volume;

pub use convert::convert;
pub(crate) use convert::encode_samples;
pub use dither::PcmDither;
pub use mix::mix;
pub use volume::apply_volume;

/// Fixed-point bits used by integer gain and mix math.
pub(crate) const VOLUME_BITS: u32 = 10;

/// The fixed-point representation of a gain of 1.0.
pub(crate) const VOLUME_ONE: i64 = 1 << VOLUME_BITS;

pub(crate) fn clamp_for(format: crate::audio::SampleFormat, value: i64) -> i64 {
    use crate::audio::SampleFormat;
    match format {
        SampleFormat::S8 => value.clamp(i8::MIN as i64, i8::MAX as i64),
        SampleFormat::S16 => value.clamp(i16::MIN as i64, i16::MAX as i64),
        SampleFormat::S24P32 => value.clamp(-(1 << 23), (1 << 23) - 1),
        SampleFormat::S32 => value.clamp(i32::MIN as i64, i32::MAX as i64),
        SampleFormat::F32 => value,
    }
}
