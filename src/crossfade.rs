//! Cross-fade planning
//!
//! Turns the configured fade duration (or the songs' MixRamp analysis)
//! into the number of chunks the player must hold back at the end of a
//! song. The per-chunk mix itself happens in the output source; this
//! module only decides how many tail chunks take part.

use tracing::{debug, warn};

use crate::audio::AudioFormat;
use crate::chunk::CHUNK_SIZE;
use crate::mixramp::mixramp_interpolate;
use crate::time::SignedSongTime;

/// The user-facing cross-fade parameters.
#[derive(Debug, Clone, Copy)]
pub struct CrossFadeSettings {
    /// Fade duration in seconds; zero disables the linear cross-fade.
    pub duration: f32,

    /// MixRamp loudness threshold in dB; zero disables MixRamp.
    pub mixramp_db: f32,

    /// Seconds subtracted from the MixRamp overlap. NaN (the default)
    /// disables MixRamp; a positive value also switches the mix to the
    /// additive MixRamp mode.
    pub mixramp_delay: f32,
}

impl Default for CrossFadeSettings {
    fn default() -> Self {
        CrossFadeSettings {
            duration: 0.0,
            mixramp_db: 0.0,
            mixramp_delay: f32::NAN,
        }
    }
}

impl CrossFadeSettings {
    pub fn is_active(&self) -> bool {
        self.duration > 0.0 || self.mixramp_db != 0.0
    }

    /// Whether the player should mark fade chunks with the MixRamp
    /// additive ratio instead of a linear one.
    pub fn use_mixramp_ratio(&self) -> bool {
        self.mixramp_delay > 0.0
    }

    /// Number of chunks to cross-fade at the end of the current song.
    ///
    /// Zero means no fade: unknown or too-short duration, a pipe format
    /// change across the boundary, or MixRamp analysis that does not
    /// overlap.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate(
        &self,
        total_time: SignedSongTime,
        replay_gain_db: f32,
        replay_gain_prev_db: f32,
        mixramp_start: Option<&str>,
        mixramp_prev_end: Option<&str>,
        format: AudioFormat,
        old_format: AudioFormat,
        max_chunks: usize,
    ) -> usize {
        let mixramp_usable =
            self.mixramp_db != 0.0 && mixramp_start.is_some() && mixramp_prev_end.is_some();

        if self.duration <= 0.0 && !mixramp_usable {
            return 0;
        }

        let total = match total_time.to_song_time() {
            Some(t) => t,
            None => return 0,
        };
        if self.duration as f64 >= total.as_secs_f64() {
            return 0;
        }

        if format != old_format {
            debug!(%format, %old_format, "song formats differ, cross-fade disabled");
            return 0;
        }

        let mut chunks = if !mixramp_usable {
            format.time_to_size(self.duration as f64) / CHUNK_SIZE + 1
        } else {
            let overlap_current = mixramp_start
                .and_then(|list| mixramp_interpolate(list, self.mixramp_db - replay_gain_db));
            let overlap_prev = mixramp_prev_end
                .and_then(|list| mixramp_interpolate(list, self.mixramp_db - replay_gain_prev_db));

            match (overlap_current, overlap_prev) {
                (Some(current), Some(prev)) if self.mixramp_delay <= current + prev => {
                    let overlap = (current + prev - self.mixramp_delay.max(0.0)) as f64;
                    format.time_to_size(overlap) / CHUNK_SIZE
                }
                _ => {
                    debug!("no usable MixRamp overlap, cross-fade disabled");
                    return 0;
                }
            }
        };

        if chunks > max_chunks {
            warn!(
                chunks,
                max_chunks, "audio_buffer_size is too small for the configured cross-fade"
            );
            chunks = max_chunks;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use crate::time::SongTime;

    fn cd() -> AudioFormat {
        AudioFormat::new(44100, SampleFormat::S16, 2)
    }

    fn settings(duration: f32) -> CrossFadeSettings {
        CrossFadeSettings {
            duration,
            ..CrossFadeSettings::default()
        }
    }

    fn total(secs: u64) -> SignedSongTime {
        SignedSongTime::from(SongTime::from_secs(secs))
    }

    #[test]
    fn test_disabled_duration() {
        let n = settings(0.0).calculate(total(10), 0.0, 0.0, None, None, cd(), cd(), 1000);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_linear_chunk_count() {
        // 2 s at 44100:16:2 = 352800 bytes = 86.1 chunks.
        let n = settings(2.0).calculate(total(10), 0.0, 0.0, None, None, cd(), cd(), 1000);
        assert_eq!(n, cd().time_to_size(2.0) / CHUNK_SIZE + 1);
        assert!(n >= 86);
    }

    #[test]
    fn test_unknown_duration_disables() {
        let n = settings(2.0).calculate(
            SignedSongTime::negative(),
            0.0,
            0.0,
            None,
            None,
            cd(),
            cd(),
            1000,
        );
        assert_eq!(n, 0);
    }

    #[test]
    fn test_short_song_disables() {
        let n = settings(5.0).calculate(total(4), 0.0, 0.0, None, None, cd(), cd(), 1000);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_format_change_disables() {
        let other = AudioFormat::new(48000, SampleFormat::S16, 2);
        let n = settings(2.0).calculate(total(10), 0.0, 0.0, None, None, cd(), other, 1000);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_clamped_to_max_chunks() {
        let n = settings(2.0).calculate(total(10), 0.0, 0.0, None, None, cd(), cd(), 10);
        assert_eq!(n, 10);
    }

    #[test]
    fn test_mixramp_overlap() {
        let settings = CrossFadeSettings {
            duration: 0.0,
            mixramp_db: -20.0,
            mixramp_delay: 1.0,
        };
        // Next song reaches -20 dB at 2 s, previous song's tail passes
        // -20 dB at 1 s: overlap = 2 + 1 - delay(1) = 2 s.
        let start = "-30.0 1.0;-20.0 2.0";
        let prev_end = "-25.0 0.5;-20.0 1.0";
        let n = settings.calculate(
            total(10),
            0.0,
            0.0,
            Some(start),
            Some(prev_end),
            cd(),
            cd(),
            1000,
        );
        assert_eq!(n, cd().time_to_size(2.0) / CHUNK_SIZE);
    }

    #[test]
    fn test_mixramp_without_overlap_disables() {
        let settings = CrossFadeSettings {
            duration: 0.0,
            mixramp_db: -20.0,
            mixramp_delay: 10.0,
        };
        let start = "-30.0 1.0;-20.0 2.0";
        let prev_end = "-25.0 0.5;-20.0 1.0";
        let n = settings.calculate(
            total(10),
            0.0,
            0.0,
            Some(start),
            Some(prev_end),
            cd(),
            cd(),
            1000,
        );
        assert_eq!(n, 0);
    }

    #[test]
    fn test_mixramp_delay_nan_disables_mixramp() {
        // mixramp_db set but no delay configured: neither branch applies.
        let settings = CrossFadeSettings {
            duration: 0.0,
            mixramp_db: -20.0,
            mixramp_delay: f32::NAN,
        };
        let n = settings.calculate(
            total(10),
            0.0,
            0.0,
            Some("-30.0 1.0;-20.0 2.0"),
            Some("-25.0 0.5;-20.0 1.0"),
            cd(),
            cd(),
            1000,
        );
        assert_eq!(n, 0);
        assert!(!settings.use_mixramp_ratio());
    }
}
