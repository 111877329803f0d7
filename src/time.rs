//! Playback time values
//!
//! Song positions and durations with millisecond resolution. The signed
//! variant admits "unknown" (negative), used for durations the decoder has
//! not determined yet.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A non-negative position or duration within a song, in milliseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SongTime(u64);

impl SongTime {
    pub const ZERO: SongTime = SongTime(0);

    pub const fn from_ms(ms: u64) -> Self {
        SongTime(ms)
    }

    pub const fn from_secs(secs: u64) -> Self {
        SongTime(secs * 1000)
    }

    /// Truncating conversion from fractional seconds; negative input clamps
    /// to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs <= 0.0 {
            SongTime(0)
        } else {
            SongTime((secs * 1000.0) as u64)
        }
    }

    pub const fn as_ms(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: SongTime) -> SongTime {
        SongTime(self.0.saturating_sub(other.0))
    }
}

impl Add for SongTime {
    type Output = SongTime;

    fn add(self, rhs: SongTime) -> SongTime {
        SongTime(self.0 + rhs.0)
    }
}

impl Sub for SongTime {
    type Output = SongTime;

    fn sub(self, rhs: SongTime) -> SongTime {
        SongTime(self.0.saturating_sub(rhs.0))
    }
}

impl From<SongTime> for Duration {
    fn from(t: SongTime) -> Duration {
        Duration::from_millis(t.0)
    }
}

impl fmt::Display for SongTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0 / 1000, self.0 % 1000)
    }
}

/// A song duration that may be unknown.
///
/// Negative values mean "unknown"; everything else behaves like
/// [`SongTime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignedSongTime(i64);

impl SignedSongTime {
    pub const ZERO: SignedSongTime = SignedSongTime(0);

    /// The "unknown" sentinel.
    pub const fn negative() -> Self {
        SignedSongTime(-1)
    }

    pub const fn from_ms(ms: i64) -> Self {
        SignedSongTime(ms)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        SignedSongTime((secs * 1000.0) as i64)
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn as_ms(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Convert to an unsigned time, if known.
    pub fn to_song_time(self) -> Option<SongTime> {
        if self.0 < 0 {
            None
        } else {
            Some(SongTime(self.0 as u64))
        }
    }
}

impl Default for SignedSongTime {
    fn default() -> Self {
        SignedSongTime::negative()
    }
}

impl From<SongTime> for SignedSongTime {
    fn from(t: SongTime) -> SignedSongTime {
        SignedSongTime(t.as_ms() as i64)
    }
}

impl fmt::Display for SignedSongTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_song_time() {
            Some(t) => t.fmt(f),
            None => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_time_conversions() {
        let t = SongTime::from_secs_f64(2.5);
        assert_eq!(t.as_ms(), 2500);
        assert_eq!(t.as_secs_f64(), 2.5);
        assert_eq!(SongTime::from_secs(3).as_ms(), 3000);
    }

    #[test]
    fn test_song_time_negative_input_clamps() {
        assert_eq!(SongTime::from_secs_f64(-1.0), SongTime::ZERO);
    }

    #[test]
    fn test_song_time_arithmetic() {
        let a = SongTime::from_ms(1500);
        let b = SongTime::from_ms(700);
        assert_eq!((a + b).as_ms(), 2200);
        assert_eq!((a - b).as_ms(), 800);
        assert_eq!((b - a).as_ms(), 0);
        assert_eq!(b.saturating_sub(a), SongTime::ZERO);
    }

    #[test]
    fn test_signed_song_time_unknown() {
        let unknown = SignedSongTime::negative();
        assert!(unknown.is_negative());
        assert_eq!(unknown.to_song_time(), None);
        assert_eq!(format!("{}", unknown), "unknown");
    }

    #[test]
    fn test_signed_song_time_known() {
        let t = SignedSongTime::from(SongTime::from_ms(1234));
        assert!(!t.is_negative());
        assert_eq!(t.to_song_time(), Some(SongTime::from_ms(1234)));
        assert_eq!(format!("{}", t), "1.234s");
    }
}
