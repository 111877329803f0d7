//! Audio format descriptions
//!
//! The `(sample_rate, sample_format, channels)` triple that every chunk in
//! the pipe is stamped with, plus the frame-size math the pipe invariants
//! are built on: a chunk's length is always a multiple of the frame size.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::time::SongTime;

/// PCM sample encodings carried by the pipe.
///
/// Samples are native-endian. `S24P32` is 24-bit audio padded to 32-bit
/// storage (sign-extended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S8,
    S16,
    S24P32,
    S32,
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub const fn sample_size(self) -> usize {
        match self {
            SampleFormat::S8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S24P32 | SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SampleFormat::S8 => "8",
            SampleFormat::S16 => "16",
            SampleFormat::S24P32 => "24",
            SampleFormat::S32 => "32",
            SampleFormat::F32 => "f",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "8" => Ok(SampleFormat::S8),
            "16" => Ok(SampleFormat::S16),
            "24" => Ok(SampleFormat::S24P32),
            "32" => Ok(SampleFormat::S32),
            "f" => Ok(SampleFormat::F32),
            _ => Err(Error::Config(format!("invalid sample format \"{}\"", s))),
        }
    }
}

/// The format of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub channels: u8,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, format: SampleFormat, channels: u8) -> Self {
        AudioFormat {
            sample_rate,
            format,
            channels,
        }
    }

    pub fn is_valid(&self) -> bool {
        (1..=768_000).contains(&self.sample_rate) && (1..=8).contains(&self.channels)
    }

    /// Size of one frame (one sample per channel) in bytes.
    pub const fn frame_size(&self) -> usize {
        self.format.sample_size() * self.channels as usize
    }

    /// Bytes of PCM per second of audio.
    pub const fn byte_rate(&self) -> usize {
        self.frame_size() * self.sample_rate as usize
    }

    /// Convert a duration to a byte count, rounded down to a whole frame.
    pub fn time_to_size(&self, seconds: f64) -> usize {
        let bytes = (self.byte_rate() as f64 * seconds) as usize;
        bytes - bytes % self.frame_size()
    }

    /// Convert a byte count to the playback time it represents.
    pub fn size_to_time(&self, bytes: usize) -> SongTime {
        SongTime::from_secs_f64(bytes as f64 / self.byte_rate() as f64)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sample_rate, self.format, self.channels)
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    /// Parse the `audio_output_format` syntax, e.g. `44100:16:2`.
    fn from_str(s: &str) -> Result<Self, Error> {
        let mut parts = s.split(':');
        let (rate, bits, channels) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(r), Some(b), Some(c), None) => (r, b, c),
            _ => {
                return Err(Error::Config(format!(
                    "invalid audio format \"{}\" (expected rate:bits:channels)",
                    s
                )))
            }
        };

        let sample_rate: u32 = rate
            .parse()
            .map_err(|_| Error::Config(format!("invalid sample rate \"{}\"", rate)))?;
        let format = bits.parse()?;
        let channels: u8 = channels
            .parse()
            .map_err(|_| Error::Config(format!("invalid channel count \"{}\"", channels)))?;

        let af = AudioFormat::new(sample_rate, format, channels);
        if !af.is_valid() {
            return Err(Error::Config(format!("unsupported audio format \"{}\"", s)));
        }
        Ok(af)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        let cd = AudioFormat::new(44100, SampleFormat::S16, 2);
        assert_eq!(cd.frame_size(), 4);
        assert_eq!(cd.byte_rate(), 176_400);

        let hires = AudioFormat::new(96000, SampleFormat::S24P32, 2);
        assert_eq!(hires.frame_size(), 8);
    }

    #[test]
    fn test_time_size_round_trip() {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        let bytes = af.time_to_size(1.0);
        assert_eq!(bytes, 176_400);
        assert_eq!(bytes % af.frame_size(), 0);
        assert_eq!(af.size_to_time(bytes), SongTime::from_secs(1));
    }

    #[test]
    fn test_time_to_size_frame_aligned() {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        // An awkward duration must still produce whole frames.
        assert_eq!(af.time_to_size(0.333_333) % af.frame_size(), 0);
    }

    #[test]
    fn test_parse() {
        let af: AudioFormat = "48000:24:2".parse().unwrap();
        assert_eq!(af, AudioFormat::new(48000, SampleFormat::S24P32, 2));
        assert_eq!(af.to_string(), "48000:24:2");

        let float: AudioFormat = "44100:f:1".parse().unwrap();
        assert_eq!(float.format, SampleFormat::F32);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("44100:16".parse::<AudioFormat>().is_err());
        assert!("44100:17:2".parse::<AudioFormat>().is_err());
        assert!("0:16:2".parse::<AudioFormat>().is_err());
        assert!("44100:16:9".parse::<AudioFormat>().is_err());
    }
}
