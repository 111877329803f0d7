//! Music chunks
//!
//! The unit of flow between decoder, player and outputs: a fixed-capacity
//! PCM buffer plus the metadata the filter chain needs (tag snapshot,
//! replay-gain serial, cross-fade mix state, timestamp).
//!
//! A chunk is written by exactly one thread before it is pushed into a
//! pipe, and read-only afterwards until every consumer has passed it and it
//! returns to the buffer.

use crate::audio::AudioFormat;
use crate::replay_gain::ReplayGainInfo;
use crate::song::Tag;
use crate::time::SignedSongTime;

/// Payload capacity of one chunk in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// Sentinel for [`MusicChunk::replay_gain_serial`]: leave the filter's
/// replay-gain state untouched.
///
/// Serial `0` means the opposite ("no info, clear the filter"); any other
/// value asks the filter to load the chunk's info.
pub const IGNORE_REPLAY_GAIN: u32 = u32::MAX;

/// A fixed-capacity PCM buffer plus metadata.
pub struct MusicChunk {
    /// Playback time at the start of the chunk; negative when unknown
    /// (e.g. generated silence).
    pub time: SignedSongTime,

    /// Input bit rate while this chunk was decoded, in kbit/s.
    pub bit_rate: u16,

    /// The format of `data`; `None` until the first write.
    pub audio_format: Option<AudioFormat>,

    /// Tag snapshot to be sent to the sink before this chunk's PCM.
    pub tag: Option<Tag>,

    /// See [`IGNORE_REPLAY_GAIN`].
    pub replay_gain_serial: u32,

    /// Valid iff `replay_gain_serial` is neither `0` nor the sentinel.
    pub replay_gain_info: Option<ReplayGainInfo>,

    /// Cross-fade mix ratio, meaningful only while `other` is set:
    /// `[0, 1]` for a linear fade (1 = all current song), negative for the
    /// MixRamp additive mode.
    pub mix_ratio: f32,

    /// The chunk of the next song being faded in under this one.
    pub other: Option<Box<MusicChunk>>,

    data: Box<[u8]>,
    length: usize,
}

impl MusicChunk {
    pub(crate) fn new() -> Self {
        MusicChunk {
            time: SignedSongTime::negative(),
            bit_rate: 0,
            audio_format: None,
            tag: None,
            replay_gain_serial: 0,
            replay_gain_info: None,
            mix_ratio: 1.0,
            other: None,
            data: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            length: 0,
        }
    }

    /// Restore the freshly-allocated state, keeping the payload allocation.
    pub(crate) fn reset(&mut self) {
        self.time = SignedSongTime::negative();
        self.bit_rate = 0;
        self.audio_format = None;
        self.tag = None;
        self.replay_gain_serial = 0;
        self.replay_gain_info = None;
        self.mix_ratio = 1.0;
        self.other = None;
        self.length = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Whether the chunk's PCM (if any) is in `format`.
    pub fn check_format(&self, format: &AudioFormat) -> bool {
        match &self.audio_format {
            Some(af) => af == format,
            None => true,
        }
    }

    /// Append PCM to the chunk.
    ///
    /// The first write stamps the chunk with `format`, `time` and
    /// `bit_rate`. Returns the number of bytes accepted, always a multiple
    /// of the frame size; zero means the chunk is full and must be pushed.
    pub fn write(
        &mut self,
        format: AudioFormat,
        time: SignedSongTime,
        bit_rate: u16,
        src: &[u8],
    ) -> usize {
        assert!(self.check_format(&format), "chunk format changed mid-write");

        if self.length == 0 {
            self.audio_format = Some(format);
            self.time = time;
            self.bit_rate = bit_rate;
        }

        let frame_size = format.frame_size();
        let space = CHUNK_SIZE - self.length;
        let space = space - space % frame_size;
        let n = space.min(src.len() - src.len() % frame_size);

        self.data[self.length..self.length + n].copy_from_slice(&src[..n]);
        self.length += n;
        n
    }

    /// Fill the rest of the chunk with silence in `format`.
    pub fn fill_silence(&mut self, format: AudioFormat) {
        if self.length == 0 {
            self.audio_format = Some(format);
        }
        let frame_size = format.frame_size();
        let space = CHUNK_SIZE - self.length;
        let space = space - space % frame_size;
        self.data[self.length..self.length + space].fill(0);
        self.length += space;
    }
}

impl std::fmt::Debug for MusicChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicChunk")
            .field("time", &self.time)
            .field("length", &self.length)
            .field("audio_format", &self.audio_format)
            .field("tag", &self.tag.is_some())
            .field("replay_gain_serial", &self.replay_gain_serial)
            .field("other", &self.other.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    fn cd_format() -> AudioFormat {
        AudioFormat::new(44100, SampleFormat::S16, 2)
    }

    #[test]
    fn test_write_stamps_metadata() {
        let mut chunk = MusicChunk::new();
        let n = chunk.write(
            cd_format(),
            SignedSongTime::from_ms(1500),
            320,
            &[0u8; 16],
        );
        assert_eq!(n, 16);
        assert_eq!(chunk.length(), 16);
        assert_eq!(chunk.audio_format, Some(cd_format()));
        assert_eq!(chunk.time, SignedSongTime::from_ms(1500));
        assert_eq!(chunk.bit_rate, 320);
    }

    #[test]
    fn test_write_is_frame_aligned() {
        let mut chunk = MusicChunk::new();
        // 4-byte frames: a 10-byte write must accept only 8.
        let n = chunk.write(cd_format(), SignedSongTime::ZERO, 0, &[0u8; 10]);
        assert_eq!(n, 8);
        assert_eq!(chunk.length() % cd_format().frame_size(), 0);
    }

    #[test]
    fn test_write_until_full() {
        let mut chunk = MusicChunk::new();
        let big = vec![0u8; CHUNK_SIZE * 2];
        let n = chunk.write(cd_format(), SignedSongTime::ZERO, 0, &big);
        assert_eq!(n, CHUNK_SIZE);
        assert_eq!(chunk.write(cd_format(), SignedSongTime::ZERO, 0, &big), 0);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut chunk = MusicChunk::new();
        chunk.write(cd_format(), SignedSongTime::ZERO, 128, &[1u8; 64]);
        chunk.replay_gain_serial = 7;
        chunk.reset();
        assert!(chunk.is_empty());
        assert_eq!(chunk.replay_gain_serial, 0);
        assert!(chunk.audio_format.is_none());
        assert_eq!(chunk.write(cd_format(), SignedSongTime::ZERO, 0, &[0u8; 8]), 8);
    }

    #[test]
    fn test_fill_silence() {
        let mut chunk = MusicChunk::new();
        chunk.fill_silence(cd_format());
        assert_eq!(chunk.length(), CHUNK_SIZE);
        assert!(chunk.data().iter().all(|&b| b == 0));
    }
}
