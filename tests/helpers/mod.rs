//! Shared fixtures for the playback integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cadenza_player::audio::AudioFormat;
use cadenza_player::config::{ConfigData, OutputConfig, PlayerSettings};
use cadenza_player::error::{Error, Result};
use cadenza_player::output::{OutputPlugin, Sink};
use cadenza_player::song::Tag;
use cadenza_player::PlayerListener;

/// Poll until `pred` holds, failing the test after `timeout`.
pub fn wait_until(timeout: Duration, what: &str, mut pred: impl FnMut() -> bool) {
    let start = Instant::now();
    while !pred() {
        assert!(
            start.elapsed() < timeout,
            "timed out after {:?} waiting for: {}",
            timeout,
            what
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Mirror of the tone decoder's synthesis, for byte-exact assertions.
pub fn tone_bytes(freq: f64, rate: u32, channels: usize, first_frame: u64, frames: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames as usize * channels * 2);
    for i in 0..frames {
        let t = (first_frame + i) as f64 / rate as f64;
        let value = 0.5 * (TAU * freq * t).sin();
        let sample = (value * 32768.0)
            .round()
            .clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_ne_bytes());
        }
    }
    out
}

/// Captured state of one test output.
#[derive(Default)]
pub struct Collector {
    pub data: Mutex<Vec<u8>>,
    pub tags: Mutex<Vec<Tag>>,
    pub opened: Mutex<Option<AudioFormat>>,
    pub open_count: AtomicUsize,

    /// Fail the write that would push the byte count past this mark.
    pub fail_at: AtomicUsize,
    failed: AtomicBool,
}

impl Collector {
    fn new() -> Arc<Self> {
        let c = Collector::default();
        c.fail_at.store(usize::MAX, Ordering::Relaxed);
        Arc::new(c)
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn fail_after(&self, bytes: usize) {
        self.fail_at.store(bytes, Ordering::Relaxed);
    }

    /// Longest run of zero samples (any channel) in the captured stream.
    pub fn longest_zero_run(&self) -> usize {
        let data = self.data.lock().unwrap();
        let mut longest = 0usize;
        let mut current = 0usize;
        for pair in data.chunks_exact(2) {
            if i16::from_ne_bytes([pair[0], pair[1]]) == 0 {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }
        longest
    }
}

/// An output plugin whose sinks capture everything for inspection.
///
/// Block parameter `realtime` paces consumption against wall-clock like a
/// real device; without it the sink swallows PCM instantly.
pub struct CollectingOutputPlugin {
    collectors: Mutex<HashMap<String, Arc<Collector>>>,
}

impl CollectingOutputPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(CollectingOutputPlugin {
            collectors: Mutex::new(HashMap::new()),
        })
    }

    pub fn collector(&self, name: &str) -> Arc<Collector> {
        self.collectors
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(Collector::new)
            .clone()
    }
}

impl OutputPlugin for CollectingOutputPlugin {
    fn name(&self) -> &'static str {
        "collect"
    }

    fn create(&self, config: &OutputConfig) -> Result<Box<dyn Sink>> {
        let realtime = config.param.block_bool("realtime", false)?;
        Ok(Box::new(CollectingSink {
            name: config.name.clone(),
            collector: self.collector(&config.name),
            realtime,
            format: None,
            clock: None,
            played_bytes: 0,
        }))
    }
}

struct CollectingSink {
    name: String,
    collector: Arc<Collector>,
    realtime: bool,
    format: Option<AudioFormat>,
    clock: Option<Instant>,
    played_bytes: u64,
}

impl Sink for CollectingSink {
    fn open(&mut self, format: &AudioFormat) -> Result<()> {
        self.format = Some(*format);
        *self.collector.opened.lock().unwrap() = Some(*format);
        self.collector.open_count.fetch_add(1, Ordering::Relaxed);
        if self.clock.is_none() {
            self.clock = Some(Instant::now());
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let format = self.format.ok_or_else(|| Error::Output {
            name: self.name.clone(),
            message: "write on closed output".to_string(),
        })?;

        let fail_at = self.collector.fail_at.load(Ordering::Relaxed);
        if !self.collector.failed.load(Ordering::Relaxed)
            && self.collector.len() + data.len() > fail_at
        {
            self.collector.failed.store(true, Ordering::Relaxed);
            return Err(Error::Output {
                name: self.name.clone(),
                message: "injected write failure".to_string(),
            });
        }

        if self.realtime {
            let clock = self.clock.get_or_insert_with(Instant::now);
            let ahead = Duration::from_secs_f64(
                self.played_bytes as f64 / format.byte_rate() as f64,
            )
            .saturating_sub(clock.elapsed());
            if !ahead.is_zero() {
                std::thread::sleep(ahead.min(Duration::from_millis(50)));
            }
        }

        self.played_bytes += data.len() as u64;
        self.collector.data.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn send_tag(&mut self, tag: &Tag) -> Result<()> {
        self.collector.tags.lock().unwrap().push(tag.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.format = None;
    }
}

/// Listener counting its callbacks.
#[derive(Default)]
pub struct RecordingListener {
    pub syncs: AtomicUsize,
    pub tag_updates: AtomicUsize,
    pub border_pauses: AtomicUsize,
}

impl PlayerListener for RecordingListener {
    fn on_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    fn on_tag_modified(&self) {
        self.tag_updates.fetch_add(1, Ordering::Relaxed);
    }

    fn on_border_pause(&self) {
        self.border_pauses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Settings with `collect`-type outputs.
///
/// `outputs` is a list of `(name, realtime)` pairs.
pub fn test_settings(buffer_kib: u64, outputs: &[(&str, bool)]) -> PlayerSettings {
    let mut text = format!(
        "audio_buffer_size \"{}\"\nbuffer_before_play \"5%\"\n",
        buffer_kib
    );
    for (name, realtime) in outputs {
        text.push_str(&format!(
            "audio_output {{\n type \"collect\"\n name \"{}\"\n realtime \"{}\"\n}}\n",
            name,
            if *realtime { "yes" } else { "no" }
        ));
    }
    let config: ConfigData = text.parse().expect("test config parses");
    PlayerSettings::from_config(&config).expect("test settings build")
}
