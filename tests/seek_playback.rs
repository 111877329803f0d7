//! Seek scenarios
//!
//! The acknowledgement contract: once a seek returns, nothing decoded
//! before the target may reach a sink. The tone decoder's synthesis is
//! frame-exact, so the byte stream after a seek is fully predictable.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use cadenza_player::decoder::default_decoder_plugins;
use cadenza_player::output::OutputPlugin;
use cadenza_player::{DetachedSong, EventBus, PlayerControl, PlayerState, SongTime};

use helpers::{test_settings, tone_bytes, wait_until, CollectingOutputPlugin, RecordingListener};

fn build_player(
    buffer_kib: u64,
) -> (Arc<PlayerControl>, Arc<CollectingOutputPlugin>) {
    let settings = test_settings(buffer_kib, &[("main", true)]);
    let plugin = CollectingOutputPlugin::new();
    let dyn_plugin: Arc<dyn OutputPlugin> = Arc::clone(&plugin) as Arc<dyn OutputPlugin>;
    let pc = PlayerControl::new(
        &settings,
        default_decoder_plugins(),
        &[dyn_plugin],
        Box::new(Arc::new(RecordingListener::default())),
        EventBus::default(),
    )
    .expect("player construction");
    (pc, plugin)
}

#[test]
fn test_seek_across_boundary() {
    let (pc, plugin) = build_player(2048);
    let song = DetachedSong::new("tone:440?d=10");

    pc.play(song.clone()).unwrap();
    wait_until(Duration::from_secs(10), "playback reaches 300ms", || {
        pc.status().elapsed_time >= SongTime::from_ms(300)
    });

    // Pause first so the byte stream after the seek has a clean edge.
    pc.set_pause(true);
    pc.seek(song.clone(), SongTime::from_secs(7)).unwrap();
    assert_eq!(pc.status().elapsed_time, SongTime::from_secs(7));
    assert_eq!(pc.status().state, PlayerState::Pause);

    let mark = plugin.collector("main").len();
    pc.set_pause(false);
    wait_until(Duration::from_secs(10), "post-seek audio flows", || {
        plugin.collector("main").len() >= mark + 16 * 1024
    });

    // The first byte delivered after the seek is the sample at exactly
    // 7 s; nothing from the skipped window appears.
    let collected = plugin.collector("main").bytes();
    let expected = tone_bytes(440.0, 44100, 2, 7 * 44100, 2048);
    assert_eq!(&collected[mark..mark + expected.len()], &expected[..]);

    let elapsed = pc.status().elapsed_time;
    assert!(elapsed >= SongTime::from_secs(7), "elapsed {}", elapsed);

    pc.stop();
    pc.kill();
}

#[test]
fn test_seek_is_idempotent() {
    let (pc, _plugin) = build_player(2048);
    let song = DetachedSong::new("tone:440?d=10");

    pc.play(song.clone()).unwrap();
    wait_until(Duration::from_secs(10), "playing", || {
        pc.status().state == PlayerState::Play
    });

    pc.seek(song.clone(), SongTime::from_secs(5)).unwrap();
    let first = pc.status().elapsed_time;
    assert!(first >= SongTime::from_secs(5) && first < SongTime::from_ms(5500));

    pc.seek(song.clone(), SongTime::from_secs(5)).unwrap();
    let second = pc.status().elapsed_time;
    assert!(
        second >= SongTime::from_secs(5) && second < SongTime::from_ms(5500),
        "elapsed after repeated seek: {}",
        second
    );

    pc.stop();
    pc.kill();
}

#[test]
fn test_seek_past_end_clamps() {
    let (pc, _plugin) = build_player(2048);
    let song = DetachedSong::new("tone:440?d=3");

    pc.play(song.clone()).unwrap();
    wait_until(Duration::from_secs(10), "playing", || {
        pc.status().state == PlayerState::Play
    });

    // Seeking beyond the duration clamps to the end; playback then
    // finishes almost immediately.
    pc.seek(song.clone(), SongTime::from_secs(60)).unwrap();
    wait_until(Duration::from_secs(10), "runs out", || {
        pc.status().state == PlayerState::Stop
    });
    assert!(pc.check_rethrow_error().is_ok());

    pc.kill();
}
