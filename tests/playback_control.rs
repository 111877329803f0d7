//! Transport-state scenarios: play, pause, resume, cancel
//!
//! Drives the whole core (player thread, decoder thread, output threads)
//! through the control surface, with capturing sinks standing in for real
//! audio devices.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cadenza_player::decoder::default_decoder_plugins;
use cadenza_player::output::OutputPlugin;
use cadenza_player::{
    DetachedSong, EventBus, IdleEvent, PlayerControl, PlayerState, SongTime,
};

use helpers::{test_settings, wait_until, CollectingOutputPlugin, RecordingListener};

fn build_player(
    buffer_kib: u64,
    outputs: &[(&str, bool)],
) -> (
    Arc<PlayerControl>,
    Arc<CollectingOutputPlugin>,
    Arc<RecordingListener>,
) {
    let settings = test_settings(buffer_kib, outputs);
    let plugin = CollectingOutputPlugin::new();
    let listener = Arc::new(RecordingListener::default());

    let dyn_plugin: Arc<dyn OutputPlugin> = Arc::clone(&plugin) as Arc<dyn OutputPlugin>;
    let pc = PlayerControl::new(
        &settings,
        default_decoder_plugins(),
        &[dyn_plugin],
        Box::new(Arc::clone(&listener)),
        EventBus::default(),
    )
    .expect("player construction");

    (pc, plugin, listener)
}

#[test]
fn test_play_pause_resume() {
    let (pc, plugin, _listener) = build_player(512, &[("main", true)]);
    let mut idle_rx = pc.idle_bus().subscribe();

    pc.play(DetachedSong::new("tone:440?d=30")).unwrap();

    wait_until(Duration::from_secs(10), "elapsed time advances", || {
        pc.status().elapsed_time >= SongTime::from_ms(300)
    });
    let status = pc.status();
    assert_eq!(status.state, PlayerState::Play);
    assert_eq!(
        status.audio_format.map(|f| f.to_string()),
        Some("44100:16:2".to_string())
    );
    assert_eq!(status.total_time.to_song_time(), Some(SongTime::from_secs(30)));

    // Pause freezes the elapsed time at the pause point.
    pc.set_pause(true);
    assert_eq!(pc.status().state, PlayerState::Pause);
    let frozen = pc.status().elapsed_time;
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(pc.status().elapsed_time, frozen);

    // Resume continues from there.
    pc.set_pause(false);
    assert_eq!(pc.status().state, PlayerState::Play);
    wait_until(Duration::from_secs(10), "elapsed resumes", || {
        pc.status().elapsed_time > frozen + SongTime::from_ms(200)
    });

    // Toggling pause twice returns to the original state.
    pc.pause();
    pc.pause();
    assert_eq!(pc.status().state, PlayerState::Play);

    assert!(plugin.collector("main").len() > 0);

    pc.stop();
    wait_until(Duration::from_secs(5), "stopped", || {
        pc.status().state == PlayerState::Stop
    });

    // The state changes raised idle wakeups.
    let mut player_events = 0;
    while let Ok(event) = idle_rx.try_recv() {
        if event == IdleEvent::Player {
            player_events += 1;
        }
    }
    assert!(player_events >= 2, "got {} player events", player_events);

    pc.kill();
}

#[test]
fn test_cancel_queued_song() {
    // A 4-second song fits entirely into the buffer, so the decoder goes
    // on to pre-decode the queued (very long) song until the buffer is
    // exhausted.
    let (pc, _plugin, _listener) = build_player(1024, &[("main", true)]);

    pc.play(DetachedSong::new("tone:440?d=4")).unwrap();
    pc.enqueue(DetachedSong::new("tone:880?d=600")).unwrap();

    wait_until(Duration::from_secs(10), "pre-decode fills the buffer", || {
        pc.buffer().allocated() > pc.buffer().capacity() * 3 / 4
    });
    let before = pc.buffer().allocated();

    pc.cancel();

    // The queued song's chunks return to the buffer.
    wait_until(Duration::from_secs(5), "queued chunks are freed", || {
        pc.buffer().allocated() + 40 < before
    });

    // The current song continues uninterrupted.
    assert_eq!(pc.status().state, PlayerState::Play);
    let e1 = pc.status().elapsed_time;
    std::thread::sleep(Duration::from_millis(300));
    let e2 = pc.status().elapsed_time;
    assert!(e2 > e1, "elapsed stuck at {}", e2);

    // The queue slot is free again.
    pc.enqueue(DetachedSong::new("tone:660?d=600")).unwrap();
    pc.cancel();

    pc.stop();
    pc.kill();
}

#[test]
fn test_disable_output_mid_play() {
    let (pc, plugin, _listener) = build_player(512, &[("main", true), ("aux", true)]);
    let aux = plugin.collector("aux");

    pc.play(DetachedSong::new("tone:440?d=30")).unwrap();
    wait_until(Duration::from_secs(10), "both outputs flow", || {
        aux.len() > 0 && plugin.collector("main").len() > 0
    });

    // Disabling raises UPDATE_AUDIO through the client back-edge and
    // closes the output.
    assert!(pc.outputs().set_enabled("aux", false).unwrap());
    wait_until(Duration::from_secs(5), "aux stops", || {
        let mark = aux.len();
        std::thread::sleep(Duration::from_millis(150));
        aux.len() == mark
    });
    let frozen = aux.len();

    // Main keeps playing.
    let main_mark = plugin.collector("main").len();
    wait_until(Duration::from_secs(5), "main still flows", || {
        plugin.collector("main").len() > main_mark
    });

    // Re-enabling reopens it mid-song.
    assert!(pc.outputs().set_enabled("aux", true).unwrap());
    wait_until(Duration::from_secs(5), "aux resumes", || aux.len() > frozen);

    pc.stop();
    pc.kill();
}

#[test]
fn test_stop_clears_session() {
    let (pc, _plugin, listener) = build_player(512, &[("main", true)]);

    pc.play(DetachedSong::new("tone:440?d=30")).unwrap();
    wait_until(Duration::from_secs(10), "playing", || {
        pc.status().state == PlayerState::Play
    });

    pc.stop();
    let status = pc.status();
    assert_eq!(status.state, PlayerState::Stop);
    assert_eq!(status.audio_format, None);
    assert_eq!(status.elapsed_time, SongTime::ZERO);

    // The session end was reported to the queue owner.
    assert!(listener.syncs.load(Ordering::Relaxed) >= 1);

    // Stop → play works again.
    pc.play(DetachedSong::new("tone:440?d=30")).unwrap();
    wait_until(Duration::from_secs(10), "playing again", || {
        pc.status().state == PlayerState::Play
    });
    pc.stop();
    pc.kill();
}
