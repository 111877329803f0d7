//! The decoder thread
//!
//! Waits for commands under the shared mutex and runs one song at a time.
//! The START command is acknowledged *before* plugin selection so the
//! player is never blocked on I/O; startup completion is published through
//! the state machine (DECODE on success, ERROR on failure).

use std::sync::{Arc, MutexGuard};

use tracing::{debug, info, warn};

use crate::decoder::bridge::DecoderBridge;
use crate::decoder::control::{DecoderCommand, DecoderControl, DecoderState};
use crate::error::Error;
use crate::player::CoreState;

pub(crate) fn decoder_thread(dc: Arc<DecoderControl>) {
    let mut guard = dc.sync.lock();
    loop {
        if guard.decoder.quit {
            debug!("decoder thread exiting");
            return;
        }

        match guard.decoder.command {
            DecoderCommand::Start => {
                guard = run_song(&dc, guard);
            }
            DecoderCommand::Stop => {
                // Already stopped; just acknowledge.
                guard.decoder.command = DecoderCommand::None;
                dc.sync.cond.notify_all();
            }
            DecoderCommand::Seek => {
                // There is no song to seek in.
                guard.decoder.seek_error = true;
                guard.decoder.command = DecoderCommand::None;
                dc.sync.cond.notify_all();
            }
            DecoderCommand::None => {
                guard = dc.sync.decoder_cond.wait(guard).unwrap();
            }
        }
    }
}

fn run_song<'a>(
    dc: &'a Arc<DecoderControl>,
    mut guard: MutexGuard<'a, CoreState>,
) -> MutexGuard<'a, CoreState> {
    guard.decoder.state = DecoderState::Start;
    guard.decoder.seek_error = false;
    guard.decoder.seekable = false;
    guard.decoder.cycle_mix_ramp();
    guard.decoder.replay_gain_prev_db = guard.decoder.replay_gain_db;
    guard.decoder.replay_gain_db = 0.0;

    let song = guard.decoder.song.clone().expect("START without a song");
    let buffer = guard.decoder.buffer.clone().expect("START without a buffer");
    let pipe = guard.decoder.pipe.clone().expect("START without a pipe");
    let start_time = guard.decoder.start_time;
    let end_time = guard.decoder.end_time;

    // Acknowledge the START command; the player observes startup
    // completion through the state.
    guard.decoder.command = DecoderCommand::None;
    dc.sync.cond.notify_all();
    drop(guard);

    info!(uri = %song.uri, "decoding");

    let mut bridge = DecoderBridge::new(
        Arc::clone(dc),
        buffer,
        pipe,
        start_time,
        song.start_time,
        end_time,
    );
    let result = match dc.select_plugin(&song.uri) {
        None => Err(Error::NoDecoder {
            uri: song.uri.clone(),
        }),
        Some(plugin) => {
            let result = plugin.stream_decode(&mut bridge, &song);
            bridge.finish(result)
        }
    };
    let was_ready = bridge.was_ready();
    drop(bridge);

    let mut guard = dc.sync.lock();
    match result {
        Ok(()) => {
            debug!(uri = %song.uri, "decoder finished");
            guard.decoder.state = DecoderState::Stop;
        }
        Err(error) if was_ready => {
            // Mid-DECODE failure: the stream simply terminates early; the
            // player notices the decoder going idle.
            warn!(uri = %song.uri, %error, "decoder terminated mid-stream");
            guard.decoder.state = DecoderState::Stop;
        }
        Err(error) => {
            warn!(uri = %song.uri, %error, "decoder failed to start");
            guard.decoder.error = Some(Arc::new(error));
            guard.decoder.state = DecoderState::Error;
        }
    }
    dc.sync.cond.notify_all();
    guard
}
