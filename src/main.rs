//! Cadenza playback daemon shell
//!
//! A thin binary around the playback core: loads the configuration, builds
//! the player with the configured outputs, plays the given URIs (gapless,
//! with optional cross-fade) and prints the final status as JSON.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadenza_player::{
    ConfigData, DetachedSong, EventBus, NullListener, PlayerControl, PlayerSettings, PlayerState,
};

/// Cadenza audio player daemon (playback core shell)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Cross-fade duration in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    crossfade: f32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Songs to play, e.g. tone:440?d=3
    #[arg(value_name = "URI", required = true)]
    uris: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cadenza_player={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("cadenzad starting");

    let config = ConfigData::load(&args.config)?;
    let settings = PlayerSettings::from_config(&config)?;

    let idle = EventBus::default();
    let pc = PlayerControl::with_defaults(&settings, Box::new(NullListener), idle)?;
    pc.set_cross_fade(args.crossfade);

    let songs: Vec<DetachedSong> = args
        .uris
        .iter()
        .map(|uri| DetachedSong::new(uri.as_str()))
        .collect();
    pc.play(songs[0].clone())?;

    // Hand the remaining songs over one at a time; the queue slot frees up
    // whenever the player makes the queued song current.
    for song in &songs[1..] {
        while pc.enqueue(song.clone()).is_err() {
            if pc.state() == PlayerState::Stop {
                // Playback died early; restart with this song.
                pc.check_rethrow_error()?;
                pc.play(song.clone())?;
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    while pc.state() != PlayerState::Stop {
        if pc.state() == PlayerState::Pause && pc.error_kind().is_some() {
            // Paused on an output failure; nobody here will re-enable it.
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    let status = pc.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    info!(
        total_play_time = pc.total_play_time(),
        "playback finished"
    );

    let result = pc.check_rethrow_error();
    pc.kill();
    result?;
    Ok(())
}
