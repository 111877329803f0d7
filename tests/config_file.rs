//! Configuration file loading

use std::io::Write;

use cadenza_player::audio::{AudioFormat, SampleFormat};
use cadenza_player::config::{ConfigData, PlayerSettings};
use cadenza_player::replay_gain::ReplayGainMode;

const SAMPLE_CONFIG: &str = r#"
# Cadenza daemon configuration
audio_output_format  "44100:16:2"
audio_buffer_size    "2048"
buffer_before_play   "20%"

replaygain           "track"
replaygain_preamp    "6"
volume_normalization "yes"

max_command_list_size  "1024"
max_output_buffer_size "4096"

audio_output {
    type    "null"
    name    "Null Output"   # block params may carry comments too
    sync    "no"
}

audio_output {
    type    "null"
    name    "Second Output"
    enabled "no"
}
"#;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

    let config = ConfigData::load(file.path()).unwrap();
    let settings = PlayerSettings::from_config(&config).unwrap();

    assert_eq!(
        settings.configured_audio_format,
        Some(AudioFormat::new(44100, SampleFormat::S16, 2))
    );
    assert_eq!(settings.buffer_chunks, 2048 * 1024 / 4096);
    assert_eq!(settings.buffered_before_play, settings.buffer_chunks / 5);
    assert_eq!(settings.replay_gain_mode, ReplayGainMode::Track);
    assert!(settings.volume_normalization);
    assert_eq!(settings.max_command_list_size, 1024 * 1024);
    assert_eq!(settings.max_output_buffer_size, 4096 * 1024);

    assert_eq!(settings.outputs.len(), 2);
    assert_eq!(settings.outputs[0].name, "Null Output");
    assert!(settings.outputs[0].enabled);
    assert_eq!(settings.outputs[0].param.block_value("sync"), Some("no"));
    assert!(!settings.outputs[1].enabled);
}

#[test]
fn test_missing_file_is_an_error() {
    let missing = std::path::Path::new("/nonexistent/cadenza.conf");
    assert!(ConfigData::load(missing).is_err());
}

#[test]
fn test_zero_buffer_before_play() {
    let config: ConfigData = "\
buffer_before_play \"0%\"
audio_output {
    type \"null\"
    name \"n\"
}
"
    .parse()
    .unwrap();
    let settings = PlayerSettings::from_config(&config).unwrap();
    assert_eq!(settings.buffered_before_play, 0);
}

#[test]
fn test_error_carries_line_number() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"audio_buffer_size \"2048\"\nmystery_knob \"11\"\n")
        .unwrap();

    let error = ConfigData::load(file.path()).unwrap_err();
    let message = error.to_string();
    assert!(message.contains("line 2"), "got: {}", message);
    assert!(message.contains("mystery_knob"), "got: {}", message);
}

#[test]
fn test_defaults_without_optional_parameters() {
    let config: ConfigData = "\
audio_output {
    type \"null\"
    name \"n\"
}
"
    .parse()
    .unwrap();
    let settings = PlayerSettings::from_config(&config).unwrap();

    assert_eq!(settings.configured_audio_format, None);
    assert_eq!(settings.buffer_chunks, 4096 * 1024 / 4096);
    assert_eq!(settings.replay_gain_mode, ReplayGainMode::Off);
    assert!(!settings.volume_normalization);
}
