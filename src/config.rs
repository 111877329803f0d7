//! Configuration loading
//!
//! Parses the daemon's configuration file and turns it into the typed
//! settings the playback core consumes. The file format is line-oriented:
//! one statement per line, tokens may be double-quoted, `#` starts a
//! comment, block parameters open with `{` on the parameter line and close
//! with a line containing just `}`.
//!
//! Parameters are declared up front with two flags (`repeatable`, `block`);
//! unknown or redefined parameters are errors carrying the offending line
//! numbers. Parse errors at startup are fatal to the daemon.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use tracing::warn;

use crate::audio::AudioFormat;
use crate::chunk::CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::replay_gain::{ReplayGainConfig, ReplayGainMode};

const BLOCK_BEGIN: &str = "{";
const BLOCK_END: &str = "}";

struct OptionDef {
    name: &'static str,
    repeatable: bool,
    block: bool,
}

const fn option(name: &'static str, repeatable: bool, block: bool) -> OptionDef {
    OptionDef {
        name,
        repeatable,
        block,
    }
}

/// The parameters this core understands.
static OPTIONS: &[OptionDef] = &[
    option("audio_output", true, true),
    option("audio_output_format", false, false),
    option("audio_buffer_size", false, false),
    option("buffer_before_play", false, false),
    option("replaygain", false, false),
    option("replaygain_preamp", false, false),
    option("replaygain_missing_preamp", false, false),
    option("volume_normalization", false, false),
    option("max_command_list_size", false, false),
    option("max_output_buffer_size", false, false),
];

fn find_option(name: &str) -> Option<&'static OptionDef> {
    OPTIONS.iter().find(|def| def.name == name)
}

/// One `name value` entry inside a block.
#[derive(Debug, Clone)]
pub struct BlockParam {
    pub name: String,
    pub value: String,
    pub line: usize,
}

/// One occurrence of a configuration parameter.
#[derive(Debug, Clone)]
pub struct ConfigParam {
    /// The scalar value; `None` for block parameters.
    pub value: Option<String>,

    pub line: usize,

    /// Sub-parameters, in file order, for block parameters.
    pub block: Vec<BlockParam>,
}

impl ConfigParam {
    /// Find a sub-parameter by name. A duplicate is reported once and the
    /// last occurrence wins, matching the daemon's historic behavior.
    pub fn block_param(&self, name: &str) -> Option<&BlockParam> {
        let mut found: Option<&BlockParam> = None;
        for bp in &self.block {
            if bp.name == name {
                if let Some(prev) = found {
                    warn!(
                        "\"{}\" first defined on line {}, redefined on line {}",
                        name, prev.line, bp.line
                    );
                }
                found = Some(bp);
            }
        }
        found
    }

    pub fn block_value(&self, name: &str) -> Option<&str> {
        self.block_param(name).map(|bp| bp.value.as_str())
    }

    pub fn block_bool(&self, name: &str, default: bool) -> Result<bool> {
        match self.block_param(name) {
            None => Ok(default),
            Some(bp) => parse_bool(&bp.value).ok_or_else(|| Error::ConfigSyntax {
                line: bp.line,
                message: format!(
                    "\"{}\" is not a boolean value (yes, true, 1) or (no, false, 0)",
                    name
                ),
            }),
        }
    }

    /// Demand a sub-parameter; missing is fatal.
    pub fn require_block_value(&self, name: &str) -> Result<&str> {
        self.block_value(name).ok_or_else(|| Error::ConfigSyntax {
            line: self.line,
            message: format!("block is missing required parameter \"{}\"", name),
        })
    }
}

/// The parsed configuration tree.
#[derive(Debug, Default)]
pub struct ConfigData {
    params: HashMap<String, Vec<ConfigParam>>,
}

impl ConfigData {
    pub fn load(path: &Path) -> Result<ConfigData> {
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }

    /// First occurrence of `name`, if present.
    pub fn param(&self, name: &str) -> Option<&ConfigParam> {
        self.params.get(name).and_then(|v| v.first())
    }

    /// Every occurrence of a repeatable parameter, in file order.
    pub fn params(&self, name: &str) -> &[ConfigParam] {
        self.params.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(|p| p.value.as_deref())
    }

    pub fn bool_value(&self, name: &str, default: bool) -> Result<bool> {
        match self.param(name) {
            None => Ok(default),
            Some(p) => {
                let value = p.value.as_deref().unwrap_or("");
                parse_bool(value).ok_or_else(|| Error::ConfigSyntax {
                    line: p.line,
                    message: format!(
                        "{} is not a boolean value (yes, true, 1) or (no, false, 0)",
                        name
                    ),
                })
            }
        }
    }

    pub fn unsigned_value(&self, name: &str) -> Result<Option<u64>> {
        match self.param(name) {
            None => Ok(None),
            Some(p) => {
                let value = p.value.as_deref().unwrap_or("");
                value
                    .parse()
                    .map(Some)
                    .map_err(|_| Error::ConfigSyntax {
                        line: p.line,
                        message: format!("\"{}\" is not a valid number for {}", value, name),
                    })
            }
        }
    }

    pub fn float_value(&self, name: &str) -> Result<Option<f32>> {
        match self.param(name) {
            None => Ok(None),
            Some(p) => {
                let value = p.value.as_deref().unwrap_or("");
                value
                    .parse()
                    .map(Some)
                    .map_err(|_| Error::ConfigSyntax {
                        line: p.line,
                        message: format!("\"{}\" is not a valid number for {}", value, name),
                    })
            }
        }
    }
}

impl FromStr for ConfigData {
    type Err = Error;

    fn from_str(text: &str) -> Result<ConfigData> {
        let mut data = ConfigData::default();
        let mut lines = text.lines().enumerate();

        while let Some((index, raw)) = lines.next() {
            let line = index + 1;
            let tokens = tokenize(raw, line)?;
            if tokens.is_empty() {
                continue;
            }
            if tokens.len() != 2 {
                return Err(Error::ConfigSyntax {
                    line,
                    message: format!("improperly formatted statement: {}", raw.trim()),
                });
            }

            let (name, value) = (&tokens[0], &tokens[1]);
            let def = find_option(name).ok_or_else(|| Error::ConfigSyntax {
                line,
                message: format!("unrecognized parameter \"{}\"", name),
            })?;

            if !def.repeatable {
                if let Some(prev) = data.param(name) {
                    return Err(Error::ConfigSyntax {
                        line,
                        message: format!(
                            "parameter \"{}\" is first defined on line {} and redefined here",
                            name, prev.line
                        ),
                    });
                }
            }

            let param = if def.block {
                if value != BLOCK_BEGIN {
                    return Err(Error::ConfigSyntax {
                        line,
                        message: format!("parameter \"{}\" requires a {{ ... }} block", name),
                    });
                }
                read_block(&mut lines, line)?
            } else {
                ConfigParam {
                    value: Some(value.clone()),
                    line,
                    block: Vec::new(),
                }
            };

            data.params.entry(name.clone()).or_default().push(param);
        }

        Ok(data)
    }
}

fn read_block<'a, I>(lines: &mut I, open_line: usize) -> Result<ConfigParam>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut param = ConfigParam {
        value: None,
        line: open_line,
        block: Vec::new(),
    };

    for (index, raw) in lines {
        let line = index + 1;
        let tokens = tokenize(raw, line)?;
        match tokens.len() {
            0 => continue,
            1 if tokens[0] == BLOCK_END => return Ok(param),
            2 => {
                if tokens.iter().any(|t| t == BLOCK_BEGIN || t == BLOCK_END) {
                    return Err(Error::ConfigSyntax {
                        line,
                        message: format!(
                            "improperly formatted statement in block beginning at line {}",
                            open_line
                        ),
                    });
                }
                param.block.push(BlockParam {
                    name: tokens[0].clone(),
                    value: tokens[1].clone(),
                    line,
                });
            }
            _ => {
                return Err(Error::ConfigSyntax {
                    line,
                    message: format!("improperly formatted statement: {}", raw.trim()),
                })
            }
        }
    }

    Err(Error::ConfigSyntax {
        line: open_line,
        message: "unterminated block".to_string(),
    })
}

/// Split a statement into tokens: whitespace-separated words or
/// double-quoted strings; a bare `#` starts a comment.
fn tokenize(raw: &str, line: usize) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None => break,
            Some('#') => break,
            Some('"') => {
                chars.next();
                let mut token = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => token.push(c),
                        None => {
                            return Err(Error::ConfigSyntax {
                                line,
                                message: "missing closing '\"'".to_string(),
                            })
                        }
                    }
                }
                tokens.push(token);
            }
            Some(_) => {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                tokens.push(token);
            }
        }
    }

    Ok(tokens)
}

fn parse_bool(value: &str) -> Option<bool> {
    if ["yes", "true", "1"].iter().any(|t| value.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if ["no", "false", "0"].iter().any(|t| value.eq_ignore_ascii_case(t)) {
        Some(false)
    } else {
        None
    }
}

/// One configured audio output.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub name: String,
    pub plugin: String,
    pub enabled: bool,

    /// The raw block, for plugin-specific parameters.
    pub param: ConfigParam,
}

/// The typed settings consumed by the playback core.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    /// `audio_output_format`; `None` follows the source format.
    pub configured_audio_format: Option<AudioFormat>,

    /// Number of chunks in the music buffer.
    pub buffer_chunks: usize,

    /// Chunks to pre-decode before playback starts.
    pub buffered_before_play: usize,

    pub replay_gain_mode: ReplayGainMode,
    pub replay_gain_config: ReplayGainConfig,
    pub volume_normalization: bool,

    /// Protocol limits, in bytes (consumed by the external command layer).
    pub max_command_list_size: usize,
    pub max_output_buffer_size: usize,

    pub outputs: Vec<OutputConfig>,
}

const DEFAULT_BUFFER_KIB: u64 = 4096;
const DEFAULT_BUFFER_BEFORE_PLAY: &str = "10%";
const DEFAULT_MAX_COMMAND_LIST_KIB: u64 = 2048;
const DEFAULT_MAX_OUTPUT_BUFFER_KIB: u64 = 8192;

impl PlayerSettings {
    pub fn from_config(config: &ConfigData) -> Result<PlayerSettings> {
        let configured_audio_format = config
            .value("audio_output_format")
            .map(|s| s.parse::<AudioFormat>())
            .transpose()?;

        let buffer_kib = config
            .unsigned_value("audio_buffer_size")?
            .unwrap_or(DEFAULT_BUFFER_KIB);
        let buffer_chunks = (buffer_kib as usize * 1024) / CHUNK_SIZE;
        if buffer_chunks < 4 {
            return Err(Error::Config(format!(
                "audio_buffer_size {}KiB is too small",
                buffer_kib
            )));
        }

        let before_play = config
            .value("buffer_before_play")
            .unwrap_or(DEFAULT_BUFFER_BEFORE_PLAY);
        let buffered_before_play = parse_buffer_before_play(before_play, buffer_chunks)?;

        let replay_gain_mode = config
            .value("replaygain")
            .map(|s| s.parse::<ReplayGainMode>())
            .transpose()?
            .unwrap_or_default();

        let preamp_db = config.float_value("replaygain_preamp")?.unwrap_or(0.0);
        if !(-15.0..=15.0).contains(&preamp_db) {
            return Err(Error::Config(
                "replaygain_preamp must be between -15 and 15".to_string(),
            ));
        }
        let missing_preamp_db = config
            .float_value("replaygain_missing_preamp")?
            .unwrap_or(0.0);
        if !(-15.0..=15.0).contains(&missing_preamp_db) {
            return Err(Error::Config(
                "replaygain_missing_preamp must be between -15 and 15".to_string(),
            ));
        }

        let volume_normalization = config.bool_value("volume_normalization", false)?;

        let max_command_list_size = config
            .unsigned_value("max_command_list_size")?
            .unwrap_or(DEFAULT_MAX_COMMAND_LIST_KIB) as usize
            * 1024;
        let max_output_buffer_size = config
            .unsigned_value("max_output_buffer_size")?
            .unwrap_or(DEFAULT_MAX_OUTPUT_BUFFER_KIB) as usize
            * 1024;

        let mut outputs = Vec::new();
        for param in config.params("audio_output") {
            let plugin = param.require_block_value("type")?.to_string();
            let name = param.require_block_value("name")?.to_string();
            let enabled = param.block_bool("enabled", true)?;
            outputs.push(OutputConfig {
                name,
                plugin,
                enabled,
                param: param.clone(),
            });
        }
        if outputs.is_empty() {
            return Err(Error::Config(
                "no audio_output defined in the configuration".to_string(),
            ));
        }

        Ok(PlayerSettings {
            configured_audio_format,
            buffer_chunks,
            buffered_before_play,
            replay_gain_mode,
            replay_gain_config: ReplayGainConfig::with_preamp_db(preamp_db, missing_preamp_db, true),
            volume_normalization,
            max_command_list_size,
            max_output_buffer_size,
            outputs,
        })
    }
}

fn parse_buffer_before_play(value: &str, buffer_chunks: usize) -> Result<usize> {
    let percent: f32 = value
        .strip_suffix('%')
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            Error::Config(format!(
                "buffer_before_play \"{}\" is not a percentage",
                value
            ))
        })?;
    if !(0.0..=90.0).contains(&percent) {
        return Err(Error::Config(
            "buffer_before_play must be between 0% and 90%".to_string(),
        ));
    }
    Ok((buffer_chunks as f32 * percent / 100.0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    #[test]
    fn test_scalar_and_comment() {
        let config: ConfigData = "\
# a comment line
audio_buffer_size \"2048\"  # trailing comment
"
        .parse()
        .unwrap();
        assert_eq!(config.value("audio_buffer_size"), Some("2048"));
        assert_eq!(config.unsigned_value("audio_buffer_size").unwrap(), Some(2048));
    }

    #[test]
    fn test_block_parsing() {
        let config: ConfigData = "\
audio_output {
    type \"null\"
    name \"My Null Output\"
    enabled \"no\"
}
"
        .parse()
        .unwrap();
        let param = config.param("audio_output").unwrap();
        assert_eq!(param.block_value("type"), Some("null"));
        assert_eq!(param.block_value("name"), Some("My Null Output"));
        assert_eq!(param.block_bool("enabled", true).unwrap(), false);
    }

    #[test]
    fn test_repeatable_blocks() {
        let config: ConfigData = "\
audio_output {
    type \"null\"
    name \"first\"
}
audio_output {
    type \"null\"
    name \"second\"
}
"
        .parse()
        .unwrap();
        let outputs = config.params("audio_output");
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].block_value("name"), Some("second"));
    }

    #[test]
    fn test_unknown_parameter_is_error() {
        let err = "bogus_setting yes\n".parse::<ConfigData>().unwrap_err();
        assert!(err.to_string().contains("unrecognized parameter"));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_redefinition_is_error() {
        let err = "replaygain track\nreplaygain album\n"
            .parse::<ConfigData>()
            .unwrap_err();
        assert!(err.to_string().contains("first defined on line 1"));
    }

    #[test]
    fn test_unterminated_block_is_error() {
        let err = "audio_output {\ntype \"null\"\n"
            .parse::<ConfigData>()
            .unwrap_err();
        assert!(err.to_string().contains("unterminated block"));
    }

    #[test]
    fn test_bool_lexicon() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("FALSE"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_bad_bool_is_error() {
        let config: ConfigData = "volume_normalization maybe\n".parse().unwrap();
        assert!(config.bool_value("volume_normalization", false).is_err());
    }

    fn full_config() -> ConfigData {
        "\
audio_output_format \"44100:16:2\"
audio_buffer_size \"1024\"
buffer_before_play \"25%\"
replaygain \"album\"
replaygain_preamp \"3.0\"
volume_normalization \"yes\"
max_command_list_size \"1024\"
max_output_buffer_size \"4096\"
audio_output {
    type \"null\"
    name \"default\"
}
"
        .parse()
        .unwrap()
    }

    #[test]
    fn test_player_settings() {
        let settings = PlayerSettings::from_config(&full_config()).unwrap();
        assert_eq!(
            settings.configured_audio_format,
            Some(AudioFormat::new(44100, SampleFormat::S16, 2))
        );
        assert_eq!(settings.buffer_chunks, 1024 * 1024 / CHUNK_SIZE);
        assert_eq!(settings.buffered_before_play, settings.buffer_chunks / 4);
        assert_eq!(settings.replay_gain_mode, ReplayGainMode::Album);
        assert!(settings.volume_normalization);
        assert_eq!(settings.max_command_list_size, 1024 * 1024);
        assert_eq!(settings.max_output_buffer_size, 4096 * 1024);
        assert_eq!(settings.outputs.len(), 1);
        assert_eq!(settings.outputs[0].plugin, "null");
    }

    #[test]
    fn test_settings_require_an_output() {
        let config: ConfigData = "audio_buffer_size \"1024\"\n".parse().unwrap();
        assert!(PlayerSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_output_block_requires_type() {
        let config: ConfigData = "audio_output {\n name \"x\"\n}\n".parse().unwrap();
        let err = PlayerSettings::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("\"type\""));
    }

    #[test]
    fn test_preamp_range() {
        let config: ConfigData = "\
replaygain_preamp \"20\"
audio_output {
    type \"null\"
    name \"x\"
}
"
        .parse()
        .unwrap();
        assert!(PlayerSettings::from_config(&config).is_err());
    }
}
