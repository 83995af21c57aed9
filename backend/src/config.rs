//! Configuration management.

use crate::mix::OutputEncoding;
use crate::paths::{OutputPaths, PathConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use loopmix_types::encoding::{
    DEFAULT_AUDIO_CODEC, DEFAULT_BITRATE, DEFAULT_OUTPUT_EXTENSION, DEFAULT_OUTPUT_MIME_TYPE,
    DEFAULT_SAMPLE_RATE,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Which execution backend to run mixes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Native transcoder if it can be executed, embedded engine otherwise
    #[default]
    Auto,
    Native,
    Embedded,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Auto => write!(f, "auto"),
            BackendKind::Native => write!(f, "native"),
            BackendKind::Embedded => write!(f, "embedded"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "native" => Ok(BackendKind::Native),
            "embedded" => Ok(BackendKind::Embedded),
            other => Err(format!(
                "unknown backend '{}' (expected auto, native or embedded)",
                other
            )),
        }
    }
}

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineSection,
    #[serde(default)]
    output: OutputSection,
    #[serde(default)]
    events: EventsSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EngineSection {
    #[serde(default = "default_ffmpeg_path")]
    ffmpeg_path: PathBuf,
    #[serde(default)]
    backend: BackendKind,
    staging_dir: Option<PathBuf>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            backend: BackendKind::default(),
            staging_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OutputSection {
    dir: Option<PathBuf>,
    #[serde(default = "default_codec")]
    codec: String,
    #[serde(default = "default_bitrate")]
    bitrate: String,
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
    #[serde(default = "default_extension")]
    extension: String,
    #[serde(default = "default_mime_type")]
    mime_type: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: None,
            codec: default_codec(),
            bitrate: default_bitrate(),
            sample_rate: default_sample_rate(),
            extension: default_extension(),
            mime_type: default_mime_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventsSection {
    #[serde(default = "default_event_buffer_size")]
    buffer_size: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            buffer_size: default_event_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingSection {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from(DEFAULT_FFMPEG_PATH)
}

fn default_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}

fn default_bitrate() -> String {
    DEFAULT_BITRATE.to_string()
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_extension() -> String {
    DEFAULT_OUTPUT_EXTENSION.to_string()
}

fn default_mime_type() -> String {
    DEFAULT_OUTPUT_MIME_TYPE.to_string()
}

fn default_event_buffer_size() -> usize {
    DEFAULT_EVENT_BUFFER_SIZE
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transcoder executable for the native backend
    pub ffmpeg_path: PathBuf,
    /// Backend selection
    pub backend: BackendKind,
    /// Directory mixed files are written to
    pub output_dir: PathBuf,
    /// Root for private staging directories (system temp dir if unset)
    pub staging_dir: Option<PathBuf>,
    /// Output encoding parameters
    pub encoding: OutputEncoding,
    /// Output file extension, without the dot
    pub output_extension: String,
    /// MIME type of in-memory outputs
    pub output_mime_type: String,
    /// Event broadcast buffer
    pub event_buffer_size: usize,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.loopmix.toml` in current directory
    /// 2. `config.toml` in user config directory (~/.config/loopmix/ on Linux)
    ///
    /// Environment variables use the `LOOPMIX_` prefix with `__` between
    /// section and key, e.g. `LOOPMIX_ENGINE__FFMPEG_PATH`.
    pub fn from_figment(
        ffmpeg_path: Option<PathBuf>,
        backend: Option<BackendKind>,
        output_dir: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".loopmix.toml"));
        let user_config = directories::ProjectDirs::from("", "", "loopmix")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("LOOPMIX_").split("__"));

        if let Some(ref path) = ffmpeg_path {
            figment = figment.merge(Serialized::default("engine.ffmpeg_path", path));
        }
        if let Some(kind) = backend {
            figment = figment.merge(Serialized::default("engine.backend", kind));
        }
        if let Some(ref dir) = output_dir {
            figment = figment.merge(Serialized::default("output.dir", dir));
        }

        let config_file: ConfigFile = figment.extract()?;
        Self::from_file(config_file)
    }

    /// Load configuration from environment variables only (legacy support).
    ///
    /// Reads `LOOPMIX_FFMPEG_PATH`, `LOOPMIX_BACKEND` and `LOOPMIX_OUTPUT_DIR`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut file = ConfigFile::default();

        if let Ok(path) = env::var("LOOPMIX_FFMPEG_PATH") {
            file.engine.ffmpeg_path = PathBuf::from(path);
        }
        if let Ok(kind) = env::var("LOOPMIX_BACKEND") {
            file.engine.backend = kind.parse().map_err(anyhow::Error::msg)?;
        }
        file.output.dir = env::var("LOOPMIX_OUTPUT_DIR").ok().map(PathBuf::from);

        Self::from_file(file)
    }

    /// Defaults with an explicit output directory. Does not touch the filesystem.
    pub fn for_output_dir(output_dir: impl AsRef<Path>) -> Self {
        Self::with_output_dir(ConfigFile::default(), output_dir.as_ref().to_path_buf())
    }

    fn from_file(file: ConfigFile) -> anyhow::Result<Self> {
        let paths = OutputPaths::resolve(PathConfig {
            output_dir: file.output.dir.clone(),
        })?;
        Ok(Self::with_output_dir(file, paths.output_dir))
    }

    fn with_output_dir(file: ConfigFile, output_dir: PathBuf) -> Self {
        Self {
            ffmpeg_path: file.engine.ffmpeg_path,
            backend: file.engine.backend,
            output_dir,
            staging_dir: file.engine.staging_dir,
            encoding: OutputEncoding {
                codec: file.output.codec,
                bitrate: file.output.bitrate,
                sample_rate: file.output.sample_rate,
            },
            output_extension: file.output.extension,
            output_mime_type: file.output.mime_type,
            event_buffer_size: file.events.buffer_size,
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env().unwrap_or_else(|_| Self::for_output_dir(PathBuf::from(".").join("mixes")))
    }
}
