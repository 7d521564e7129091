//! Configuration for ussplitter-server
//!
//! Two tiers:
//! 1. **Command line / environment**: host, port, data directory, config path
//! 2. **TOML bootstrap file**: everything else, every key optional
//!
//! Missing TOML file is not fatal: a warning is logged and built-in defaults
//! are used. A TOML file that exists but does not parse is a configuration
//! error.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use ussplitter_common::config::{resolve_data_dir, DATA_DIR_ENV};
use ussplitter_common::{Error, Result};

/// Demucs models known to produce a vocals/accompaniment split
pub const KNOWN_MODELS: &[&str] = &[
    "htdemucs",
    "htdemucs_ft",
    "htdemucs_6s",
    "hdemucs_mmi",
    "mdx",
    "mdx_extra",
    "mdx_q",
    "mdx_extra_q",
];

/// General-purpose default model
pub const DEFAULT_MODEL: &str = "htdemucs_ft";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Data directory for uploaded audio and results (optional)
    pub data_dir: Option<PathBuf>,
    pub server: ServerSection,
    pub jobs: JobsSection,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    pub max_queued: usize,
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            max_queued: 16,
            ttl_seconds: 60 * 60,
            sweep_interval_seconds: 60,
        }
    }
}

/// Compute device requested for separation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSetting {
    /// Use CUDA when an NVIDIA GPU is present, otherwise CPU
    #[default]
    Auto,
    Cuda,
    Cpu,
}

/// Separation engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// demucs executable (name on PATH or absolute path)
    pub program: PathBuf,
    pub default_model: String,
    pub models: Vec<String>,
    pub device: DeviceSetting,
    pub mp3_bitrate: u32,
    /// Parallel jobs inside a single demucs run (`-j`)
    pub workers: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("demucs"),
            default_model: DEFAULT_MODEL.to_string(),
            models: KNOWN_MODELS.iter().map(|m| m.to_string()).collect(),
            device: DeviceSetting::Auto,
            mp3_bitrate: 128,
            workers: 2,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Job manager limits
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Submissions beyond this many QUEUED jobs are rejected
    pub max_queued: usize,
    /// Terminal jobs older than this are removed by the janitor
    pub ttl: Duration,
    /// Pause between expiry sweeps; zero turns the sweep off
    pub sweep_interval: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        JobsSection::default().into()
    }
}

impl From<JobsSection> for JobSettings {
    fn from(section: JobsSection) -> Self {
        Self {
            max_queued: section.max_queued,
            ttl: Duration::from_secs(section.ttl_seconds),
            sweep_interval: Duration::from_secs(section.sweep_interval_seconds),
        }
    }
}

/// Values supplied on the command line (clap already folds in env vars)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
}

/// Fully resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub jobs: JobSettings,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Merge command line over TOML over defaults, then validate
    pub fn resolve(overrides: Overrides, toml: TomlConfig) -> Result<Self> {
        let data_dir = resolve_data_dir(overrides.data_dir, DATA_DIR_ENV, toml.data_dir);

        let config = Self {
            host: overrides.host.unwrap_or(toml.server.host),
            port: overrides.port.unwrap_or(toml.server.port),
            data_dir,
            max_upload_bytes: toml.server.max_upload_bytes,
            jobs: toml.jobs.into(),
            engine: toml.engine,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.jobs.max_queued == 0 {
            return Err(Error::Config("jobs.max_queued must be at least 1".to_string()));
        }
        if self.max_upload_bytes == 0 {
            return Err(Error::Config("server.max_upload_bytes must be positive".to_string()));
        }
        if !(1..=320).contains(&self.engine.mp3_bitrate) {
            return Err(Error::Config(format!(
                "engine.mp3_bitrate must be between 1 and 320, got {}",
                self.engine.mp3_bitrate
            )));
        }
        if self.engine.workers == 0 {
            return Err(Error::Config("engine.workers must be at least 1".to_string()));
        }
        if !self.engine.models.contains(&self.engine.default_model) {
            return Err(Error::Config(format!(
                "engine.default_model '{}' is not listed in engine.models",
                self.engine.default_model
            )));
        }
        Ok(())
    }

    /// Directory holding one sub-directory per job
    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    /// Scratch space for engine runs
    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("scratch")
    }
}

/// Where the bootstrap configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// No config path given
    Defaults,
    /// Path given but no file there
    Missing(PathBuf),
    File(PathBuf),
}

impl ConfigSource {
    /// Report the source. Called once tracing is initialised.
    pub fn log(&self) {
        match self {
            ConfigSource::Defaults => info!("No config file given, using built-in defaults"),
            ConfigSource::Missing(path) => warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            ),
            ConfigSource::File(path) => info!("Loaded config from {}", path.display()),
        }
    }
}

/// Load the TOML bootstrap file.
///
/// `None` or a missing file yields defaults. A file that exists but does not
/// parse is an error.
pub fn load_toml(path: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
    let Some(path) = path else {
        return Ok((TomlConfig::default(), ConfigSource::Defaults));
    };

    if !path.exists() {
        return Ok((TomlConfig::default(), ConfigSource::Missing(path.to_path_buf())));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    Ok((config, ConfigSource::File(path.to_path_buf())))
}
