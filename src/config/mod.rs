//! Configuration module for SensorVis-RS
//!
//! This module handles application configuration including:
//! - Collection settings of the dispatch loop (poll delay, channel sizes, history)
//! - Stream definitions (source, framing, preprocessor, variables)
//! - Loading and saving configuration files
//!
//! # Config Location
//!
//! Without an explicit `--config`, the CLI looks in the platform data directory:
//! - **Linux**: `~/.local/share/dev.sensorvis.sensorvis-rs/sensorvis.toml`
//! - **macOS**: `~/Library/Application Support/dev.sensorvis.sensorvis-rs/sensorvis.toml`
//! - **Windows**: `%APPDATA%\dev.sensorvis.sensorvis-rs\sensorvis.toml`
//!
//! # Formats
//!
//! TOML is the primary format. Files ending in `.json` are read and written as
//! JSON with the same structure.
//!
//! # Example
//!
//! ```ignore
//! use sensorvis_rs::config::AppConfig;
//!
//! let config = AppConfig::load("sensorvis.toml")?;
//! for stream in &config.streams {
//!     println!("{} -> {:?}", stream.name, stream.framing);
//! }
//! ```

pub mod stream;

pub use stream::*;

use crate::error::{Result, SensorVisError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.sensorvis.sensorvis-rs";

/// Configuration filename inside the data directory
pub const CONFIG_FILE: &str = "sensorvis.toml";

/// Default delay between dispatch loop iterations in milliseconds
pub const DEFAULT_POLL_DELAY_MS: u64 = 10;

/// Default capacity of the backend channels
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1024;

/// Default interval between statistics reports in milliseconds
pub const DEFAULT_STATS_INTERVAL_MS: u64 = 500;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Path of the configuration file used when none is given
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Collection Config ====================

/// Dispatch loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Delay between loop iterations in milliseconds
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,

    /// Capacity of the command and message channels
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,

    /// Points each variable keeps unless it overrides it
    #[serde(default = "default_history_len")]
    pub history_len: usize,

    /// Interval between statistics reports in milliseconds (0 disables them)
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

fn default_poll_delay_ms() -> u64 {
    DEFAULT_POLL_DELAY_MS
}

fn default_channel_buffer_size() -> usize {
    DEFAULT_CHANNEL_BUFFER_SIZE
}

fn default_history_len() -> usize {
    crate::types::DEFAULT_HISTORY_LEN
}

fn default_stats_interval_ms() -> u64 {
    DEFAULT_STATS_INTERVAL_MS
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: DEFAULT_POLL_DELAY_MS,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            history_len: crate::types::DEFAULT_HISTORY_LEN,
            stats_interval_ms: DEFAULT_STATS_INTERVAL_MS,
        }
    }
}

// ==================== App Config ====================

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Dispatch loop settings
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Streams to open at startup
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

impl AppConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream
    pub fn add_stream(&mut self, stream: StreamConfig) {
        self.streams.push(stream);
    }

    /// Find a stream by name
    pub fn find_stream(&self, name: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.name == name)
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SensorVisError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SensorVisError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                SensorVisError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                SensorVisError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        tracing::info!(
            path = %path.display(),
            streams = config.streams.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Save to disk, as JSON when the extension is `.json`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| SensorVisError::Serialization(e.to_string()))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| SensorVisError::Serialization(e.to_string()))?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content).map_err(|e| {
            SensorVisError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check every stream and reject duplicate names
    pub fn validate(&self) -> Result<()> {
        if self.collection.channel_buffer_size == 0 {
            return Err(SensorVisError::Config(
                "channel buffer size must be positive".into(),
            ));
        }
        let mut names: Vec<&str> = Vec::with_capacity(self.streams.len());
        for stream in &self.streams {
            if names.contains(&stream.name.as_str()) {
                return Err(SensorVisError::DuplicateStream(stream.name.clone()));
            }
            names.push(&stream.name);
            validate_stream(stream)?;
        }
        Ok(())
    }

    /// A configuration with one mock stream, used when no file is available
    pub fn sample() -> Self {
        let mut config = Self::default();
        config.add_stream(
            StreamConfig::new(
                "mock",
                SourceConfig::Mock(MockSourceConfig {
                    pattern: MockPattern::Sine,
                    fields: vec!["variable".into(), "level".into()],
                    ..Default::default()
                }),
            )
            .with_variable(VariableConfig::new("variable"))
            .with_variable(VariableConfig::new("level").with_kind(crate::types::ValueKind::Float)),
        );
        config
    }
}

// ==================== Tests ====================
