//! Configuration management for emulator-bridge

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// UI-side sync loop configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Per-subsystem transport selection and buffer sizing
    #[serde(default)]
    pub transport: TransportConfig,

    /// Disk image configuration
    #[serde(default)]
    pub disks: DisksConfig,

    /// Worker startup configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Log filter, directory and retention
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How often pending input is flushed to the worker (ms)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Lock acquire attempts per flush before waiting for the next tick
    #[serde(default = "default_spin_limit")]
    pub spin_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Use a shared screen buffer when the runtime allows it
    #[serde(default = "default_true")]
    pub video_shared_memory: bool,

    /// Use the shared input layout when the runtime allows it
    #[serde(default = "default_true")]
    pub input_shared_memory: bool,

    /// Use a shared audio ring when the runtime allows it
    #[serde(default = "default_true")]
    pub audio_shared_memory: bool,

    /// Use the shared files mailbox when the runtime allows it
    #[serde(default = "default_true")]
    pub files_shared_memory: bool,

    /// Expected pending-event count, used to size fallback queues
    #[serde(default = "default_input_buffer_size")]
    pub input_buffer_size: usize,

    #[serde(default = "default_screen_width")]
    pub screen_width: u32,

    #[serde(default = "default_screen_height")]
    pub screen_height: u32,

    /// Bytes per audio block
    #[serde(default = "default_audio_block_chunk_size")]
    pub audio_block_chunk_size: usize,

    /// Capacity of the files mailbox payload (bytes)
    #[serde(default = "default_files_buffer_size")]
    pub files_buffer_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisksConfig {
    /// JSON file listing the chunked disk specs to mount
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Location of the emulator's loader script
    #[serde(default)]
    pub js_url: String,

    /// Location of the emulator's compiled code
    #[serde(default)]
    pub wasm_url: String,

    /// Arguments passed to the emulator at startup
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Snapshot to restore the guest's shared directory from
    pub persisted_data: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `emulator_bridge::sync=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Days a rolled log file is kept; 0 keeps them forever
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Log directory, overridden by `EMULATOR_BRIDGE_LOG_PATH`
    pub directory: Option<PathBuf>,
}

// Default value functions
fn default_interval_ms() -> u64 {
    16 // one flush per 60Hz frame
}

fn default_spin_limit() -> u32 {
    64
}

fn default_true() -> bool {
    true
}

fn default_input_buffer_size() -> usize {
    100
}

fn default_screen_width() -> u32 {
    800
}

fn default_screen_height() -> u32 {
    600
}

fn default_audio_block_chunk_size() -> usize {
    2048
}

fn default_files_buffer_size() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retention_days() -> u64 {
    7
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            spin_limit: default_spin_limit(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            video_shared_memory: true,
            input_shared_memory: true,
            audio_shared_memory: true,
            files_shared_memory: true,
            input_buffer_size: default_input_buffer_size(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            audio_block_chunk_size: default_audio_block_chunk_size(),
            files_buffer_size: default_files_buffer_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            retention_days: default_retention_days(),
            directory: None,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "emulator-bridge", "bridge")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}
