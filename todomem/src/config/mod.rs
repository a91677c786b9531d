//! Configuration system for the `todomem` CLI.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/todomem/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use todomem_proto::MAX_BACKUP_ITEMS;
use todomem_store::substrate::DEFAULT_QUOTA_BYTES;
use todomem_store::{Clock, DEFAULT_AUTO_BACKUP_INTERVAL, FileSubstrate, TaskStore};

use crate::commands::Command;
use crate::tasks::DEFAULT_MAX_TEXT_LEN;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    storage: StorageFileConfig,
    backup: BackupFileConfig,
    tasks: TasksFileConfig,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_file: Option<PathBuf>,
    quota_bytes: Option<usize>,
    max_backups: Option<usize>,
}

/// `[backup]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackupFileConfig {
    auto_interval_secs: Option<u64>,
}

/// `[tasks]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TasksFileConfig {
    max_text_len: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved `todomem` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoConfig {
    /// File holding the durable substrate.
    pub data_file: PathBuf,
    /// Capacity of the durable substrate in bytes of keys and values.
    pub quota_bytes: usize,
    /// Number of backups retained.
    pub max_backups: usize,
    /// Cadence of the automatic backup check in the shell.
    pub auto_backup_interval: Duration,
    /// Maximum task text length in characters.
    pub max_text_len: usize,
}

impl Default for TodoConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            max_backups: MAX_BACKUP_ITEMS,
            auto_backup_interval: DEFAULT_AUTO_BACKUP_INTERVAL,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }
}

impl TodoConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/todomem/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default. Zero backup caps and zero
    /// intervals fall back to the defaults.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            data_file: cli
                .data_file
                .clone()
                .or_else(|| file.storage.data_file.clone())
                .unwrap_or(defaults.data_file),
            quota_bytes: file.storage.quota_bytes.unwrap_or(defaults.quota_bytes),
            max_backups: cli
                .max_backups
                .or(file.storage.max_backups)
                .filter(|&cap| cap > 0)
                .unwrap_or(defaults.max_backups),
            auto_backup_interval: file
                .backup
                .auto_interval_secs
                .filter(|&secs| secs > 0)
                .map_or(defaults.auto_backup_interval, Duration::from_secs),
            max_text_len: file.tasks.max_text_len.unwrap_or(defaults.max_text_len),
        }
    }

    /// Opens the task store described by this configuration.
    ///
    /// If the data file cannot be opened (unreadable, corrupt, or its
    /// directory cannot be created) the store runs on volatile memory and
    /// the file is left untouched.
    #[must_use]
    pub fn open_store(&self, clock: Arc<dyn Clock>) -> TaskStore {
        match FileSubstrate::open_with_quota(&self.data_file, self.quota_bytes) {
            Ok(substrate) => {
                TaskStore::open_with_max_backups(Box::new(substrate), clock, self.max_backups)
            }
            Err(err) => {
                tracing::warn!(
                    path = %self.data_file.display(),
                    error = %err,
                    "cannot open data file, using in-memory fallback"
                );
                TaskStore::volatile(clock)
            }
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Local to-do list with rotating backups")]
pub struct CliArgs {
    /// Storage file (default: `<data dir>/todomem/storage.json`).
    #[arg(long, env = "TODOMEM_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// Number of backups to keep.
    #[arg(long, env = "TODOMEM_MAX_BACKUPS")]
    pub max_backups: Option<usize>,

    /// Path to config file (default: `~/.config/todomem/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TODOMEM_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/todomem.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do (default: `list`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_data_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("todomem")
        .join("storage.json")
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("todomem").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
