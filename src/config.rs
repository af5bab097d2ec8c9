//! Configuration loader and validator for the archive exporter.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub export: Export,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Export pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Export {
    pub root_dir: String,
    pub page_size: i64,
    pub min_free_bytes: u64,
    pub progress_buffer: usize,
}

impl App {
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }
}

impl Export {
    pub fn resolved_root_dir(&self) -> PathBuf {
        expand_home(&self.root_dir)
    }
}

impl Config {
    /// Ensure required directories exist (creates the data dir and export root).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())?;
        fs::create_dir_all(self.export.resolved_root_dir())
    }

    /// Default database URL: `sqlite://<data_dir>/archive.db`.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/archive.db",
            self.app.resolved_data_dir().display()
        )
    }
}

/// Expand a leading `~/` to `$HOME`. Other paths pass through untouched.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(home.trim_end_matches('/')).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.export.root_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("export.root_dir must be non-empty"));
    }
    if cfg.export.page_size <= 0 {
        return Err(ConfigError::Invalid("export.page_size must be > 0"));
    }
    if cfg.export.progress_buffer == 0 {
        return Err(ConfigError::Invalid("export.progress_buffer must be > 0"));
    }
    // min_free_bytes is u64; zero disables the check

    Ok(())
}

/// Returns a complete, valid example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

export:
  root_dir: "./data/exports"
  page_size: 1000
  min_free_bytes: 104857600
  progress_buffer: 32
"#
}
