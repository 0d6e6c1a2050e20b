use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::Freshness;
use crate::gallery::Family;

const DEFAULT_STALE_AFTER_SECS: u64 = 5 * 60;
const DEFAULT_EXPIRE_AFTER_SECS: u64 = 10 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub cache: CacheSettings,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  /// Age after which cached data is revalidated in the background
  pub stale_after_secs: u64,
  /// Age after which cached data is no longer served
  pub expire_after_secs: u64,
  /// How often expired entries are swept
  pub sweep_interval_secs: u64,
  /// Per-family window overrides, e.g. shorter windows for stories
  pub overrides: BTreeMap<Family, WindowOverride>,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_after_secs: DEFAULT_STALE_AFTER_SECS,
      expire_after_secs: DEFAULT_EXPIRE_AFTER_SECS,
      sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
      overrides: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct WindowOverride {
  pub stale_after_secs: Option<u64>,
  pub expire_after_secs: Option<u64>,
}

impl CacheSettings {
  /// Windows for keys of `family`, falling back to the defaults for anything
  /// the override leaves unset.
  pub fn freshness_for(&self, family: Family) -> Freshness {
    let window = self.overrides.get(&family).copied().unwrap_or_default();
    Freshness::new(
      Duration::from_secs(window.stale_after_secs.unwrap_or(self.stale_after_secs)),
      Duration::from_secs(window.expire_after_secs.unwrap_or(self.expire_after_secs)),
    )
  }

  /// Sweep period, never shorter than one second.
  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive used when FOLIO_LOG is not set (e.g. "info", "folio=debug")
  pub level: String,
  /// Write logs to daily files in this directory instead of stderr
  pub directory: Option<PathBuf>,
  /// File name prefix for log files
  pub file_prefix: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
      file_prefix: "folio.log".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./folio.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/folio/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    match Self::locate(explicit_path)? {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/folio/config.yaml"
      )),
    }
  }

  /// Like [`load`](Self::load), but falls back to defaults when no file is
  /// found. An explicit path that does not exist is still an error.
  pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
    match Self::locate(explicit_path)? {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))
  }

  fn locate(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = explicit_path {
      if p.exists() {
        return Ok(Some(p.to_path_buf()));
      }
      return Err(eyre!("Config file not found: {}", p.display()));
    }
    Ok(Self::find_config_file())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("folio.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("folio").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
