use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{Debounce, DEFAULT_MAX_WAIT, DEFAULT_QUIET};
use crate::server::{DEFAULT_BURST_THRESHOLD, DEFAULT_BURST_WINDOW};
use crate::store::{ClientEnvironment, RetryPolicy, StoreSettings};
use crate::timecard::clock::DEFAULT_BACKUP_RUN_THRESHOLD_SECS;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  pub store: StoreConfig,
  #[serde(default)]
  pub timecard: TimecardConfig,
  #[serde(default)]
  pub mail: MailConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
  /// Static files served for any path without a route
  pub public_dir: Option<PathBuf>,
  /// Requests from one client within `burst_window_secs` that trigger a
  /// warning; 0 disables it
  pub burst_threshold: usize,
  pub burst_window_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: "0.0.0.0".to_string(),
      port: 3000,
      public_dir: None,
      burst_threshold: DEFAULT_BURST_THRESHOLD,
      burst_window_secs: DEFAULT_BURST_WINDOW.as_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// Live bucket URL
  pub url: String,
  /// Bucket the weekly report archives into
  pub backup_url: Option<String>,
  /// standard or throttled; throttled waits longer after an unhinted 429
  #[serde(default)]
  pub environment: ClientEnvironment,
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_fallback_delay_secs")]
  pub fallback_delay_secs: u64,
  #[serde(default = "default_throttled_fallback_delay_secs")]
  pub throttled_fallback_delay_secs: u64,
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  #[serde(default = "default_debounce_max_wait_ms")]
  pub debounce_max_wait_ms: u64,
}

fn default_max_attempts() -> u32 {
  RetryPolicy::default().max_attempts
}

fn default_fallback_delay_secs() -> u64 {
  RetryPolicy::default().fallback_delay.as_secs()
}

fn default_throttled_fallback_delay_secs() -> u64 {
  RetryPolicy::default().throttled_fallback_delay.as_secs()
}

fn default_debounce_ms() -> u64 {
  DEFAULT_QUIET.as_millis() as u64
}

fn default_debounce_max_wait_ms() -> u64 {
  DEFAULT_MAX_WAIT.as_millis() as u64
}

impl StoreConfig {
  pub fn settings(&self) -> StoreSettings {
    StoreSettings {
      url: self.url.clone(),
      backup_url: self.backup_url.clone(),
      retry: RetryPolicy {
        max_attempts: self.max_attempts.max(1),
        environment: self.environment,
        fallback_delay: Duration::from_secs(self.fallback_delay_secs),
        throttled_fallback_delay: Duration::from_secs(self.throttled_fallback_delay_secs),
      },
      debounce: Debounce::new(
        Duration::from_millis(self.debounce_ms),
        Duration::from_millis(self.debounce_max_wait_ms),
      ),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimecardConfig {
  /// Offset applied to UTC before a clock action is recorded
  pub utc_offset_hours: i64,
  pub backup_run_threshold_hours: i64,
}

impl Default for TimecardConfig {
  fn default() -> Self {
    Self {
      utc_offset_hours: -5,
      backup_run_threshold_hours: DEFAULT_BACKUP_RUN_THRESHOLD_SECS / 3600,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailConfig {
  /// HTTP mail relay; reports are only logged when unset
  pub relay_url: Option<String>,
  pub from: String,
  pub to: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Also write a daily rolling log file here
  pub dir: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./timecard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/timecard/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create ./timecard.yaml or ~/.config/timecard/config.yaml\n\
                 See timecard.example.yaml for the format."
        ))
      }
    };

    config.apply_env_overrides()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("timecard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("timecard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    check_url("store.url", &self.store.url)?;
    if let Some(backup) = &self.store.backup_url {
      check_url("store.backup_url", backup)?;
    }
    if let Some(relay) = &self.mail.relay_url {
      check_url("mail.relay_url", relay)?;
    }
    Ok(())
  }

  /// `PORT` wins over `server.port`, as on most app hosts.
  fn apply_env_overrides(&mut self) -> Result<()> {
    if let Ok(port) = std::env::var("PORT") {
      self.server.port = port
        .parse()
        .map_err(|e| eyre!("Invalid PORT value {:?}: {}", port, e))?;
    }
    Ok(())
  }

  /// Get the time-code secret from environment variables.
  ///
  /// Checks TIMECARD_SECRET.
  pub fn get_secret() -> Result<String> {
    std::env::var("TIMECARD_SECRET")
      .map_err(|_| eyre!("Time-code secret not found. Set TIMECARD_SECRET environment variable."))
  }

  /// Get the mail relay token from environment variables, if any.
  ///
  /// Checks TIMECARD_MAIL_TOKEN.
  pub fn get_mail_token() -> Option<String> {
    std::env::var("TIMECARD_MAIL_TOKEN").ok()
  }
}

fn check_url(field: &str, value: &str) -> Result<()> {
  let parsed = url::Url::parse(value).map_err(|e| eyre!("{} is not a valid URL ({:?}): {}", field, value, e))?;
  match parsed.scheme() {
    "http" | "https" => Ok(()),
    other => Err(eyre!("{} must be http or https, got {}", field, other)),
  }
}
