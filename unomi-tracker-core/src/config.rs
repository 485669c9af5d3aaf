//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/unomi-tracker/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/unomi-tracker/` (~/.config/unomi-tracker/)
//! - State/Logs/Cookies: `$XDG_STATE_HOME/unomi-tracker/` (~/.local/state/unomi-tracker/)

use crate::error::{Error, Result};
use crate::session::MAX_COOKIE_TTL_DAYS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Context server connection and session settings
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tracker configuration
///
/// Mirrors the options an embedding page hands to the tracker:
/// `url`, `scope`, `timeoutInMilliseconds`, `sessionCookieName` and `sessionId`.
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// Base endpoint of the context server (e.g., `http://localhost:8181/cxs`)
    #[serde(default = "default_url")]
    pub url: String,

    /// Tenant/site scope attached to every event and item reference
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Request timeout in milliseconds, -1 disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_in_milliseconds: i64,

    /// Name of the cookie holding the session id
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,

    /// Lifetime of the session cookie in days
    #[serde(default = "default_session_cookie_ttl_days")]
    pub session_cookie_ttl_days: u32,

    /// Fixed session id; bypasses the cookie jar when set
    #[serde(default)]
    pub session_id: Option<String>,

    /// When false the tracker runs in degraded mode (no persistence, fallback context)
    #[serde(default = "default_cookies_enabled")]
    pub cookies_enabled: bool,

    /// Profile properties requested on context bootstrap
    #[serde(default = "default_required_profile_properties")]
    pub required_profile_properties: Vec<String>,

    /// Session properties requested on context bootstrap
    #[serde(default)]
    pub required_session_properties: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            scope: default_scope(),
            timeout_in_milliseconds: default_timeout_ms(),
            session_cookie_name: default_session_cookie_name(),
            session_cookie_ttl_days: default_session_cookie_ttl_days(),
            session_id: None,
            cookies_enabled: default_cookies_enabled(),
            required_profile_properties: default_required_profile_properties(),
            required_session_properties: Vec::new(),
        }
    }
}

fn default_url() -> String {
    "http://localhost:8181/cxs".to_string()
}

fn default_scope() -> String {
    "systemscope".to_string()
}

fn default_timeout_ms() -> i64 {
    1500
}

fn default_session_cookie_name() -> String {
    "unomiSessionId".to_string()
}

fn default_session_cookie_ttl_days() -> u32 {
    1
}

fn default_cookies_enabled() -> bool {
    true
}

fn default_required_profile_properties() -> Vec<String> {
    vec!["j:nodename".to_string()]
}

impl TrackerConfig {
    /// Request timeout, or None when disabled with -1
    pub fn timeout(&self) -> Option<Duration> {
        u64::try_from(self.timeout_in_milliseconds)
            .ok()
            .map(Duration::from_millis)
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(Error::Config("tracker.url is required".to_string()));
        }
        reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid tracker.url {:?}: {}", url, e)))?;

        if self.scope.trim().is_empty() {
            return Err(Error::Config("tracker.scope must not be empty".to_string()));
        }
        if self.session_cookie_name.trim().is_empty() {
            return Err(Error::Config(
                "tracker.session_cookie_name must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_COOKIE_TTL_DAYS).contains(&self.session_cookie_ttl_days) {
            return Err(Error::Config(format!(
                "tracker.session_cookie_ttl_days must be between 1 and {}",
                MAX_COOKIE_TTL_DAYS
            )));
        }
        if self.timeout_in_milliseconds < -1 {
            return Err(Error::Config(
                "tracker.timeout_in_milliseconds must be -1 (disabled) or positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.tracker.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/unomi-tracker/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("unomi-tracker").join("config.toml")
    }

    /// Returns the state directory path (for logs and cookies)
    ///
    /// `$XDG_STATE_HOME/unomi-tracker/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("unomi-tracker")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("unomi-tracker.log")
    }

    /// Returns the persisted cookie jar path
    pub fn cookie_jar_path() -> PathBuf {
        Self::state_dir().join("cookies.json")
    }
}
