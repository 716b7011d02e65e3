//! Configuration loading and persistence.
//!
//! Handles reading and writing the cuego-ddp configuration file. The API key
//! is never written to disk; it comes from the environment or the command
//! line.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::sync::LazyLock;
use std::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::constants::{API_KEY_PATTERN, RECONNECT_DELAY, WS_URL_PATTERN};
use crate::ddp::{DdpError, SessionOptions};

static WS_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(WS_URL_PATTERN).expect("valid WS URL pattern"));

static API_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(API_KEY_PATTERN).expect("valid API key pattern"));

const CONFIG_FILE: &str = "config.json";

/// Whether `url` is an acceptable `ws://` or `wss://` target.
pub fn is_valid_ws_url(url: &str) -> bool {
    WS_URL.is_match(url)
}

/// Whether `key` has the shape of a CueGO API key.
pub fn is_valid_api_key(key: &str) -> bool {
    API_KEY.is_match(key)
}

/// Configuration for the cuego-ddp client.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// WebSocket address of the CueGO server.
    pub url: String,
    /// API key - NOT serialized to disk.
    #[serde(skip)]
    pub api_key: String,
    /// Reconnect after the connection drops.
    pub reconnect: bool,
    /// Seconds to wait before reconnecting.
    pub reconnect_delay_secs: u64,
    /// Log every protocol frame at debug level.
    pub debug_messages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            reconnect: true,
            reconnect_delay_secs: RECONNECT_DELAY.as_secs(),
            debug_messages: false,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `CUEGO_CONFIG_DIR` overrides the platform config dir
    /// (Linux: ~/.config/cuego-ddp).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("CUEGO_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("cuego-ddp")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let dir = Self::config_dir()?;
        let mut config = Self::load_from(&dir).unwrap_or_else(|e| {
            log::debug!("Using default config: {:#}", e);
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            anyhow::bail!("Config file not found");
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Applies `CUEGO_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("CUEGO_URL") {
            self.url = url;
        }

        if let Some(api_key) = var("CUEGO_API_KEY") {
            self.api_key = api_key;
        }

        if let Some(reconnect) = var("CUEGO_RECONNECT") {
            if let Some(enabled) = parse_flag(&reconnect) {
                self.reconnect = enabled;
            }
        }

        if let Some(delay) = var("CUEGO_RECONNECT_DELAY") {
            if let Ok(secs) = delay.parse::<u64>() {
                self.reconnect_delay_secs = secs;
            }
        }

        if let Some(debug) = var("CUEGO_DEBUG_MESSAGES") {
            if let Some(enabled) = parse_flag(&debug) {
                self.debug_messages = enabled;
            }
        }
    }

    /// Persists the current configuration to the config dir.
    /// Note: the API key is NOT saved.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the current configuration to `dir/config.json`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Check the server address.
    pub fn validate_url(&self) -> Result<(), DdpError> {
        if is_valid_ws_url(self.url.trim()) {
            Ok(())
        } else {
            Err(DdpError::Configuration(
                "WS URL is not defined or invalid".to_string(),
            ))
        }
    }

    /// Check the API key.
    pub fn validate_api_key(&self) -> Result<(), DdpError> {
        if is_valid_api_key(&self.api_key) {
            Ok(())
        } else {
            Err(DdpError::Configuration("API key invalid".to_string()))
        }
    }

    /// Delay between a dropped connection and the next attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Session behaviour derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            auto_reconnect: self.reconnect,
            reconnect_delay: self.reconnect_delay(),
            debug_messages: self.debug_messages,
            ..SessionOptions::default()
        }
    }

    /// API key safe to print: the first four characters, then a mask.
    pub fn redacted_api_key(&self) -> String {
        if self.api_key.is_empty() {
            "(not set)".to_string()
        } else {
            let prefix: String = self.api_key.chars().take(4).collect();
            format!("{prefix}****")
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
