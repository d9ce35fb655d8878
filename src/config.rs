//! Configuration management for crabcapture
//!
//! Provides loading, saving and validation of the capture defaults, the
//! open/retry policy and the names of the worker threads.

use crate::errors::CaptureError;
use crate::types::FormatPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapturerConfig {
    pub capture: CaptureDefaults,
    pub session: SessionPolicy,
    pub threads: ThreadConfig,
}

/// Format requested when the caller does not provide one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureDefaults {
    pub default_width: u32,
    pub default_height: u32,
    /// Frames per second
    pub default_framerate: u32,
    /// How a requested format is matched against the device's formats
    pub format_policy: FormatPolicy,
}

/// Open/retry behaviour of the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// Attempts made by a fresh start before giving up
    pub max_open_attempts: u32,
    /// Attempts made when reopening after a switch or restart
    pub switch_open_attempts: u32,
    /// Backoff before a failed open is retried
    pub open_retry_delay_ms: u64,
    /// Watchdog window for a single open attempt
    pub open_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    pub capture_thread_name: String,
    pub watchdog_thread_name: String,
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            default_width: 1280,
            default_height: 720,
            default_framerate: 30,
            format_policy: FormatPolicy::Closest,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_open_attempts: 3,
            switch_open_attempts: 1,
            open_retry_delay_ms: 500,
            open_timeout_ms: 10_000,
        }
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            capture_thread_name: "crabcapture-camera".to_string(),
            watchdog_thread_name: "crabcapture-watchdog".to_string(),
        }
    }
}

impl Default for CapturerConfig {
    fn default() -> Self {
        Self {
            capture: CaptureDefaults::default(),
            session: SessionPolicy::default(),
            threads: ThreadConfig::default(),
        }
    }
}

impl SessionPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl CapturerConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CaptureError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CapturerConfig = toml::from_str(&contents)
            .map_err(|e| CaptureError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(CaptureError::Config)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CaptureError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcapture.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.capture.default_width == 0 || self.capture.default_height == 0 {
            return Err("Invalid default resolution".to_string());
        }
        if self.capture.default_framerate == 0 || self.capture.default_framerate > 240 {
            return Err("Invalid default framerate (must be 1-240)".to_string());
        }

        if self.session.max_open_attempts == 0 {
            return Err("max_open_attempts must be at least 1".to_string());
        }
        if self.session.switch_open_attempts == 0 {
            return Err("switch_open_attempts must be at least 1".to_string());
        }
        if self.session.open_timeout_ms == 0 {
            return Err("open_timeout_ms must be greater than zero".to_string());
        }

        if self.threads.capture_thread_name.trim().is_empty()
            || self.threads.watchdog_thread_name.trim().is_empty()
        {
            return Err("Thread names must not be empty".to_string());
        }

        Ok(())
    }
}
