//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use wisp_capture::CaptureConfig;

/// Configuration for wisp
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chrome remote-debugging port
    pub port: Option<u16>,
    /// Directory for exports and page dumps
    pub debug_dir: Option<String>,
    /// Seconds of token silence before a reply counts as finished
    pub idle_timeout_secs: Option<f64>,
    /// Seconds between completion polls
    pub poll_interval_secs: Option<f64>,
    /// How many completion polls before giving up
    pub max_polls: Option<u32>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wisp")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for WISP_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("WISP_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            port: Some(9222),
            debug_dir: Some("debug".to_string()),
            idle_timeout_secs: Some(3.0),
            poll_interval_secs: Some(2.0),
            max_polls: Some(6),
        };

        default_config.save()?;
        Ok(path)
    }

    /// Build the capture settings, config values first, then overrides.
    pub fn capture_config(&self) -> CaptureConfig {
        let mut capture = CaptureConfig::default();
        if let Some(secs) = self.idle_timeout_secs {
            capture = capture.with_idle_timeout(Duration::from_secs_f64(secs));
        }
        if let Some(secs) = self.poll_interval_secs {
            capture = capture.with_poll_interval(Duration::from_secs_f64(secs));
        }
        if let Some(max_polls) = self.max_polls {
            capture = capture.with_max_polls(max_polls);
        }
        if let Some(dir) = &self.debug_dir {
            capture = capture.with_debug_dir(dir);
        }
        capture
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# wisp configuration file
# Place at ~/.config/wisp/config.toml (Linux/Mac) or %APPDATA%\wisp\config.toml (Windows)

# Chrome remote-debugging port
# Start Chrome with: google-chrome --remote-debugging-port=9222
port = 9222

# Directory for exported replies and page dumps
debug_dir = "debug"

# Seconds of token silence before a streaming reply counts as finished
idle_timeout_secs = 3.0

# Seconds between completion polls
poll_interval_secs = 2.0

# How many completion polls before giving up
max_polls = 6
"#
}
