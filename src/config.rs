// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::sensor::DesiredConfig;
use crate::constants::{ELEVATION_COMMAND_INTERVAL, FRAME_RATE_WINDOW};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Directory name under the platform config dir
const CONFIG_DIR_NAME: &str = "depth-viewer";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sensor configuration applied when a session starts
    pub sensor: DesiredConfig,
    /// Spacing between elevation motor commands in milliseconds
    pub elevation_command_interval_ms: u64,
    /// Keep the last image on screen when the sensor changes
    pub retain_image_on_sensor_change: bool,
    /// Frame rate averaging window in milliseconds
    pub frame_rate_window_ms: u64,
    /// Default tracing filter when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensor: DesiredConfig::default(),
            elevation_command_interval_ms: ELEVATION_COMMAND_INTERVAL.as_millis() as u64,
            retain_image_on_sensor_change: false,
            frame_rate_window_ms: FRAME_RATE_WINDOW.as_millis() as u64,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn elevation_command_interval(&self) -> Duration {
        Duration::from_millis(self.elevation_command_interval_ms)
    }

    pub fn frame_rate_window(&self) -> Duration {
        Duration::from_millis(self.frame_rate_window_ms.max(1))
    }

    /// `<config dir>/depth-viewer/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Load from `path`, falling back to defaults
    ///
    /// A missing file silently yields defaults; an unreadable or invalid
    /// file is logged and also yields defaults.
    pub fn load_from_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Load from the default location, falling back to defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Ok(path) => Self::load_from_or_default(&path),
            Err(e) => {
                debug!(error = %e, "No config location");
                Self::default()
            }
        }
    }
}
