// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application configuration.
//!
//! The configuration is a JSON file loaded once at startup and never written
//! back. A missing or unreadable file is fatal: without it there is no
//! threshold and therefore no safe way to decide on a shutdown.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nut_client::ConnectionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name used for the configuration directory.
pub const APP_NAME: &str = "upsguard";

/// Default NUT server address
pub const DEFAULT_NUT_HOST: &str = "localhost";

#[cfg(windows)]
const DEFAULT_SHUTDOWN_COMMAND: &str = "shutdown /s /t 0";
#[cfg(not(windows))]
const DEFAULT_SHUTDOWN_COMMAND: &str = "shutdown -h now";

/// Errors raised while loading the configuration. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which threshold decides on a shutdown.
///
/// Anything other than the two known names is kept as [`MonitorMode::Unknown`]
/// so the service can start and report it, but it never shuts the host down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MonitorMode {
    /// Shut down when `battery.charge` drops to the threshold (percent).
    BatteryPercentage,
    /// Shut down after the threshold (seconds) on battery.
    TimeOnBattery,
    /// Unrecognized mode name.
    Unknown(String),
}

impl MonitorMode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::BatteryPercentage => "battery_percentage",
            Self::TimeOnBattery => "time_on_battery",
            Self::Unknown(name) => name,
        }
    }
}

impl From<String> for MonitorMode {
    fn from(name: String) -> Self {
        match name.as_str() {
            "battery_percentage" => Self::BatteryPercentage,
            "time_on_battery" => Self::TimeOnBattery,
            _ => Self::Unknown(name),
        }
    }
}

impl From<MonitorMode> for String {
    fn from(mode: MonitorMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for the NUT server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NutServerConfig {
    /// Host name or IP address of upsd
    #[serde(default = "default_host")]
    pub host: String,

    /// upsd TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user; an empty string skips the login
    #[serde(default = "default_user")]
    pub user: String,

    /// Login password
    #[serde(default = "default_password")]
    pub password: String,

    /// Device name as configured in upsd
    #[serde(default = "default_ups_name")]
    pub ups_name: String,
}

impl Default for NutServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            ups_name: default_ups_name(),
        }
    }
}

/// Top-level configuration file contents
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// NUT server to poll
    #[serde(default)]
    pub nut_server: NutServerConfig,

    /// Threshold policy: "battery_percentage" or "time_on_battery"
    pub monitor_type: MonitorMode,

    /// Charge percent or seconds on battery, depending on `monitor_type`
    pub shutdown_threshold: u64,

    /// Command run through the platform shell to power off the host
    #[serde(default = "default_shutdown_command")]
    pub shutdown_command: String,

    /// Seconds between polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds allowed for connecting and for each server exchange
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional JSON-lines file receiving every monitor event
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

// Default value functions for serde
fn default_host() -> String {
    DEFAULT_NUT_HOST.to_string()
}

fn default_port() -> u16 {
    nut_client::DEFAULT_PORT
}

fn default_user() -> String {
    "ups".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_ups_name() -> String {
    "ups".to_string()
}

fn default_shutdown_command() -> String {
    DEFAULT_SHUTDOWN_COMMAND.to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Default config file location: `<config dir>/upsguard/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_NAME).join("config.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".to_string()));
        }
        if self.nut_server.ups_name.trim().is_empty() {
            return Err(ConfigError::Invalid("nut_server.ups_name is empty".to_string()));
        }
        // A missing charge reads as 100, which must never fire
        if self.monitor_type == MonitorMode::BatteryPercentage && self.shutdown_threshold >= 100 {
            return Err(ConfigError::Invalid(format!(
                "shutdown_threshold {} must be below 100 percent",
                self.shutdown_threshold
            )));
        }
        if self.shutdown_command.trim().is_empty() {
            return Err(ConfigError::Invalid("shutdown_command is empty".to_string()));
        }
        Ok(())
    }

    /// Time between polls
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Connection settings for the NUT client
    #[must_use]
    pub fn connection(&self) -> ConnectionConfig {
        let server = &self.nut_server;
        let login = !server.user.is_empty();
        ConnectionConfig {
            host: server.host.clone(),
            port: server.port,
            username: login.then(|| server.user.clone()),
            password: (login && !server.password.is_empty()).then(|| server.password.clone()),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// Copy safe for printing, with the password masked
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.nut_server.password.is_empty() {
            copy.nut_server.password = "********".to_string();
        }
        copy
    }
}
