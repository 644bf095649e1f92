// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Optional TOML file with daemon settings; explicit CLI flags take
//! precedence over it. Default path: `/etc/argonfan/config.toml`

use crate::fan;
use crate::thermal;
use crate::thresholds::Thresholds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/argonfan/config.toml";

/// Default threshold table: the Argon One vendor defaults.
pub const DEFAULT_THRESHOLDS: &str = "60=100;55=50;50=10";

/// Default hysteresis band in degrees Celsius.
pub const DEFAULT_HYSTERESIS: f64 = 1.0;

/// Default check interval in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5;

/// Default address for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_BIND: &str = "127.0.0.1:8080";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// I2C bus the fan resides on.
    #[serde(default = "default_bus")]
    pub bus: u8,

    /// Sysfs file containing the current CPU temperature in millidegrees.
    #[serde(default = "default_device_file")]
    pub device_file: String,

    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Threshold table in `"C=percent;..."` form.
    #[serde(default = "default_thresholds")]
    pub thresholds: Thresholds,

    /// Degrees the temperature must fall below a threshold before the fan
    /// slows down.
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,

    /// Seconds between temperature checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Address to bind the Prometheus metrics endpoint to.
    #[serde(default = "default_metrics_bind")]
    pub metrics_bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            hysteresis: DEFAULT_HYSTERESIS,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            metrics_bind: DEFAULT_METRICS_BIND.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: fan::DEFAULT_I2C_BUS,
            device_file: thermal::DEFAULT_THERMAL_DEVICE_FILE.to_string(),
            daemon: DaemonConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Load / Resolve
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_bus() -> u8 {
    fan::DEFAULT_I2C_BUS
}

fn default_device_file() -> String {
    thermal::DEFAULT_THERMAL_DEVICE_FILE.to_string()
}

fn default_thresholds() -> Thresholds {
    DEFAULT_THRESHOLDS
        .parse()
        .expect("built-in default thresholds are valid")
}

fn default_hysteresis() -> f64 {
    DEFAULT_HYSTERESIS
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_metrics_bind() -> String {
    DEFAULT_METRICS_BIND.to_string()
}
