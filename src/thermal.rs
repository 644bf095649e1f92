// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! CPU temperature readings from sysfs.
//!
//! The thermal zone file holds an integer number of millidegrees Celsius
//! with a trailing newline, e.g. `42000` for 42.0 degrees.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default sysfs file containing the current CPU temperature.
pub const DEFAULT_THERMAL_DEVICE_FILE: &str = "/sys/class/thermal/thermal_zone0/temp";

#[derive(Debug, Error)]
pub enum ThermalError {
    #[error("thermal device file '{0}' does not exist")]
    Missing(PathBuf),

    #[error("thermal device file '{0}' is a directory")]
    IsDirectory(PathBuf),

    #[error("reading '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("parsing temperature '{value}' from '{path}'")]
    Parse { path: PathBuf, value: String },
}

/// Reads the CPU temperature from a fixed sysfs path.
#[derive(Debug, Clone)]
pub struct ThermalReader {
    path: PathBuf,
}

impl ThermalReader {
    /// Create a reader for the given device file. Fails if the path does not
    /// exist, is not accessible, or is a directory.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ThermalError> {
        let path = path.as_ref().to_path_buf();
        let meta = fs::metadata(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ThermalError::Missing(path.clone())
            } else {
                ThermalError::Read {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        if meta.is_dir() {
            return Err(ThermalError::IsDirectory(path));
        }
        Ok(Self { path })
    }

    /// Current CPU temperature in degrees Celsius.
    pub fn read_celsius(&self) -> Result<f64, ThermalError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| ThermalError::Read {
            path: self.path.clone(),
            source,
        })?;
        let trimmed = raw.strip_suffix('\n').unwrap_or(&raw);
        let millidegrees: i64 = trimmed.parse().map_err(|_| ThermalError::Parse {
            path: self.path.clone(),
            value: trimmed.to_string(),
        })?;
        Ok(millidegrees as f64 / 1000.0)
    }

    /// Current CPU temperature in degrees Fahrenheit.
    pub fn read_fahrenheit(&self) -> Result<f64, ThermalError> {
        Ok(self.read_celsius()? * 9.0 / 5.0 + 32.0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Source of temperature samples for the control loop. Abstracted so tests
/// can script readings without a sysfs tree.
pub trait TemperatureSource: Send {
    fn sample(&mut self) -> Result<f64, ThermalError>;
}

impl TemperatureSource for ThermalReader {
    fn sample(&mut self) -> Result<f64, ThermalError> {
        self.read_celsius()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn zone_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn test_read_celsius() {
        let file = zone_file("42000\n");
        let reader = ThermalReader::new(file.path()).unwrap();
        assert_eq!(reader.read_celsius().unwrap(), 42.0);
    }

    #[test]
    fn test_read_celsius_without_trailing_newline() {
        let file = zone_file("55500");
        let reader = ThermalReader::new(file.path()).unwrap();
        assert_eq!(reader.read_celsius().unwrap(), 55.5);
    }

    #[test]
    fn test_read_fahrenheit() {
        let file = zone_file("40000\n");
        let reader = ThermalReader::new(file.path()).unwrap();
        assert_eq!(reader.read_fahrenheit().unwrap(), 104.0);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let file = zone_file("not a number\n");
        let reader = ThermalReader::new(file.path()).unwrap();
        assert!(matches!(
            reader.read_celsius(),
            Err(ThermalError::Parse { value, .. }) if value == "not a number"
        ));
    }

    #[test]
    fn test_new_rejects_missing_file() {
        assert!(matches!(
            ThermalReader::new("/nonexistent/thermal_zone0/temp"),
            Err(ThermalError::Missing(_))
        ));
    }

    #[test]
    fn test_new_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ThermalReader::new(dir.path()),
            Err(ThermalError::IsDirectory(_))
        ));
    }
}
