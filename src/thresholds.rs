// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Threshold table mapping temperatures to fan duty cycles.
//!
//! A table maps temperature breakpoints (degrees Celsius) to fan speed
//! percentages (0-100). Lookups scan the breakpoints in descending order
//! and return the speed of the highest breakpoint at or below the reading;
//! below the lowest breakpoint the fan is off.
//!
//! The serialized form is `"T1=S1;T2=S2;..."`, used both for the CLI flag
//! and for the config file.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing the `T=S;...` serialized form.
#[derive(Debug, Error, PartialEq)]
pub enum ThresholdsError {
    #[error("not a key/value pair: {0}")]
    NotKeyValue(String),

    #[error("invalid temperature '{0}'")]
    InvalidTemperature(String),

    #[error("invalid speed '{0}'")]
    InvalidSpeed(String),

    #[error("speed {speed} for threshold {threshold}\u{00b0}C is out of range [0-100]")]
    SpeedOutOfRange { threshold: f64, speed: i64 },
}

/// An ordered mapping from temperature threshold to fan speed percent.
///
/// The lookup index (thresholds sorted descending) is derived from the
/// entries and must be regenerated after any mutation; [`FromStr`] and
/// [`Thresholds::new`] do this automatically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thresholds {
    /// Threshold temperature -> speed percent, keys unique.
    entries: Vec<(f64, u8)>,
    /// Threshold temperatures in descending scan order, derived from `entries`.
    idx: Vec<f64>,
}

impl Thresholds {
    /// Build a table from entries. Duplicate temperatures keep the last speed.
    pub fn new<I: IntoIterator<Item = (f64, u8)>>(entries: I) -> Self {
        let mut table = Self::default();
        for (threshold, speed) in entries {
            table.insert(threshold, speed);
        }
        table.rebuild_index();
        table
    }

    /// Insert or replace an entry. The index is stale until the next
    /// [`rebuild_index`](Self::rebuild_index).
    fn insert(&mut self, threshold: f64, speed: u8) {
        match self.entries.iter_mut().find(|(t, _)| *t == threshold) {
            Some(entry) => entry.1 = speed,
            None => self.entries.push((threshold, speed)),
        }
    }

    /// Recompute the descending lookup index from the entries.
    pub fn rebuild_index(&mut self) {
        self.idx = self.entries.iter().map(|&(t, _)| t).collect();
        self.idx.sort_by(|a, b| b.total_cmp(a));
    }

    fn speed_at(&self, threshold: f64) -> u8 {
        self.entries
            .iter()
            .find(|(t, _)| *t == threshold)
            .map(|&(_, s)| s)
            .unwrap_or(0)
    }

    /// Speed for the highest threshold at or below `temperature`, or 0 if
    /// the temperature is below every threshold.
    pub fn speed_for(&self, temperature: f64) -> u8 {
        self.idx
            .iter()
            .find(|&&t| temperature >= t)
            .map(|&t| self.speed_at(t))
            .unwrap_or(0)
    }

    /// Like [`speed_for`](Self::speed_for), but a threshold matches while the
    /// temperature is still within `hysteresis` degrees below it. Used when
    /// the fan would slow down, so it keeps its speed until the temperature
    /// has fallen comfortably past the breakpoint.
    pub fn speed_for_with_hysteresis(&self, temperature: f64, hysteresis: f64) -> u8 {
        self.idx
            .iter()
            .find(|&&t| temperature > t - hysteresis)
            .map(|&t| self.speed_at(t))
            .unwrap_or(0)
    }

    /// The matched threshold itself, for diagnostics. 0.0 means no match.
    pub fn threshold_for(&self, temperature: f64) -> f64 {
        self.idx
            .iter()
            .find(|&&t| temperature >= t)
            .copied()
            .unwrap_or(0.0)
    }

    /// Threshold temperatures in descending scan order.
    pub fn index(&self) -> &[f64] {
        &self.idx
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for Thresholds {
    type Err = ThresholdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut table = Self::default();
        for pair in s.split(';') {
            let Some((temp, speed)) = pair.split_once('=') else {
                return Err(ThresholdsError::NotKeyValue(pair.to_string()));
            };
            if speed.contains('=') {
                return Err(ThresholdsError::NotKeyValue(pair.to_string()));
            }
            let threshold: f64 = temp
                .parse()
                .map_err(|_| ThresholdsError::InvalidTemperature(temp.to_string()))?;
            let percent: i64 = speed
                .parse()
                .map_err(|_| ThresholdsError::InvalidSpeed(speed.to_string()))?;
            if !(0..=100).contains(&percent) {
                return Err(ThresholdsError::SpeedOutOfRange {
                    threshold,
                    speed: percent,
                });
            }
            table.insert(threshold, percent as u8);
        }
        table.rebuild_index();
        Ok(table)
    }
}

impl fmt::Display for Thresholds {
    /// Serializes as `T=S;...` in descending threshold order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for &t in &self.idx {
            if !first {
                write!(f, ";")?;
            }
            write!(f, "{}={}", t, self.speed_at(t))?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for Thresholds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Thresholds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
