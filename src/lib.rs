// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan control for the Argon One Raspberry Pi case.
//!
//! The daemon samples the CPU temperature from sysfs, maps it to a duty
//! cycle through a threshold table, and drives the case fan over I2C.
//! A hysteresis band keeps the fan from oscillating around a threshold.

pub mod config;
pub mod control;
pub mod fan;
pub mod metrics;
pub mod thermal;
pub mod thresholds;
