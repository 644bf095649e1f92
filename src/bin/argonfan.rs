// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! argonfan: fan control for the Argon One Raspberry Pi case.
//!
//! `argonfan daemon` runs the threshold-driven control loop with a
//! Prometheus metrics endpoint; `argonfan temperature` prints one reading;
//! `argonfan set-speed` writes one duty cycle.

use anyhow::Context;
use argon_fan_utility::config::{self, Config};
use argon_fan_utility::control;
use argon_fan_utility::fan::{self, Fan};
use argon_fan_utility::metrics::{self, Metrics};
use argon_fan_utility::thermal::{self, ThermalReader};
use argon_fan_utility::thresholds::Thresholds;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use tokio::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "argonfan", about = "Fan control for the Argon One case")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Sysfs file containing the current CPU temperature.
    #[arg(short = 'f', long = "file", global = true, value_name = "PATH")]
    device_file: Option<String>,

    /// I2C bus the fan resides on.
    #[arg(short, long, global = true)]
    bus: Option<u8>,

    /// I2C address of the fan controller. Hardware constant; override for
    /// diagnostics only.
    #[arg(long, global = true, default_value_t = fan::DEFAULT_FAN_ADDRESS)]
    address: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the fan control daemon.
    Daemon {
        /// Threshold table: "C=percent" pairs separated by ';'.
        #[arg(short, long)]
        thresholds: Option<Thresholds>,

        /// Degrees the temperature must fall below a threshold before the
        /// fan slows down. Speeding up is never delayed.
        #[arg(long)]
        hysteresis: Option<f64>,

        /// Seconds between temperature checks.
        #[arg(short, long, value_name = "SECONDS")]
        interval: Option<u64>,

        /// Address to bind the Prometheus metrics endpoint to.
        #[arg(long)]
        metrics_bind: Option<String>,

        /// Path to the configuration file.
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Read the current CPU temperature once.
    Temperature {
        /// Display the temperature in Fahrenheit.
        #[arg(short, long)]
        imperial: bool,
    },

    /// Set the fan speed once.
    SetSpeed {
        /// Duty cycle in percent.
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        speed: u8,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Command::Temperature { imperial } => {
            let path = cli
                .device_file
                .unwrap_or_else(|| thermal::DEFAULT_THERMAL_DEVICE_FILE.to_string());
            let reader = ThermalReader::new(&path).context("creating thermal reader")?;
            if imperial {
                let t = reader.read_fahrenheit().context("reading temperature")?;
                println!("Temperature: {t:.1}\u{00b0}F");
            } else {
                let t = reader.read_celsius().context("reading temperature")?;
                println!("Temperature: {t:.1}\u{00b0}C");
            }
            Ok(())
        }

        Command::SetSpeed { speed } => {
            let bus = cli.bus.unwrap_or(fan::DEFAULT_I2C_BUS);
            let fan = Fan::connect(bus, cli.address).context("connecting to fan")?;
            fan.set_speed(speed).context("setting fan speed")?;
            Ok(())
        }

        Command::Daemon {
            thresholds,
            hysteresis,
            interval,
            metrics_bind,
            config,
        } => {
            let config_path = config::resolve_config_path(config.as_deref());
            let cfg = config::load_config(&config_path).unwrap_or_else(|e| {
                log::warn!("Could not load config: {e}, using defaults");
                Config::default()
            });

            let settings = DaemonSettings {
                bus: cli.bus.unwrap_or(cfg.bus),
                address: cli.address,
                device_file: cli.device_file.unwrap_or(cfg.device_file),
                thresholds: thresholds.unwrap_or(cfg.daemon.thresholds),
                hysteresis: hysteresis.unwrap_or(cfg.daemon.hysteresis),
                interval: Duration::from_secs(interval.unwrap_or(cfg.daemon.check_interval_secs)),
                metrics_bind: metrics_bind.unwrap_or(cfg.daemon.metrics_bind),
            };
            run_daemon(settings).await
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

struct DaemonSettings {
    bus: u8,
    address: u16,
    device_file: String,
    thresholds: Thresholds,
    hysteresis: f64,
    interval: Duration,
    metrics_bind: String,
}

async fn run_daemon(settings: DaemonSettings) -> anyhow::Result<()> {
    anyhow::ensure!(
        settings.hysteresis >= 0.0,
        "hysteresis must be non-negative, got {}",
        settings.hysteresis
    );
    anyhow::ensure!(
        settings.interval > Duration::ZERO,
        "check interval must be at least one second"
    );

    log::info!(
        "Starting daemon; thresholds [{}], hysteresis {}\u{00b0}C, interval {:?}",
        settings.thresholds,
        settings.hysteresis,
        settings.interval
    );

    let reader =
        ThermalReader::new(&settings.device_file).context("creating thermal reader")?;
    let fan = Fan::connect(settings.bus, settings.address).context("connecting to fan")?;
    let metrics = Arc::new(Metrics::new().context("registering metrics")?);

    // The CPU temperature is unknown until the first reading arrives, so
    // park the fan at full speed.
    log::info!(
        "Setting initial fan speed to {}% as a safety measure",
        control::SAFE_SPEED
    );
    fan.set_speed(control::SAFE_SPEED)
        .context("setting initial fan speed")?;
    metrics.speed_set.inc();
    metrics.observe_fan_speed(control::SAFE_SPEED);

    let shutdown = Arc::new(Notify::new());

    log::info!(
        "Starting Prometheus metrics server on {}",
        settings.metrics_bind
    );
    let metrics_task = tokio::spawn(metrics::serve(
        metrics.clone(),
        settings.metrics_bind.clone(),
        shutdown.clone(),
    ));

    let thresholds = Arc::new(settings.thresholds);
    let loop_task = tokio::spawn(control::run(
        reader.clone(),
        fan.clone(),
        thresholds,
        settings.hysteresis,
        settings.interval,
        shutdown.clone(),
        metrics.clone(),
    ));

    wait_for_signal()
        .await
        .context("installing signal handlers")?;
    log::info!("Received shutdown signal");
    shutdown.notify_waiters();

    // The control loop performs its own 100% safety write while draining.
    if let Err(e) = loop_task.await {
        log::error!("Control loop task failed: {e}");
    }
    if let Ok(Err(e)) = metrics_task.await {
        log::error!("Metrics server error: {e}");
    }

    // Last-resort safety write, independent of the control loop, in case it
    // never started or exited abnormally.
    match reader.read_celsius() {
        Ok(t) => log::warn!(
            "Fan control is shutting down at {t:.1}\u{00b0}C, \
             setting fan to 100% speed as a safety measure"
        ),
        Err(e) => log::error!("Failed to read temperature during shutdown: {e}"),
    }
    if let Err(e) = fan.set_speed(control::SAFE_SPEED) {
        metrics.speed_set_failed.inc();
        log::error!("Failed to set final safety fan speed: {e}");
    }

    Ok(())
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
