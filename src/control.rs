// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The control loop: a sampling task feeding an adjustment task.
//!
//! The sampler reads the CPU temperature on a fixed interval and hands each
//! reading over a single-slot channel, so the adjuster only ever sees the
//! most recent sample. The adjuster maps the reading to a duty cycle through
//! the threshold table and touches the fan only when the target changes.
//! When sampling stops, the closed channel tells the adjuster to park the
//! fan at full speed before exiting.

use crate::fan::FanOutput;
use crate::metrics::Metrics;
use crate::thermal::TemperatureSource;
use crate::thresholds::Thresholds;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tokio::time::{self, Duration, MissedTickBehavior};

/// Duty cycle commanded whenever the CPU temperature is unknown: at startup,
/// and again on shutdown.
pub const SAFE_SPEED: u8 = 100;

/// Decide the duty cycle for a sample.
///
/// Speed increases take effect immediately; a decrease is recomputed with
/// the hysteresis band so the fan does not oscillate around a threshold.
pub fn plan_speed(
    thresholds: &Thresholds,
    celsius: f64,
    hysteresis: f64,
    current: Option<u8>,
) -> u8 {
    let target = thresholds.speed_for(celsius);
    match current {
        Some(current) if target < current => {
            thresholds.speed_for_with_hysteresis(celsius, hysteresis)
        }
        _ => target,
    }
}

/// Sampling task: reads the temperature every `interval` and delivers each
/// reading over `tx`. A failed reading is logged and skipped. Stops on
/// `shutdown`; dropping `tx` is the termination signal for the adjuster.
pub async fn sample_loop<T: TemperatureSource>(
    mut source: T,
    interval: Duration,
    tx: mpsc::Sender<f64>,
    shutdown: Arc<Notify>,
    metrics: Arc<Metrics>,
) {
    let mut tick = time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    log::debug!("Sampling temperature every {interval:?}");

    // Registered once before the loop: a stop signal arriving while a
    // handoff is in flight is held until the next poll, not dropped.
    let stopped = shutdown.notified();
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let celsius = match source.sample() {
                    Ok(celsius) => {
                        metrics.readings.inc();
                        metrics.observe_temperature(celsius);
                        celsius
                    }
                    Err(e) => {
                        metrics.readings_failed.inc();
                        log::error!("Failed to read temperature: {e}");
                        continue;
                    }
                };
                log::debug!("Read temperature {celsius:.1}\u{00b0}C");
                if tx.send(celsius).await.is_err() {
                    log::debug!("Adjust task is gone, stopping sampler");
                    break;
                }
            }
            _ = &mut stopped => {
                log::debug!("Sampling task received stop signal");
                break;
            }
        }
    }
    // Dropping tx closes the channel, which triggers the adjuster's final
    // safety write.
}

/// Adjustment task: consumes samples until the channel closes, driving the
/// fan only on target-speed transitions, then parks it at [`SAFE_SPEED`].
pub async fn adjust_loop<F: FanOutput>(
    mut rx: mpsc::Receiver<f64>,
    mut fan: F,
    thresholds: Arc<Thresholds>,
    hysteresis: f64,
    metrics: Arc<Metrics>,
) {
    // No speed written yet, so the first sample always actuates.
    let mut current: Option<u8> = None;

    while let Some(celsius) = rx.recv().await {
        let target = plan_speed(&thresholds, celsius, hysteresis, current);
        if current == Some(target) {
            log::debug!(
                "Temperature {celsius:.1}\u{00b0}C is still within the same threshold, \
                 keeping fan at {target}%"
            );
            continue;
        }

        log::info!(
            "Temperature {celsius:.1}\u{00b0}C matches threshold {}\u{00b0}C, \
             setting fan speed to {target}%",
            thresholds.threshold_for(celsius)
        );
        match fan.set_speed(target) {
            Ok(()) => {
                current = Some(target);
                metrics.speed_set.inc();
                metrics.observe_fan_speed(target);
            }
            Err(e) => {
                // Leave `current` unchanged so the next sample retries.
                metrics.speed_set_failed.inc();
                log::error!("Failed to set fan speed to {target}%: {e}");
            }
        }
    }

    log::warn!(
        "Fan control is shutting down, setting fan to {SAFE_SPEED}% speed as a safety measure"
    );
    match fan.set_speed(SAFE_SPEED) {
        Ok(()) => {
            metrics.speed_set.inc();
            metrics.observe_fan_speed(SAFE_SPEED);
        }
        Err(e) => {
            metrics.speed_set_failed.inc();
            log::error!("Failed to set safety fan speed: {e}");
        }
    }
}

/// Run the full control loop until `shutdown` fires and the final safety
/// write has completed.
pub async fn run<T, F>(
    source: T,
    fan: F,
    thresholds: Arc<Thresholds>,
    hysteresis: f64,
    interval: Duration,
    shutdown: Arc<Notify>,
    metrics: Arc<Metrics>,
) where
    T: TemperatureSource + 'static,
    F: FanOutput + 'static,
{
    // Single-slot channel: the sampler blocks until the adjuster has taken
    // the previous reading, so samples are never queued up stale.
    let (tx, rx) = mpsc::channel(1);
    let sampler = tokio::spawn(sample_loop(source, interval, tx, shutdown, metrics.clone()));
    let adjuster = tokio::spawn(adjust_loop(rx, fan, thresholds, hysteresis, metrics));
    let _ = sampler.await;
    let _ = adjuster.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fan::FanError;
    use crate::thermal::ThermalError;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn table() -> Arc<Thresholds> {
        Arc::new(Thresholds::new([(60.0, 100), (55.0, 50), (50.0, 10)]))
    }

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    /// Records every attempted write; the first `failures` attempts fail.
    #[derive(Clone, Default)]
    struct RecordingFan {
        attempts: Arc<Mutex<Vec<u8>>>,
        failures: Arc<Mutex<u32>>,
    }

    impl FanOutput for RecordingFan {
        fn set_speed(&mut self, percent: u8) -> Result<(), FanError> {
            self.attempts.lock().unwrap().push(percent);
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(FanError::Write {
                    bus: 0,
                    address: 0x1a,
                    source: rppal::i2c::Error::Io(std::io::Error::other("injected")),
                });
            }
            Ok(())
        }
    }

    /// Yields a scripted sequence of readings, then errors forever.
    struct ScriptedSource {
        readings: VecDeque<Result<f64, ()>>,
    }

    impl ScriptedSource {
        fn new<I: IntoIterator<Item = Result<f64, ()>>>(readings: I) -> Self {
            Self {
                readings: readings.into_iter().collect(),
            }
        }
    }

    /// Always reads the same temperature.
    struct ConstantSource(f64);

    impl TemperatureSource for ConstantSource {
        fn sample(&mut self) -> Result<f64, ThermalError> {
            Ok(self.0)
        }
    }

    impl TemperatureSource for ScriptedSource {
        fn sample(&mut self) -> Result<f64, ThermalError> {
            self.readings.pop_front().unwrap_or(Err(())).map_err(|_| {
                ThermalError::Read {
                    path: PathBuf::from("scripted"),
                    source: std::io::Error::other("exhausted"),
                }
            })
        }
    }

    #[test]
    fn test_plan_speed_first_sample_uses_plain_lookup() {
        let t = table();
        assert_eq!(plan_speed(&t, 62.0, 1.0, None), 100);
        assert_eq!(plan_speed(&t, 40.0, 1.0, None), 0);
    }

    #[test]
    fn test_plan_speed_increases_ignore_hysteresis() {
        let t = table();
        // 10 -> 100 jumps immediately, even within a hysteresis band.
        assert_eq!(plan_speed(&t, 60.0, 5.0, Some(10)), 100);
    }

    #[test]
    fn test_plan_speed_decreases_are_dampened() {
        let t = table();
        // Still within one degree below the 55C threshold: keep 50%.
        assert_eq!(plan_speed(&t, 54.5, 1.0, Some(50)), 50);
        // Fallen past the band: drop to 10%.
        assert_eq!(plan_speed(&t, 54.0, 1.0, Some(50)), 10);
    }

    #[tokio::test]
    async fn test_adjust_loop_writes_once_per_transition_and_parks_on_close() {
        let fan = RecordingFan::default();
        let attempts = fan.attempts.clone();
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(adjust_loop(rx, fan, table(), 1.0, metrics()));

        // Descending sequence crossing every threshold. 54.5 stays at 50%
        // thanks to hysteresis; 62.5 stays at 100% (same target).
        for celsius in [62.0, 62.5, 56.0, 54.5, 54.0, 48.0] {
            tx.send(celsius).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), vec![100, 50, 10, 0, 100]);
    }

    #[tokio::test]
    async fn test_adjust_loop_retries_after_failed_write() {
        let fan = RecordingFan::default();
        *fan.failures.lock().unwrap() = 1;
        let attempts = fan.attempts.clone();
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(adjust_loop(rx, fan, table(), 1.0, metrics()));

        // First write fails; current stays unset, so the identical reading
        // triggers a second attempt.
        tx.send(62.0).await.unwrap();
        tx.send(62.0).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), vec![100, 100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_loop_skips_failed_readings() {
        let source = ScriptedSource::new([Ok(50.0), Err(()), Ok(40.0)]);
        let shutdown = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(sample_loop(
            source,
            Duration::from_secs(5),
            tx,
            shutdown.clone(),
            metrics(),
        ));

        assert_eq!(rx.recv().await, Some(50.0));
        // The failed reading is skipped, not delivered.
        assert_eq!(rx.recv().await, Some(40.0));

        shutdown.notify_one();
        task.await.unwrap();
        // Channel closes once the sampler exits.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_observed_while_sampler_blocked_on_handoff() {
        let shutdown = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(sample_loop(
            ConstantSource(43.0),
            Duration::from_secs(5),
            tx,
            shutdown.clone(),
            metrics(),
        ));

        // Nothing is received: the first sample fills the single slot and
        // the second leaves the sampler blocked in the handoff.
        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown.notify_waiters();

        // Draining unblocks the handoff; the sampler must then observe the
        // stop signal instead of producing forever.
        let mut delivered = 0;
        while rx.recv().await.is_some() {
            delivered += 1;
            assert!(delivered <= 2, "sampler kept producing after shutdown");
        }
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_performs_final_safety_write() {
        let fan = RecordingFan::default();
        let attempts = fan.attempts.clone();
        let shutdown = Arc::new(Notify::new());
        let m = metrics();

        let source = ScriptedSource::new([Ok(62.0), Ok(48.0)]);
        let loop_task = tokio::spawn(run(
            source,
            fan,
            table(),
            1.0,
            Duration::from_secs(5),
            shutdown.clone(),
            m.clone(),
        ));

        // Let both scripted samples flow through, then stop.
        while m.readings.get() < 2 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        shutdown.notify_waiters();
        loop_task.await.unwrap();

        let attempts = attempts.lock().unwrap();
        // 62C -> 100%, 48C with hysteresis from 100% -> 0%, then the
        // unconditional shutdown write.
        assert_eq!(attempts.last(), Some(&100));
        assert_eq!(*attempts, vec![100, 0, 100]);
    }
}
