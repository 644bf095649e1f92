// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Prometheus metrics for the control daemon.
//!
//! Counters for readings and speed writes, gauges for the current
//! temperature (Kelvin) and fan speed (percent), exposed over a plain HTTP
//! endpoint in the text exposition format.

use prometheus::{Encoder, Gauge, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const SUBSYSTEM: &str = "argonone";

/// Instrument bundle handed to the control loop.
pub struct Metrics {
    registry: Registry,
    /// Successful temperature readings.
    pub readings: IntCounter,
    /// Failed temperature readings.
    pub readings_failed: IntCounter,
    /// Successful fan speed writes.
    pub speed_set: IntCounter,
    /// Failed fan speed writes.
    pub speed_set_failed: IntCounter,
    temperature_kelvin: Gauge,
    fan_speed: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let readings = IntCounter::with_opts(
            Opts::new(
                "temperature_readings_total",
                "The total number of temperature readings performed in daemon mode",
            )
            .subsystem(SUBSYSTEM),
        )?;
        let readings_failed = IntCounter::with_opts(
            Opts::new(
                "temperature_readings_failed_total",
                "The total number of failed temperature readings performed in daemon mode",
            )
            .subsystem(SUBSYSTEM),
        )?;
        let speed_set = IntCounter::with_opts(
            Opts::new(
                "speed_set_total",
                "The total number of fan speed changes performed in daemon mode",
            )
            .subsystem(SUBSYSTEM),
        )?;
        let speed_set_failed = IntCounter::with_opts(
            Opts::new(
                "fan_speed_set_failed_total",
                "The total number of failed fan speed changes performed in daemon mode",
            )
            .subsystem(SUBSYSTEM),
        )?;
        let temperature_kelvin = Gauge::with_opts(
            Opts::new(
                "temperature",
                "The current CPU temperature in degrees Kelvin",
            )
            .subsystem(SUBSYSTEM),
        )?;
        let fan_speed = Gauge::with_opts(
            Opts::new("fan_speed", "The current fan speed in percent").subsystem(SUBSYSTEM),
        )?;

        registry.register(Box::new(readings.clone()))?;
        registry.register(Box::new(readings_failed.clone()))?;
        registry.register(Box::new(speed_set.clone()))?;
        registry.register(Box::new(speed_set_failed.clone()))?;
        registry.register(Box::new(temperature_kelvin.clone()))?;
        registry.register(Box::new(fan_speed.clone()))?;

        Ok(Self {
            registry,
            readings,
            readings_failed,
            speed_set,
            speed_set_failed,
            temperature_kelvin,
            fan_speed,
        })
    }

    /// Record the latest temperature reading.
    pub fn observe_temperature(&self, celsius: f64) {
        self.temperature_kelvin.set(celsius + 273.15);
    }

    /// Record the latest applied fan speed.
    pub fn observe_fan_speed(&self, percent: u8) {
        self.fan_speed.set(percent as f64);
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {e}")))
    }
}

/// Serve the metrics endpoint until `shutdown` fires.
///
/// Every request gets the current exposition document; the path is not
/// inspected, so both `/` and `/metrics` work.
pub async fn serve(
    metrics: Arc<Metrics>,
    bind: String,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&bind).await?;
    log::info!("Serving metrics on http://{}/metrics", listener.local_addr()?);

    // Registered once before the loop so a stop signal cannot fall between
    // two accept polls.
    let stopped = shutdown.notified();
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_scrape(stream, metrics).await {
                                log::debug!("Metrics connection error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("Failed to accept metrics connection: {e}");
                    }
                }
            }
            _ = &mut stopped => {
                log::info!("Metrics server stopped");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_scrape(mut stream: TcpStream, metrics: Arc<Metrics>) -> std::io::Result<()> {
    // Drain the request head; the response is the same for any path.
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf).await?;

    let response = match metrics.render() {
        Ok(body) => format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            body.len(),
            body
        ),
        Err(e) => {
            log::error!("Failed to render metrics: {e}");
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string()
        }
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_all_instruments() {
        let m = Metrics::new().unwrap();
        m.readings.inc();
        m.speed_set.inc();
        m.observe_temperature(42.0);
        m.observe_fan_speed(50);

        let rendered = m.render().unwrap();
        assert!(rendered.contains("argonone_temperature_readings_total 1"));
        assert!(rendered.contains("argonone_temperature_readings_failed_total 0"));
        assert!(rendered.contains("argonone_speed_set_total 1"));
        assert!(rendered.contains("argonone_fan_speed_set_failed_total 0"));
        assert!(rendered.contains("argonone_temperature 315.15"));
        assert!(rendered.contains("argonone_fan_speed 50"));
    }

    #[tokio::test]
    async fn test_scrape_over_http() {
        let m = Arc::new(Metrics::new().unwrap());
        m.observe_fan_speed(100);
        let shutdown = Arc::new(Notify::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = tokio::spawn(serve(m, addr.to_string(), shutdown.clone()));

        // The server binds asynchronously; retry until it accepts.
        let mut stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("argonone_fan_speed 100"));

        // Same permit-less notification the daemon uses.
        shutdown.notify_waiters();
        server.await.unwrap().unwrap();
    }
}
