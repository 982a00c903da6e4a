//! DS18B20 one-wire temperature sensor read through the kernel `w1_slave` file.
//!
//! The kernel driver exposes a two-line report:
//!
//! ```text
//! 75 01 4b 46 7f ff 0b 10 78 : crc=78 YES
//! 75 01 4b 46 7f ff 0b 10 78 t=23312
//! ```
//!
//! The first line ends with `YES` once the CRC is valid; the number after `t=`
//! on the second line is the temperature in milli-degrees Celsius.

use super::{FAULT_SENTINEL_CELSIUS, TemperatureSource};
use crate::config::SensorConfig;
use crate::error::{Result, ThermostatError};
use async_trait::async_trait;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

const VALID_MARKER: &str = "YES";
const TEMPERATURE_MARKER: &str = "t=";
/// The retry delay doubles per attempt up to this multiple of the base delay.
const MAX_BACKOFF_FACTOR: u32 = 4;

/// Outcome of parsing one snapshot of the device report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Report {
    /// CRC not (yet) valid, the report has to be fetched again.
    NotReady,
    /// CRC valid; the temperature or the fault sentinel.
    Ready(f32),
}

/// Parse a raw report snapshot.
pub fn parse_report(text: &str) -> Report {
    let mut lines = text.lines();

    let valid = lines
        .next()
        .map(|line| line.trim_end().ends_with(VALID_MARKER))
        .unwrap_or(false);
    if !valid {
        return Report::NotReady;
    }

    let celsius = lines
        .next()
        .and_then(|line| {
            let pos = line.find(TEMPERATURE_MARKER)?;
            line[pos + TEMPERATURE_MARKER.len()..].trim().parse::<i64>().ok()
        })
        .map(|millis| millis as f32 / 1000.0)
        .unwrap_or(FAULT_SENTINEL_CELSIUS);

    Report::Ready(celsius)
}

/// DS18B20 sensor bound to one device report file.
pub struct Ds18b20 {
    path: PathBuf,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Ds18b20 {
    /// Create a sensor reading `path` with a bounded validity wait.
    pub fn new(path: impl Into<PathBuf>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            path: path.into(),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(
            config.device_path(),
            config.max_attempts,
            config.retry_delay(),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delay after failed `attempt` (1-based): base, 2x, 4x, then 4x again.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .min(MAX_BACKOFF_FACTOR);
        self.retry_delay * factor
    }
}

#[async_trait]
impl TemperatureSource for Ds18b20 {
    async fn read_celsius(&mut self) -> Result<f32> {
        for attempt in 1..=self.max_attempts {
            // Reopen on every attempt, a mid-write snapshot is never reused
            let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                ThermostatError::SensorFault(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

            match parse_report(&text) {
                Report::Ready(celsius) => {
                    if celsius == FAULT_SENTINEL_CELSIUS {
                        warn!(
                            "[Sensor] {} reported no temperature marker",
                            self.path.display()
                        );
                    }
                    return Ok(celsius);
                }
                Report::NotReady => {
                    debug!(
                        "[Sensor] {} not ready (attempt {}/{})",
                        self.path.display(),
                        attempt,
                        self.max_attempts
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(ThermostatError::SensorFault(format!(
            "{} never reported a valid checksum after {} attempts",
            self.path.display(),
            self.max_attempts
        )))
    }
}
