//! Temperature acquisition.
//!
//! A [`TemperatureSource`] produces one validated Celsius sample per call.
//! Malformed but checksum-valid device output is reported as the
//! [`FAULT_SENTINEL_CELSIUS`] value instead of an error, so telemetry
//! consumers still see that a read was attempted.

pub mod ds18b20;

pub use ds18b20::Ds18b20;

use crate::error::Result;
use async_trait::async_trait;

/// Reserved out-of-range temperature meaning "no valid reading".
pub const FAULT_SENTINEL_CELSIUS: f32 = 255.0;

/// Whether `celsius` is a real measurement the controller may act on.
pub fn is_actionable(celsius: f32) -> bool {
    celsius.is_finite() && celsius != FAULT_SENTINEL_CELSIUS
}

#[async_trait]
pub trait TemperatureSource: Send {
    /// Read one sample in degrees Celsius.
    ///
    /// Returns `SensorFault` when the device cannot be read or never reports a
    /// valid checksum within the retry bound.
    async fn read_celsius(&mut self) -> Result<f32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_not_actionable() {
        assert!(!is_actionable(FAULT_SENTINEL_CELSIUS));
        assert!(!is_actionable(f32::NAN));
        assert!(is_actionable(23.312));
        assert!(is_actionable(-5.0));
    }
}
