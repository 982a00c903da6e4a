//! Physical outputs: the cooling fan and the GPIO lines behind it.

pub mod fan;
pub mod gpio;

pub use fan::Fan;
#[cfg(feature = "hardware")]
pub use gpio::RppalPin;
pub use gpio::{OutputPin, PinProbe, SimulatedPin};

use crate::config::GpioConfig;
use crate::error::Result;
#[cfg(not(feature = "hardware"))]
use log::warn;

/// Open the output for `channel`.
///
/// Dry runs always get a [`SimulatedPin`]. Without the `hardware` feature
/// there is no real output to drive, so the simulated one is used as well.
pub fn open_pin(config: &GpioConfig, channel: u8) -> Result<Box<dyn OutputPin>> {
    if config.dry_run {
        return Ok(Box::new(SimulatedPin::new(channel)));
    }

    #[cfg(feature = "hardware")]
    {
        Ok(Box::new(RppalPin::open(channel)?))
    }

    #[cfg(not(feature = "hardware"))]
    {
        warn!(
            "[Fan] Built without the `hardware` feature, GPIO {} is simulated",
            channel
        );
        Ok(Box::new(SimulatedPin::new(channel)))
    }
}

impl OutputPin for Box<dyn OutputPin> {
    fn write(&mut self, high: bool) -> Result<()> {
        (**self).write(high)
    }

    fn channel(&self) -> u8 {
        (**self).channel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_opens_simulated_pin() {
        let config = GpioConfig { dry_run: true };
        let mut pin = open_pin(&config, 18).unwrap();
        assert_eq!(pin.channel(), 18);
        pin.write(true).unwrap();
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn test_without_hardware_feature_falls_back_to_simulated_pin() {
        let config = GpioConfig { dry_run: false };
        let mut pin = open_pin(&config, 23).unwrap();
        assert_eq!(pin.channel(), 23);
        pin.write(false).unwrap();
    }
}
