//! Binary digital outputs.
//!
//! [`RppalPin`] drives a BCM GPIO line through `rppal` and is only built with
//! the `hardware` feature. [`SimulatedPin`] keeps the level in memory for dry
//! runs, tests and builds without hardware support.

#[cfg(feature = "hardware")]
use crate::error::ThermostatError;
use crate::error::Result;
use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A single binary output addressed by a numeric channel.
pub trait OutputPin: Send {
    /// Drive the output to logical 1 (`true`) or 0 (`false`).
    fn write(&mut self, high: bool) -> Result<()>;

    /// Channel identifier (BCM GPIO number).
    fn channel(&self) -> u8;
}

/// GPIO output on a Raspberry Pi, addressed by BCM number.
#[cfg(feature = "hardware")]
pub struct RppalPin {
    channel: u8,
    pin: rppal::gpio::OutputPin,
}

#[cfg(feature = "hardware")]
impl RppalPin {
    /// Claim `channel` as an output, starting low.
    pub fn open(channel: u8) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| {
            ThermostatError::Actuator(format!("failed to open GPIO controller: {}", e))
        })?;
        let pin = gpio
            .get(channel)
            .map_err(|e| {
                ThermostatError::Actuator(format!("failed to claim GPIO {}: {}", channel, e))
            })?
            .into_output_low();
        info!("[Fan] Using GPIO {} (rppal)", channel);
        Ok(Self { channel, pin })
    }
}

#[cfg(feature = "hardware")]
impl OutputPin for RppalPin {
    fn write(&mut self, high: bool) -> Result<()> {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.channel
    }
}

/// In-memory output used when no hardware is attached.
///
/// The level is shared with any [`PinProbe`] handed out, so tests and dry
/// runs can observe what would have been driven.
pub struct SimulatedPin {
    channel: u8,
    level: Arc<AtomicBool>,
    writes: Arc<AtomicU32>,
}

/// Read-only view of a [`SimulatedPin`].
#[derive(Clone)]
pub struct PinProbe {
    level: Arc<AtomicBool>,
    writes: Arc<AtomicU32>,
}

impl SimulatedPin {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            level: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn probe(&self) -> PinProbe {
        PinProbe {
            level: self.level.clone(),
            writes: self.writes.clone(),
        }
    }
}

impl OutputPin for SimulatedPin {
    fn write(&mut self, high: bool) -> Result<()> {
        let old = self.level.swap(high, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
        if old != high {
            info!(
                "[Fan] (simulated) GPIO {} -> {}",
                self.channel,
                if high { 1 } else { 0 }
            );
        }
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.channel
    }
}

impl PinProbe {
    /// Last level written to the pin.
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Number of writes, including repeats of the same level.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}
