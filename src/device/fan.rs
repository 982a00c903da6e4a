//! Cooling fan actuator.

use super::gpio::OutputPin;
use crate::error::Result;
use log::info;

/// Fan driven by a binary output, remembering the last commanded state.
///
/// The remembered state is updated before the output is driven, so
/// [`Fan::current_state`] never reports a state that was not at least
/// attempted. A new fan is always switched off first.
pub struct Fan<P: OutputPin> {
    pin: P,
    state: bool,
}

impl<P: OutputPin> Fan<P> {
    /// Take ownership of `pin` and drive it off.
    pub fn new(pin: P) -> Result<Self> {
        let mut fan = Self { pin, state: false };
        fan.apply()?;
        info!("[Fan] Initialized on GPIO {} (off)", fan.pin.channel());
        Ok(fan)
    }

    pub fn set_on(&mut self) -> Result<()> {
        self.set(true)
    }

    pub fn set_off(&mut self) -> Result<()> {
        self.set(false)
    }

    /// Command the fan on or off. Repeating the current state is harmless.
    pub fn set(&mut self, on: bool) -> Result<()> {
        let changed = self.state != on;
        self.state = on;
        self.apply()?;
        if changed {
            info!("[Fan] {}", if on { "on" } else { "off" });
        }
        Ok(())
    }

    pub fn current_state(&self) -> bool {
        self.state
    }

    pub fn channel(&self) -> u8 {
        self.pin.channel()
    }

    fn apply(&mut self) -> Result<()> {
        self.pin.write(self.state)
    }
}
