//! Two-point (hysteresis) decision logic.
//!
//! The controller output switches between exactly two states. Between the
//! lower threshold (setpoint) and the upper threshold (setpoint + hysteresis)
//! the output keeps its previous value, which prevents the fan from chattering
//! when the room temperature hovers around the setpoint.

use serde::{Deserialize, Serialize};

/// Lower threshold and band width of the controller.
///
/// The upper threshold is always derived from the two stored inputs, so it can
/// never go stale when either of them changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    setpoint: f32,
    hysteresis: f32,
}

impl Thresholds {
    pub fn new(setpoint: f32, hysteresis: f32) -> Self {
        Self {
            setpoint,
            hysteresis,
        }
    }

    /// Lower threshold: at or below this temperature cooling is off.
    pub fn low(&self) -> f32 {
        self.setpoint
    }

    /// Upper threshold: above this temperature cooling is on.
    pub fn high(&self) -> f32 {
        self.setpoint + self.hysteresis
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    pub fn hysteresis(&self) -> f32 {
        self.hysteresis
    }

    pub fn set_setpoint(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn set_hysteresis(&mut self, hysteresis: f32) {
        self.hysteresis = hysteresis;
    }

    /// Decide the fan demand for `reading` given the previous output.
    pub fn decide(&self, reading: f32, previous_output: bool) -> bool {
        decide(reading, self.low(), self.high(), previous_output)
    }
}

/// Two-point decision.
///
/// - `reading <= low`: off
/// - `reading > high`: on
/// - otherwise the previous output is held
///
/// With `high <= low` (zero or negative band width) there is no hold band left
/// and this is a plain comparator at `low`.
pub fn decide(reading: f32, low: f32, high: f32, previous_output: bool) -> bool {
    if reading <= low {
        false
    } else if reading > high {
        true
    } else {
        previous_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: f32 = 20.0;
    const HIGH: f32 = 23.0;

    #[test]
    fn test_at_or_below_low_is_off() {
        for reading in [-10.0, 0.0, 19.9, 20.0] {
            assert!(!decide(reading, LOW, HIGH, true));
            assert!(!decide(reading, LOW, HIGH, false));
        }
    }

    #[test]
    fn test_above_high_is_on() {
        for reading in [23.01, 24.0, 40.0, 100.0] {
            assert!(decide(reading, LOW, HIGH, true));
            assert!(decide(reading, LOW, HIGH, false));
        }
    }

    #[test]
    fn test_band_holds_previous_output() {
        for reading in [20.01, 21.0, 22.5, 23.0] {
            assert!(decide(reading, LOW, HIGH, true));
            assert!(!decide(reading, LOW, HIGH, false));
        }
    }

    #[test]
    fn test_high_follows_every_update() {
        let mut t = Thresholds::new(20.0, 3.0);
        assert_eq!(t.high(), 23.0);

        t.set_setpoint(18.5);
        assert_eq!(t.low(), 18.5);
        assert_eq!(t.high(), 21.5);

        t.set_hysteresis(1.0);
        assert_eq!(t.high(), 19.5);

        t.set_hysteresis(0.0);
        assert_eq!(t.high(), t.low());
    }

    #[test]
    fn test_zero_width_is_plain_comparator() {
        let t = Thresholds::new(20.0, 0.0);
        assert!(!t.decide(20.0, true));
        assert!(t.decide(20.1, false));
    }

    #[test]
    fn test_negative_width_has_no_hold_band() {
        let t = Thresholds::new(20.0, -2.0);
        // Readings between high and low are still at or below low
        assert!(!t.decide(19.0, true));
        assert!(t.decide(20.5, false));
    }

    #[test]
    fn test_scenario_sequence() {
        let t = Thresholds::new(20.0, 3.0);
        let mut state = false;
        let mut states = Vec::new();
        for reading in [18.0, 21.0, 24.0, 22.0, 19.0] {
            state = t.decide(reading, state);
            states.push(state);
        }
        assert_eq!(states, vec![false, false, true, true, false]);
    }
}
