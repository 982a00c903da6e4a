//! Temperature control: the two-point decision and the loop that drives it.

pub mod control_loop;
pub mod hysteresis;

pub use control_loop::{ControlLoop, CycleOutcome};
pub use hysteresis::{Thresholds, decide};
