//! Two-point (hysteresis) fan thermostat.
//!
//! Reads a DS18B20 one-wire sensor, switches a cooling fan on a GPIO line and
//! keeps its configuration and telemetry in retained MQTT topics shared with
//! dashboards and other processes.

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod instance_lock;
pub mod sensors;
pub mod store;
