//! Typed thermostat view over a [`SharedStore`].
//!
//! Values travel as text-encoded numbers. Configuration reads always go to
//! the store; nothing here caches a value between calls.

use super::{SharedStore, StoreKey};
use crate::config::DefaultsConfig;
use crate::control::Thresholds;
use crate::error::{Result, ThermostatError};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

/// Controller health as published on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    /// Running, no cycle completed yet.
    Starting,
    Ok,
    /// Device missing or never reported a valid checksum.
    SensorFault,
    /// Device answered but without a temperature value.
    NoReading,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: StatusState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ControllerStatus {
    pub fn new(state: StatusState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

pub struct ThermostatStore<S: SharedStore> {
    store: S,
    base_topic: String,
}

impl<S: SharedStore> ThermostatStore<S> {
    pub fn new(store: S, base_topic: impl Into<String>) -> Self {
        Self {
            store,
            base_topic: base_topic.into(),
        }
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    pub fn topic(&self, key: StoreKey) -> String {
        key.topic(&self.base_topic)
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Raw text value of `key`.
    pub async fn get_raw(&self, key: StoreKey) -> Result<String> {
        self.store.get(&self.topic(key)).await
    }

    /// Publish a raw text value for `key` after validating it.
    pub async fn set_raw(&self, key: StoreKey, value: &str) -> Result<()> {
        let value = value.trim();
        validate(key, value)?;
        self.store.set(&self.topic(key), value).await
    }

    pub async fn get_room_temp(&self) -> Result<f32> {
        let raw = self.get_raw(StoreKey::RoomTemp).await?;
        parse_temperature(StoreKey::RoomTemp, &raw)
    }

    /// Publish a sample, including the fault sentinel.
    pub async fn set_room_temp(&self, celsius: f32) -> Result<()> {
        self.store
            .set(&self.topic(StoreKey::RoomTemp), &celsius.to_string())
            .await
    }

    pub async fn get_setpoint(&self) -> Result<f32> {
        let raw = self.get_raw(StoreKey::SetpointTemp).await?;
        parse_temperature(StoreKey::SetpointTemp, &raw)
    }

    pub async fn set_setpoint(&self, celsius: f32) -> Result<()> {
        self.set_raw(StoreKey::SetpointTemp, &celsius.to_string())
            .await
    }

    pub async fn get_hysteresis(&self) -> Result<f32> {
        let raw = self.get_raw(StoreKey::Hysteresis).await?;
        parse_hysteresis(&raw)
    }

    pub async fn set_hysteresis(&self, width: f32) -> Result<()> {
        self.set_raw(StoreKey::Hysteresis, &width.to_string()).await
    }

    pub async fn get_fan_gpio(&self) -> Result<u8> {
        let raw = self.get_raw(StoreKey::GpioFan).await?;
        parse_gpio(&raw)
    }

    pub async fn set_fan_gpio(&self, channel: u8) -> Result<()> {
        self.set_raw(StoreKey::GpioFan, &channel.to_string()).await
    }

    /// Setpoint and hysteresis as read from the store right now.
    pub async fn get_thresholds(&self) -> Result<Thresholds> {
        let setpoint = self.get_setpoint().await?;
        let hysteresis = self.get_hysteresis().await?;
        Ok(Thresholds::new(setpoint, hysteresis))
    }

    pub async fn set_fan_state(&self, on: bool) -> Result<()> {
        self.store
            .set(&self.topic(StoreKey::FanState), if on { "1" } else { "0" })
            .await
    }

    pub async fn set_status(&self, status: &ControllerStatus) -> Result<()> {
        let payload = serde_json::to_string(status)?;
        self.store.set(&self.topic(StoreKey::Status), &payload).await
    }

    /// Push the startup defaults for setpoint, hysteresis and fan channel.
    pub async fn provision(&self, defaults: &DefaultsConfig) -> Result<()> {
        self.set_setpoint(defaults.setpoint).await?;
        self.set_hysteresis(defaults.hysteresis).await?;
        self.set_fan_gpio(defaults.fan_gpio).await?;
        info!(
            "Provisioned {}: setpoint={}°C hysteresis={}°C gpio={}",
            self.base_topic, defaults.setpoint, defaults.hysteresis, defaults.fan_gpio
        );
        Ok(())
    }
}

fn parse_temperature(key: StoreKey, raw: &str) -> Result<f32> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|_| ThermostatError::invalid_config(key.name(), raw, "not a number"))?;
    if !value.is_finite() {
        return Err(ThermostatError::invalid_config(
            key.name(),
            raw,
            "not a finite number",
        ));
    }
    Ok(value)
}

/// Negative widths are rejected rather than clamped.
fn parse_hysteresis(raw: &str) -> Result<f32> {
    let value = parse_temperature(StoreKey::Hysteresis, raw)?;
    if value < 0.0 {
        return Err(ThermostatError::invalid_config(
            StoreKey::Hysteresis.name(),
            raw,
            "hysteresis must not be negative",
        ));
    }
    Ok(value)
}

fn parse_gpio(raw: &str) -> Result<u8> {
    raw.trim().parse().map_err(|_| {
        ThermostatError::invalid_config(StoreKey::GpioFan.name(), raw, "not a GPIO number")
    })
}

/// Check a value before it is written for `key`.
pub fn validate(key: StoreKey, value: &str) -> Result<()> {
    match key {
        StoreKey::RoomTemp | StoreKey::SetpointTemp => parse_temperature(key, value).map(|_| ()),
        StoreKey::Hysteresis => parse_hysteresis(value).map(|_| ()),
        StoreKey::GpioFan => parse_gpio(value).map(|_| ()),
        StoreKey::FanState => match value {
            "0" | "1" => Ok(()),
            _ => Err(ThermostatError::invalid_config(
                key.name(),
                value,
                "expected 0 or 1",
            )),
        },
        StoreKey::Status => serde_json::from_str::<ControllerStatus>(value)
            .map(|_| ())
            .map_err(|e| ThermostatError::invalid_config(key.name(), value, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::FAULT_SENTINEL_CELSIUS;
    use crate::store::MemoryStore;
    use tokio_test::{assert_err, assert_ok};

    fn store() -> ThermostatStore<MemoryStore> {
        ThermostatStore::new(MemoryStore::default(), "serverraum/1")
    }

    #[tokio::test]
    async fn test_round_trip_each_quantity() {
        let s = store();
        s.set_room_temp(23.312).await.unwrap();
        s.set_setpoint(20.0).await.unwrap();
        s.set_hysteresis(3.0).await.unwrap();
        s.set_fan_gpio(18).await.unwrap();

        assert_eq!(s.get_room_temp().await.unwrap(), 23.312);
        assert_eq!(s.get_setpoint().await.unwrap(), 20.0);
        assert_eq!(s.get_hysteresis().await.unwrap(), 3.0);
        assert_eq!(s.get_fan_gpio().await.unwrap(), 18);
    }

    #[tokio::test]
    async fn test_values_are_text_encoded() {
        let s = store();
        s.set_setpoint(20.0).await.unwrap();
        s.set_room_temp(FAULT_SENTINEL_CELSIUS).await.unwrap();
        assert_eq!(
            s.inner().peek("serverraum/1/setpointtemp").as_deref(),
            Some("20")
        );
        assert_eq!(
            s.inner().peek("serverraum/1/roomtemp").as_deref(),
            Some("255")
        );
    }

    #[tokio::test]
    async fn test_reads_values_written_by_other_writers() {
        let s = store();
        // Integer and float encodings as a dashboard might write them
        s.inner().set("serverraum/1/setpointtemp", "21").await.unwrap();
        s.inner().set("serverraum/1/hyst", " 2.5\n").await.unwrap();
        let t = s.get_thresholds().await.unwrap();
        assert_eq!(t.low(), 21.0);
        assert_eq!(t.high(), 23.5);
    }

    #[tokio::test]
    async fn test_non_numeric_setpoint_is_invalid() {
        let s = store();
        s.inner().set("serverraum/1/setpointtemp", "warm").await.unwrap();
        let err = assert_err!(s.get_setpoint().await);
        assert!(matches!(err, ThermostatError::ConfigurationInvalid { .. }));
    }

    #[tokio::test]
    async fn test_negative_hysteresis_is_rejected() {
        let s = store();
        s.inner().set("serverraum/1/hyst", "-1").await.unwrap();
        let err = assert_err!(s.get_hysteresis().await);
        assert!(matches!(err, ThermostatError::ConfigurationInvalid { .. }));

        // Writes go through the same check
        assert_err!(s.set_hysteresis(-0.5).await);
        assert_err!(s.set_raw(StoreKey::SetpointTemp, "NaN").await);
        assert_ok!(s.set_hysteresis(0.0).await);
    }

    #[tokio::test]
    async fn test_gpio_out_of_range_is_invalid() {
        let s = store();
        s.inner().set("serverraum/1/gpiofan", "300").await.unwrap();
        assert_err!(s.get_fan_gpio().await);
    }

    #[tokio::test]
    async fn test_provision_defaults() {
        let s = store();
        let defaults = crate::config::Config::default().defaults;
        s.provision(&defaults).await.unwrap();
        assert_eq!(s.get_fan_gpio().await.unwrap(), 18);
        assert_eq!(s.get_thresholds().await.unwrap(), Thresholds::new(20.0, 3.0));
    }

    #[tokio::test]
    async fn test_status_is_json() {
        let s = store();
        let status = ControllerStatus::new(StatusState::SensorFault, "device missing");
        s.set_status(&status).await.unwrap();

        let raw = s.get_raw(StoreKey::Status).await.unwrap();
        assert!(raw.contains("\"state\":\"sensor_fault\""));
        assert_ok!(validate(StoreKey::Status, &raw));
        let parsed: ControllerStatus = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn test_validate_fan_state() {
        assert_ok!(validate(StoreKey::FanState, "1"));
        assert_err!(validate(StoreKey::FanState, "on"));
    }
}
