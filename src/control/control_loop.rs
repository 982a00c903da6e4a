//! Cyclic orchestration of sensor, store, decision and fan.
//!
//! One cycle:
//! 1. read the sensor (a fault becomes the sentinel value)
//! 2. publish the sample, valid or not
//! 3. re-read setpoint and hysteresis from the store
//! 4. decide with the fan's current state as the previous output
//! 5. apply the decision and publish fan state and status
//!
//! Cycles run strictly one after another on a single task.

use super::hysteresis::Thresholds;
use crate::config::ControlConfig;
use crate::device::{Fan, OutputPin};
use crate::error::{Result, ThermostatError};
use crate::sensors::{FAULT_SENTINEL_CELSIUS, TemperatureSource, is_actionable};
use crate::store::{ControllerStatus, SharedStore, StatusState, ThermostatStore};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What a completed cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// The fan was commanded from a valid reading.
    Applied {
        celsius: f32,
        thresholds: Thresholds,
        fan_on: bool,
    },
    /// No usable reading; the fan was held, or forced off after too many
    /// consecutive faults.
    Skipped { status: StatusState, fan_on: bool },
}

impl CycleOutcome {
    pub fn fan_on(&self) -> bool {
        match self {
            CycleOutcome::Applied { fan_on, .. } | CycleOutcome::Skipped { fan_on, .. } => *fan_on,
        }
    }
}

pub struct ControlLoop<S, T, P>
where
    S: SharedStore,
    T: TemperatureSource,
    P: OutputPin,
{
    store: ThermostatStore<S>,
    sensor: T,
    fan: Fan<P>,
    config: ControlConfig,
    /// Fallback for configuration values that fail validation.
    last_good: Thresholds,
    sensor_faults: u32,
    store_failures: u32,
}

impl<S, T, P> ControlLoop<S, T, P>
where
    S: SharedStore,
    T: TemperatureSource,
    P: OutputPin,
{
    /// `fallback` seeds the last-known-good thresholds, normally the
    /// provisioned defaults.
    pub fn new(
        store: ThermostatStore<S>,
        sensor: T,
        fan: Fan<P>,
        config: ControlConfig,
        fallback: Thresholds,
    ) -> Self {
        Self {
            store,
            sensor,
            fan,
            config,
            last_good: fallback,
            sensor_faults: 0,
            store_failures: 0,
        }
    }

    pub fn store(&self) -> &ThermostatStore<S> {
        &self.store
    }

    pub fn fan(&self) -> &Fan<P> {
        &self.fan
    }

    pub fn last_good_thresholds(&self) -> Thresholds {
        self.last_good
    }

    pub fn into_store(self) -> ThermostatStore<S> {
        self.store
    }

    /// Run one control cycle.
    ///
    /// Sensor faults and invalid configuration are handled inside the cycle.
    /// Store and actuator failures are returned to the caller.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let (celsius, fault) = match self.sensor.read_celsius().await {
            Ok(celsius) if is_actionable(celsius) => (celsius, None),
            Ok(_) => (
                FAULT_SENTINEL_CELSIUS,
                Some((StatusState::NoReading, "sensor returned no temperature".to_string())),
            ),
            Err(e) => {
                warn!("[Control] {}", e);
                (
                    FAULT_SENTINEL_CELSIUS,
                    Some((StatusState::SensorFault, e.to_string())),
                )
            }
        };

        self.store.set_room_temp(celsius).await?;

        if let Some((status, detail)) = fault {
            return self.skip_cycle(status, detail).await;
        }
        self.sensor_faults = 0;

        let thresholds = self.read_thresholds().await?;
        let fan_on = thresholds.decide(celsius, self.fan.current_state());
        self.fan.set(fan_on)?;

        debug!(
            "[Control] {:.3}°C band {}..{} -> fan {}",
            celsius,
            thresholds.low(),
            thresholds.high(),
            if fan_on { "on" } else { "off" }
        );

        self.store.set_fan_state(fan_on).await?;
        self.store
            .set_status(&ControllerStatus::new(
                StatusState::Ok,
                format!("{:.3}°C", celsius),
            ))
            .await?;

        Ok(CycleOutcome::Applied {
            celsius,
            thresholds,
            fan_on,
        })
    }

    async fn skip_cycle(&mut self, status: StatusState, detail: String) -> Result<CycleOutcome> {
        self.sensor_faults = self.sensor_faults.saturating_add(1);

        if self.config.max_sensor_faults > 0
            && self.sensor_faults >= self.config.max_sensor_faults
            && self.fan.current_state()
        {
            error!(
                "[Control] {} consecutive sensor faults, switching fan off",
                self.sensor_faults
            );
            self.fan.set_off()?;
        }

        let fan_on = self.fan.current_state();
        self.store.set_fan_state(fan_on).await?;
        self.store
            .set_status(&ControllerStatus::new(status, detail))
            .await?;

        Ok(CycleOutcome::Skipped { status, fan_on })
    }

    /// Current thresholds from the store, falling back per value to the last
    /// known good one when the stored text is invalid.
    async fn read_thresholds(&mut self) -> Result<Thresholds> {
        let mut thresholds = self.last_good;

        match self.store.get_setpoint().await {
            Ok(setpoint) => thresholds.set_setpoint(setpoint),
            Err(e @ ThermostatError::ConfigurationInvalid { .. }) => {
                warn!("[Control] {}, keeping setpoint {}", e, thresholds.setpoint());
            }
            Err(e) => return Err(e),
        }

        match self.store.get_hysteresis().await {
            Ok(hysteresis) => thresholds.set_hysteresis(hysteresis),
            Err(e @ ThermostatError::ConfigurationInvalid { .. }) => {
                warn!(
                    "[Control] {}, keeping hysteresis {}",
                    e,
                    thresholds.hysteresis()
                );
            }
            Err(e) => return Err(e),
        }

        if thresholds != self.last_good {
            info!(
                "[Control] Band now {}..{}°C",
                thresholds.low(),
                thresholds.high()
            );
        }
        self.last_good = thresholds;
        Ok(thresholds)
    }

    /// Run cycles until `shutdown` is cancelled, then switch the fan off.
    ///
    /// Returns an error when the store stays unavailable for
    /// `max_store_failures` consecutive cycles or the fan cannot be driven;
    /// the fan is switched off first in both cases.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "[Control] Running on {} every {:?}",
            self.store.base_topic(),
            self.config.interval()
        );
        if let Err(e) = self
            .store
            .set_status(&ControllerStatus::new(StatusState::Starting, ""))
            .await
        {
            warn!("[Control] Failed to publish startup status: {}", e);
        }

        let period = self.config.interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.run_cycle() => result,
            };

            match result {
                Ok(_) => self.store_failures = 0,
                Err(e @ ThermostatError::StoreUnavailable(_)) => {
                    self.store_failures = self.store_failures.saturating_add(1);
                    warn!(
                        "[Control] Cycle failed ({} in a row): {}",
                        self.store_failures, e
                    );
                    if self.config.max_store_failures > 0
                        && self.store_failures >= self.config.max_store_failures
                    {
                        error!("[Control] Store unavailable too long, giving up");
                        self.switch_off();
                        return Err(e);
                    }
                }
                Err(e) => {
                    error!("[Control] Fatal cycle error: {}", e);
                    self.switch_off();
                    return Err(e);
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    fn switch_off(&mut self) {
        if let Err(e) = self.fan.set_off() {
            error!("[Control] Failed to switch fan off: {}", e);
        }
    }

    /// Fan off, then a best-effort final report.
    async fn stop(&mut self) {
        info!("[Control] Shutting down, switching fan off");
        self.switch_off();

        if let Err(e) = self.store.set_fan_state(false).await {
            warn!("[Control] Failed to publish final fan state: {}", e);
        }
        if let Err(e) = self
            .store
            .set_status(&ControllerStatus::new(StatusState::Stopped, ""))
            .await
        {
            warn!("[Control] Failed to publish final status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PinProbe, SimulatedPin};
    use crate::sensors::Ds18b20;
    use crate::store::{MemoryStore, StoreKey};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio_test::{assert_err, assert_ok};

    const BASE: &str = "serverraum/1";

    /// Replays a fixed list of sensor results, faulting once exhausted.
    struct ScriptedSensor {
        readings: VecDeque<Result<f32>>,
    }

    impl ScriptedSensor {
        fn new(readings: impl IntoIterator<Item = Result<f32>>) -> Self {
            Self {
                readings: readings.into_iter().collect(),
            }
        }

        fn celsius(values: &[f32]) -> Self {
            Self::new(values.iter().map(|v| Ok(*v)))
        }
    }

    #[async_trait]
    impl TemperatureSource for ScriptedSensor {
        async fn read_celsius(&mut self) -> Result<f32> {
            self.readings.pop_front().unwrap_or_else(|| {
                Err(ThermostatError::SensorFault("script exhausted".into()))
            })
        }
    }

    fn control_config() -> ControlConfig {
        ControlConfig {
            interval_ms: 1,
            max_sensor_faults: 3,
            max_store_failures: 3,
        }
    }

    async fn provisioned_store(setpoint: f32, hysteresis: f32) -> ThermostatStore<MemoryStore> {
        let store = ThermostatStore::new(MemoryStore::new(Duration::from_millis(50)), BASE);
        store.set_setpoint(setpoint).await.unwrap();
        store.set_hysteresis(hysteresis).await.unwrap();
        store.set_fan_gpio(18).await.unwrap();
        store
    }

    async fn build<T: TemperatureSource>(
        sensor: T,
    ) -> (ControlLoop<MemoryStore, T, SimulatedPin>, PinProbe) {
        let store = provisioned_store(20.0, 3.0).await;
        let pin = SimulatedPin::new(18);
        let probe = pin.probe();
        let fan = Fan::new(pin).unwrap();
        let control = ControlLoop::new(
            store,
            sensor,
            fan,
            control_config(),
            Thresholds::new(20.0, 3.0),
        );
        (control, probe)
    }

    fn peek<T: TemperatureSource>(
        control: &ControlLoop<MemoryStore, T, SimulatedPin>,
        key: StoreKey,
    ) -> String {
        control
            .store()
            .inner()
            .peek(&key.topic(BASE))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_band_scenario_drives_fan() {
        let (mut control, probe) =
            build(ScriptedSensor::celsius(&[18.0, 21.0, 24.0, 22.0, 19.0])).await;

        let mut states = Vec::new();
        for _ in 0..5 {
            let outcome = control.run_cycle().await.unwrap();
            assert_eq!(outcome.fan_on(), probe.level());
            states.push(control.fan().current_state());
        }

        assert_eq!(states, vec![false, false, true, true, false]);
        assert_eq!(peek(&control, StoreKey::RoomTemp), "19");
        assert_eq!(peek(&control, StoreKey::FanState), "0");
    }

    #[tokio::test]
    async fn test_boundary_reading_keeps_fan_off() {
        let (mut control, probe) = build(ScriptedSensor::celsius(&[20.0])).await;
        let outcome = control.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                celsius: 20.0,
                thresholds: Thresholds::new(20.0, 3.0),
                fan_on: false,
            }
        );
        assert!(!probe.level());
    }

    #[tokio::test]
    async fn test_sensor_fault_holds_fan_and_publishes_sentinel() {
        let (mut control, probe) = build(ScriptedSensor::new([
            Ok(24.0),
            Err(ThermostatError::SensorFault("no YES".into())),
        ]))
        .await;

        assert!(control.run_cycle().await.unwrap().fan_on());
        let outcome = control.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Skipped {
                status: StatusState::SensorFault,
                fan_on: true,
            }
        );
        assert!(probe.level());
        assert_eq!(peek(&control, StoreKey::RoomTemp), "255");
        assert!(peek(&control, StoreKey::Status).contains("sensor_fault"));
    }

    #[tokio::test]
    async fn test_sentinel_reading_is_not_acted_on() {
        let (mut control, _probe) =
            build(ScriptedSensor::celsius(&[FAULT_SENTINEL_CELSIUS])).await;
        let outcome = control.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Skipped {
                status: StatusState::NoReading,
                fan_on: false,
            }
        );
        assert!(peek(&control, StoreKey::Status).contains("no_reading"));
    }

    #[tokio::test]
    async fn test_repeated_sensor_faults_force_fan_off() {
        // One good hot reading, then the script runs dry
        let (mut control, probe) = build(ScriptedSensor::celsius(&[30.0])).await;
        control.run_cycle().await.unwrap();
        assert!(probe.level());

        control.run_cycle().await.unwrap();
        control.run_cycle().await.unwrap();
        assert!(probe.level());

        let outcome = control.run_cycle().await.unwrap();
        assert!(!outcome.fan_on());
        assert!(!probe.level());
    }

    #[tokio::test]
    async fn test_never_ready_device_leaves_fan_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w1_slave");
        std::fs::write(&path, "aa : crc=aa NO\naa t=30000\n").unwrap();
        let sensor = Ds18b20::new(&path, 3, Duration::from_millis(1));

        let (mut control, probe) = build(sensor).await;
        let writes_before = probe.write_count();

        let outcome = control.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Skipped {
                status: StatusState::SensorFault,
                fan_on: false,
            }
        );
        assert_eq!(probe.write_count(), writes_before);
    }

    #[tokio::test]
    async fn test_reconfiguration_is_picked_up_next_cycle() {
        let (mut control, probe) = build(ScriptedSensor::celsius(&[22.0, 22.0])).await;
        control.run_cycle().await.unwrap();
        assert!(!probe.level());

        // A dashboard lowers the setpoint
        control.store().set_setpoint(18.0).await.unwrap();
        control.store().set_hysteresis(2.0).await.unwrap();

        let outcome = control.run_cycle().await.unwrap();
        assert!(outcome.fan_on());
        assert_eq!(control.last_good_thresholds(), Thresholds::new(18.0, 2.0));
    }

    #[tokio::test]
    async fn test_invalid_configuration_falls_back_to_last_good() {
        let (mut control, probe) = build(ScriptedSensor::celsius(&[21.0, 24.0])).await;
        control.run_cycle().await.unwrap();

        let store = control.store().inner();
        store.set(&StoreKey::SetpointTemp.topic(BASE), "abc").await.unwrap();
        store.set(&StoreKey::Hysteresis.topic(BASE), "-4").await.unwrap();

        let outcome = control.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                celsius: 24.0,
                thresholds: Thresholds::new(20.0, 3.0),
                fan_on: true,
            }
        );
        assert!(probe.level());
    }

    #[tokio::test]
    async fn test_store_outage_fails_cycle_without_touching_fan() {
        let (mut control, probe) = build(ScriptedSensor::celsius(&[30.0, 30.0])).await;
        control.run_cycle().await.unwrap();
        assert!(probe.level());

        control.store().inner().set_available(false);
        let err = assert_err!(control.run_cycle().await);
        assert!(matches!(err, ThermostatError::StoreUnavailable(_)));
        assert!(probe.level());
    }

    #[tokio::test]
    async fn test_persistent_store_outage_is_fatal_and_fail_safe() {
        let (mut control, probe) = build(ScriptedSensor::celsius(&[30.0; 8])).await;
        control.run_cycle().await.unwrap();
        assert!(probe.level());

        control.store().inner().set_available(false);
        let err = assert_err!(control.run(CancellationToken::new()).await);
        assert!(matches!(err, ThermostatError::StoreUnavailable(_)));
        assert!(!probe.level());
        assert!(!control.fan().current_state());
    }

    #[tokio::test]
    async fn test_shutdown_switches_fan_off() {
        let (mut control, probe) = build(ScriptedSensor::celsius(&[30.0])).await;
        control.run_cycle().await.unwrap();
        assert!(probe.level());

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_ok!(control.run(shutdown).await);

        assert!(!probe.level());
        assert_eq!(peek(&control, StoreKey::FanState), "0");
        assert!(peek(&control, StoreKey::Status).contains("stopped"));
    }
}
