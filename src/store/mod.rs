//! Shared retained key/value store.
//!
//! The store is the single owner of record for the thermostat configuration
//! and the sink for its telemetry. Every reader, including one that connects
//! after a write, observes the most recently published value of a topic.

pub mod memory;
pub mod mqtt;
pub mod thermostat;

pub use memory::MemoryStore;
pub use mqtt::MqttStore;
pub use thermostat::{ControllerStatus, StatusState, ThermostatStore};

use crate::error::Result;
use async_trait::async_trait;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Retained-last-value read/write capability.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Wait for the retained (or next published) value of `topic`.
    ///
    /// Fails with `StoreUnavailable` on transport failure or when no value
    /// arrives within the store's timeout.
    async fn get(&self, topic: &str) -> Result<String>;

    /// Publish `value` on `topic` with the retain flag set.
    ///
    /// Returns only once the transport has confirmed the publish.
    async fn set(&self, topic: &str, value: &str) -> Result<()>;
}

/// Logical quantities exchanged through the store, named by topic suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
pub enum StoreKey {
    #[strum(serialize = "roomtemp")]
    RoomTemp,
    #[strum(serialize = "setpointtemp")]
    SetpointTemp,
    #[strum(serialize = "hyst")]
    Hysteresis,
    #[strum(serialize = "gpiofan")]
    GpioFan,
    #[strum(serialize = "fanstate")]
    FanState,
    #[strum(serialize = "status")]
    Status,
}

impl StoreKey {
    /// Keys written by operators or dashboards rather than by the controller.
    pub const CONFIGURATION: [StoreKey; 3] =
        [StoreKey::SetpointTemp, StoreKey::Hysteresis, StoreKey::GpioFan];

    /// Topic suffix, e.g. `roomtemp`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Full topic under `base_topic`, e.g. `serverraum/1/roomtemp`.
    pub fn topic(&self, base_topic: &str) -> String {
        format!("{}/{}", base_topic.trim_end_matches('/'), self.name())
    }
}
