use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum ThermostatError {
    #[error("Sensor fault: {0}")]
    SensorFault(String),

    #[error("Shared store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid configuration value {value:?} for {key}: {reason}")]
    ConfigurationInvalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Actuator output failed: {0}")]
    Actuator(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

impl ThermostatError {
    /// Build a `ConfigurationInvalid` error for a raw store value.
    pub fn invalid_config(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ThermostatError::ConfigurationInvalid {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ThermostatError>;
