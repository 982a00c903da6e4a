use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Apply the `.env` file of the working directory, if there is one.
pub fn load_dotenv() {
    load_env_file(Path::new(".env"));
}

/// Copy `KEY=value` pairs from `path` into the process environment.
///
/// Variables that are already set keep their value. Must run before the
/// tokio runtime is built, while the process has a single thread.
pub fn load_env_file(path: &Path) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(key).is_none() {
            // SAFETY: callers run this before any other thread exists
            unsafe { std::env::set_var(key, value) };
        }
    }
}

/// Split one `.env` line, skipping blanks and `#` comments. A single pair of
/// matching quotes around the value is removed.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let value = value.trim();
    let unquoted = ['"', '\'']
        .into_iter()
        .find_map(|q| value.strip_prefix(q)?.strip_suffix(q));
    Some((key, unquoted.unwrap_or(value)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub sensor: SensorConfig,
    pub control: ControlConfig,
    pub defaults: DefaultsConfig,
    pub gpio: GpioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Namespace prefix for every thermostat topic (e.g. `serverraum/1`).
    pub base_topic: String,
    /// Upper bound for a single retained read or acknowledged publish.
    pub timeout_ms: u64,
}

impl MqttConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Directory holding one-wire devices, normally `/sys/bus/w1/devices`.
    pub base_dir: PathBuf,
    pub device_id: String,
    pub max_attempts: u32,
    pub retry_ms: u64,
}

impl SensorConfig {
    /// Full path of the device report file.
    pub fn device_path(&self) -> PathBuf {
        self.base_dir.join(&self.device_id).join("w1_slave")
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub interval_ms: u64,
    /// Consecutive sensor faults after which the fan is forced off.
    pub max_sensor_faults: u32,
    /// Consecutive store failures after which the loop gives up.
    pub max_store_failures: u32,
}

impl ControlConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub setpoint: f32,
    pub hysteresis: f32,
    pub fan_gpio: u8,
    /// Push the defaults to the store at startup, overwriting retained values.
    pub provision: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    /// Use a simulated output instead of the GPIO line.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                client_id: format!("fan-thermostat-{}", uuid::Uuid::new_v4().simple()),
                username: None,
                password: None,
                base_topic: "serverraum/1".to_string(),
                timeout_ms: 5000,
            },
            sensor: SensorConfig {
                base_dir: PathBuf::from("/sys/bus/w1/devices"),
                device_id: "28-000006dccb21".to_string(),
                max_attempts: 10,
                retry_ms: 200,
            },
            control: ControlConfig {
                interval_ms: 1000,
                max_sensor_faults: 5,
                max_store_failures: 10,
            },
            defaults: DefaultsConfig {
                setpoint: 20.0,
                hysteresis: 3.0,
                fan_gpio: 18,
                provision: true,
            },
            gpio: GpioConfig { dry_run: false },
        }
    }
}

/// Parse variable `name`, keeping `current` when it is unset or malformed.
fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, current: &mut T) {
    if let Some(raw) = lookup(name) {
        match raw.trim().parse() {
            Ok(v) => *current = v,
            Err(_) => warn!("Ignoring {}={:?}: not a valid value", name, raw),
        }
    }
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, name: &str, current: &mut String) {
    if let Some(value) = lookup(name) {
        *current = value;
    }
}

impl Config {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let lookup = &lookup;

        // MQTT configuration
        env_string(lookup, "MQTT_BROKER_HOST", &mut config.mqtt.broker_host);
        env_parse(lookup, "MQTT_BROKER_PORT", &mut config.mqtt.broker_port);
        env_string(lookup, "MQTT_CLIENT_ID", &mut config.mqtt.client_id);
        if let Some(username) = lookup("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        env_string(lookup, "MQTT_BASE_TOPIC", &mut config.mqtt.base_topic);
        env_parse(lookup, "MQTT_TIMEOUT_MS", &mut config.mqtt.timeout_ms);

        // One-wire sensor
        if let Some(dir) = lookup("W1_BASE_DIR") {
            config.sensor.base_dir = PathBuf::from(dir);
        }
        env_string(lookup, "W1_DEVICE_ID", &mut config.sensor.device_id);
        env_parse(lookup, "SENSOR_MAX_ATTEMPTS", &mut config.sensor.max_attempts);
        env_parse(lookup, "SENSOR_RETRY_MS", &mut config.sensor.retry_ms);

        // Control loop
        env_parse(lookup, "CONTROL_INTERVAL_MS", &mut config.control.interval_ms);
        env_parse(lookup, "MAX_SENSOR_FAULTS", &mut config.control.max_sensor_faults);
        env_parse(lookup, "MAX_STORE_FAILURES", &mut config.control.max_store_failures);

        // Startup provisioning
        env_parse(lookup, "DEFAULT_SETPOINT", &mut config.defaults.setpoint);
        env_parse(lookup, "DEFAULT_HYSTERESIS", &mut config.defaults.hysteresis);
        env_parse(lookup, "DEFAULT_FAN_GPIO", &mut config.defaults.fan_gpio);
        env_parse(lookup, "PROVISION_DEFAULTS", &mut config.defaults.provision);

        // Fan output
        env_parse(lookup, "FAN_DRY_RUN", &mut config.gpio.dry_run);

        // A single attempt would make any mid-write report fatal
        config.sensor.max_attempts = config.sensor.max_attempts.max(1);

        config
    }
}
