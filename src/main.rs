use clap::Parser;
use fan_thermostat::config::{Config, load_dotenv};
use fan_thermostat::control::{ControlLoop, Thresholds};
use fan_thermostat::device::{Fan, open_pin};
use fan_thermostat::error::{Result, ThermostatError};
use fan_thermostat::instance_lock::InstanceLock;
use fan_thermostat::sensors::Ds18b20;
use fan_thermostat::store::{MqttStore, ThermostatStore};
use log::{error, info, warn};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "fan-thermostat")]
#[command(about = "Two-point server-room fan controller")]
struct Cli {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER_HOST")]
    broker: Option<String>,

    /// Topic namespace for this room
    #[arg(long, env = "MQTT_BASE_TOPIC")]
    base_topic: Option<String>,

    /// One-wire device id of the DS18B20
    #[arg(long, env = "W1_DEVICE_ID")]
    sensor: Option<String>,

    /// Log fan changes instead of driving the GPIO line
    #[arg(long)]
    dry_run: bool,

    /// Keep the retained configuration instead of pushing defaults
    #[arg(long)]
    no_provision: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
            }
            _ = terminate => {}
        }

        info!("Received shutdown signal");
        token.cancel();
    });
}

async fn run(config: Config) -> Result<()> {
    let mqtt = MqttStore::connect(&config.mqtt).await?;
    let store = ThermostatStore::new(mqtt, config.mqtt.base_topic.clone());

    if config.defaults.provision {
        store.provision(&config.defaults).await?;
    }

    let channel = match store.get_fan_gpio().await {
        Ok(channel) => channel,
        Err(e @ ThermostatError::ConfigurationInvalid { .. }) => {
            warn!("{}, using GPIO {}", e, config.defaults.fan_gpio);
            config.defaults.fan_gpio
        }
        Err(e) => return Err(e),
    };

    let fan = Fan::new(open_pin(&config.gpio, channel)?)?;
    let sensor = Ds18b20::from_config(&config.sensor);
    info!("  Sensor: {}", sensor.path().display());

    let fallback = Thresholds::new(config.defaults.setpoint, config.defaults.hysteresis);
    let mut control = ControlLoop::new(store, sensor, fan, config.control.clone(), fallback);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let result = control.run(shutdown).await;
    control.into_store().into_inner().disconnect().await;
    result
}

fn main() -> ExitCode {
    // Environment first, before the runtime starts its worker threads
    load_dotenv();
    init_logger();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(broker) = cli.broker {
        config.mqtt.broker_host = broker;
    }
    if let Some(base_topic) = cli.base_topic {
        config.mqtt.base_topic = base_topic;
    }
    if let Some(sensor) = cli.sensor {
        config.sensor.device_id = sensor;
    }
    config.gpio.dry_run |= cli.dry_run;
    if cli.no_provision {
        config.defaults.provision = false;
    }

    info!("Starting fan thermostat");
    info!(
        "  Broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Base topic: {}", config.mqtt.base_topic);
    if config.gpio.dry_run {
        info!("  Dry run: GPIO output is simulated");
    }

    let _lock = match InstanceLock::acquire(&config.mqtt.base_topic) {
        Ok(lock) => lock,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => {
            info!("Fan thermostat stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fan thermostat failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
