//! Read and write thermostat values in the shared store.
//!
//! This is the dashboard side of the controller: operators change the
//! setpoint or band here and the running controller picks the new value up
//! on its next cycle.
//!
//! Usage:
//!   cargo run --bin thermostat-ctl -- show
//!   cargo run --bin thermostat-ctl -- get setpointtemp
//!   cargo run --bin thermostat-ctl -- set hyst 2.5

use clap::{Parser, Subcommand};
use fan_thermostat::config::{Config, load_dotenv};
use fan_thermostat::error::{Result, ThermostatError};
use fan_thermostat::store::{MqttStore, StoreKey, ThermostatStore};
use log::error;
use std::process::ExitCode;
use strum::IntoEnumIterator;

#[derive(Parser)]
#[command(name = "thermostat-ctl")]
#[command(about = "Inspect and change fan thermostat settings over MQTT")]
struct Cli {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER_HOST", default_value = "localhost")]
    broker: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_BROKER_PORT", default_value_t = 1883)]
    port: u16,

    /// Topic namespace of the room
    #[arg(long, env = "MQTT_BASE_TOPIC", default_value = "serverraum/1")]
    base_topic: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every retained value
    Show,
    /// Print one retained value
    Get {
        /// roomtemp, setpointtemp, hyst, gpiofan, fanstate or status
        key: StoreKey,
    },
    /// Validate and publish a retained configuration value
    Set {
        /// setpointtemp, hyst or gpiofan
        key: StoreKey,
        value: String,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    config.mqtt.broker_host = cli.broker;
    config.mqtt.broker_port = cli.port;
    config.mqtt.base_topic = cli.base_topic;

    let mqtt = MqttStore::connect(&config.mqtt).await?;
    let store = ThermostatStore::new(mqtt, config.mqtt.base_topic.clone());

    let result = match cli.command {
        Commands::Show => {
            for key in StoreKey::iter() {
                match store.get_raw(key).await {
                    Ok(value) => println!("{:<13} {}", key.name(), value),
                    Err(_) => println!("{:<13} -", key.name()),
                }
            }
            Ok(())
        }
        Commands::Get { key } => store.get_raw(key).await.map(|value| println!("{}", value)),
        Commands::Set { key, .. } if !StoreKey::CONFIGURATION.contains(&key) => {
            Err(ThermostatError::invalid_config(
                key.name(),
                "",
                "only setpointtemp, hyst and gpiofan can be set",
            ))
        }
        Commands::Set { key, value } => store.set_raw(key, &value).await.map(|()| {
            println!("{} = {}", store.topic(key), value.trim());
        }),
    };

    store.into_inner().disconnect().await;
    result
}

fn main() -> ExitCode {
    load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
