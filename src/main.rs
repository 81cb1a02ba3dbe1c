use std::path::PathBuf;

use anyhow::Context as _;
use btleplug::platform::Manager;
use clap::Parser;
use log::{LevelFilter, info, warn};

mod beacon;
mod config;
mod error;
mod manager;
mod messages;
mod mqtt;
mod presence;
mod scanner;
mod tlv;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Drives a presence sensor from nearby Apple BLE advertisements.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Ignore beacons below this signal strength, in dBm
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<i32>,

    /// Switch-off delay after the last beacon, in seconds
    #[arg(long, allow_negative_numbers = true)]
    timeout: Option<i64>,

    /// Bluetooth adapter to use, e.g. hci0
    #[arg(long)]
    adapter: Option<String>,

    /// More output per occurrence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logger = pretty_env_logger::formatted_timed_builder();
    logger.filter_level(cli.log_level());
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    let config = if cli.config.exists() || cli.config != PathBuf::from(DEFAULT_CONFIG_PATH) {
        config::AppConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        info!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
        config::AppConfig::default()
    };

    let settings = config
        .presence_settings(cli.threshold, cli.timeout)
        .context("invalid sensor settings")?;
    let sensor_name = config.sensor_name();

    let mqtt = config
        .mqtt
        .as_ref()
        .map(|mqtt_config| mqtt::MqttClient::new(mqtt_config, &sensor_name));
    if mqtt.is_none() {
        warn!("No [mqtt] section configured, presence changes will only be logged");
    }

    let wanted_adapter = cli
        .adapter
        .clone()
        .or_else(|| config.scan.as_ref().and_then(|s| s.adapter.clone()));
    let bt_manager = Manager::new().await.context("opening Bluetooth")?;
    let adapter = scanner::find_adapter(&bt_manager, wanted_adapter.as_deref()).await?;

    let core = manager::Manager::new(
        adapter,
        settings,
        sensor_name,
        config.dump_advertisements(),
        mqtt,
    );

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    };

    let final_state = core.run_loop(shutdown).await?;
    info!("Final presence state: {:?}", final_state);

    Ok(())
}
