pub mod config;      // Configuration file loading and defaults
pub mod connection;  // UDP transport session (handshake, AT commands, retry)
pub mod coordinator; // The outer publish loop
pub mod daily_reset; // Daily production counter reset state machine
pub mod decoder;     // Register payload to value conversion
pub mod definitions; // Parameter definition file loading
pub mod error;       // Error taxonomy
pub mod frame;       // CRC16 and Modbus-style frame codec
pub mod inverter;    // Poll orchestrator and derived values
pub mod mqtt;        // Home Assistant MQTT sink
pub mod options;     // Command line options parsing
pub mod prelude;     // Common imports
pub mod validator;   // Value range validation

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::coordinator::Coordinator;
use std::io::Write;

pub fn init_logging(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();
}

pub async fn app(
    shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    config: Config,
) -> Result<()> {
    info!("Starting deye-bridge {}", CARGO_PKG_VERSION);
    let mut coordinator = Coordinator::new(config, shutdown_rx)?;
    coordinator.start().await
}

/// Load the config, wire up Ctrl+C and run the publish loop until shutdown.
pub async fn run(options: Options) -> Result<()> {
    let config = Config::new(options.config_file)?;
    init_logging(config.loglevel());

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
        }
        let _ = shutdown_tx_clone.send(());
    });

    app(shutdown_rx, config).await
}
