use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser};
use tracing::{error, info, warn};

use modbus_relay::{setup_logging, ModbusRelay, RelayConfig};

/// Waits for SIGINT (Ctrl+C) or, on Unix, SIGTERM — whichever arrives first
/// (spec §5/§6: clean shutdown on SIGINT/SIGTERM).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Only Ctrl+C will trigger shutdown",
                    e
                );
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the config file
    #[arg(short, long, default_value = "/etc/modbus-relay.json")]
    config: PathBuf,

    /// Dump default config and exit
    #[arg(long = "dump-default-config")]
    dump_default: bool,

    /// Modbus/TCP listen port
    #[arg(long = "tcp_port")]
    tcp_port: Option<u16>,

    /// Liveness/health HTTP port
    #[arg(long = "http_port")]
    http_port: Option<u16>,

    /// Serial device path
    #[arg(long = "port")]
    serial_port: Option<String>,

    /// Serial baud rate
    #[arg(long = "speed")]
    speed: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.common.dump_default {
        let config = RelayConfig::default();
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    // Load config
    let mut config = if cli.common.config.exists() {
        let content = std::fs::read_to_string(&cli.common.config)?;
        let config: RelayConfig = serde_json::from_str(&content)?;
        RelayConfig::validate(&config)?;
        config
    } else {
        RelayConfig::default()
    };

    if let Some(tcp_port) = cli.common.tcp_port {
        config.tcp.bind_port = tcp_port;
    }
    if let Some(http_port) = cli.common.http_port {
        config.http.bind_port = http_port;
    }
    if let Some(device) = cli.common.serial_port {
        config.rtu.device = device;
    }
    if let Some(speed) = cli.common.speed {
        config.rtu.baud_rate = speed;
    }
    RelayConfig::validate(&config)?;

    setup_logging(&config)?;

    if cli.common.config.exists() {
        info!("Loaded config from {}", cli.common.config.display());
    } else {
        info!("Config file not found, using defaults");
        info!(
            "Consider running with --dump-default-config > {}",
            cli.common.config.display()
        );
    }

    // Create and run relay
    let relay = Arc::new(ModbusRelay::new(config)?);

    let shutdown_relay = Arc::clone(&relay);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Received shutdown signal");
        if let Err(e) = shutdown_relay.shutdown().await {
            error!("Error during shutdown: {}", e);
        }
    });

    relay.run().await?;

    Ok(())
}
