//! CLI Entry Point for rig_control
//!
//! Provides command-line interface for:
//! - Running the station daemon on simulated hardware, with the operator console on stdin
//! - Watching a running station as a client
//! - Checking a configuration file
//!
//! # Usage
//!
//! Start the station:
//! ```bash
//! rig_control serve --bind 0.0.0.0:9766
//! ```
//!
//! Watch it and nudge the stage up:
//! ```bash
//! rig_control watch --name scope-1 --command up --frames 100
//! ```

use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use rig_control::config::{RigConfig, DEFAULT_CONFIG_PATH};
use rig_control::network::FrameClient;
use rig_control::{console, logging, Station};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rig_control")]
#[command(about = "Remote camera-rig controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the station daemon on simulated hardware
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,

        /// Do not read operator commands from stdin; run until Ctrl+C
        #[arg(long)]
        no_console: bool,
    },

    /// Connect to a station and print incoming frames
    Watch {
        /// Station address
        #[arg(long, default_value = "127.0.0.1:9766")]
        address: String,

        /// Display name announced to the station
        #[arg(long)]
        name: String,

        /// Command to send after connecting (repeatable), e.g. `zoom:40` or `up`
        #[arg(long = "command")]
        commands: Vec<String>,

        /// Stop after this many frames (0 = run until the station disconnects)
        #[arg(long, default_value_t = 0)]
        frames: u64,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RigConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve { bind, no_console } => serve(config, bind, no_console).await,
        Commands::Watch {
            address,
            name,
            commands,
            frames,
        } => watch(config, address, name, commands, frames).await,
        Commands::CheckConfig => check_config(config),
    }
}

async fn serve(mut config: RigConfig, bind: Option<String>, no_console: bool) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }
    config.validate()?;
    logging::init_from_config(&config)?;

    let mut station = Station::simulated(config);
    let address = station.start().await?;
    info!(%address, "Station ready");

    if no_console {
        tokio::signal::ctrl_c().await?;
    } else {
        let stdin = BufReader::new(tokio::io::stdin());
        tokio::select! {
            result = console::run(&station, stdin, tokio::io::stdout()) => {
                if let Err(e) = result {
                    warn!(error = %e, "Console ended with an error");
                }
            }
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    info!("Shutting down");
    station.shutdown().await;
    Ok(())
}

async fn watch(
    config: RigConfig,
    address: String,
    name: String,
    commands: Vec<String>,
    frames: u64,
) -> Result<()> {
    logging::init_from_config(&config)?;

    let token = config.server.liveness_token.clone();
    let client = FrameClient::connect(address.as_str(), &name, &token)
        .await
        .with_context(|| format!("connecting to {address}"))?;
    let (mut reader, mut writer) = client.into_split();

    // Commands and probes go out on their own task so frame reading never stalls
    let sender = tokio::spawn(async move {
        let gap = Duration::from_millis(250);
        tokio::time::sleep(gap).await;
        for command in commands {
            if let Err(e) = writer.send_command(&command).await {
                warn!(%command, error = %e, "Command not sent");
                return;
            }
            tokio::time::sleep(gap).await;
        }

        let mut probes = tokio::time::interval(Duration::from_secs(1));
        loop {
            probes.tick().await;
            if writer.send_liveness().await.is_err() {
                return;
            }
        }
    });

    let mut received = 0u64;
    loop {
        let payload = match reader.next_frame().await {
            Ok(payload) => payload,
            Err(e) => {
                info!(error = %e, "Station closed the connection");
                break;
            }
        };
        received += 1;

        let jpeg_len = base64::engine::general_purpose::STANDARD
            .decode(&payload)
            .map(|jpeg| jpeg.len())
            .unwrap_or_default();
        println!("frame {received}: {} bytes ({jpeg_len} bytes JPEG)", payload.len());

        if frames != 0 && received >= frames {
            break;
        }
    }

    sender.abort();
    Ok(())
}

fn check_config(config: RigConfig) -> Result<()> {
    config.validate()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("Configuration OK");
    Ok(())
}
