use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hansori::config::Config;
use hansori::discovery::{self, ScanConfig, DEFAULT_AGENT_PORT};
use hansori::session::{DeviceControlSystem, SessionMode};
use hansori::worker::{WorkerServer, WorkerServerConfig};

#[derive(Parser)]
#[command(
    name = "hansori",
    version,
    about = "Synchronized multi-sensor capture orchestrator",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one recording session
    Record {
        /// Recording mode override (standalone, sync)
        #[arg(short, long)]
        mode: Option<String>,

        /// Restrict worker discovery to the loopback address
        #[arg(long)]
        local: bool,
    },

    /// Run the worker agent for remote capture
    Worker {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Grace period in seconds before stops escalate to kills
        #[arg(long, default_value = "3")]
        grace_secs: u64,
    },

    /// Scan the subnet for worker machines
    Scan {
        /// Probe strategy
        #[arg(short, long, value_enum, default_value = "agent")]
        method: ScanMethod,

        /// Worker agent port (agent probing only)
        #[arg(short, long, default_value_t = DEFAULT_AGENT_PORT)]
        port: u16,

        /// Skip probing and report only the loopback address
        #[arg(long)]
        local: bool,
    },

    /// List audio input devices
    Devices,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScanMethod {
    /// ICMP reachability probe
    Ping,

    /// Worker agent service probe
    Agent,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    setup_tracing(&cli.log_format, cli.verbose)?;

    tracing::info!("hansori capture orchestrator starting");

    match cli.command {
        Commands::Record { mode, local } => {
            tracing::info!(
                mode = ?mode,
                local = %local,
                config = %cli.config.display(),
                "Starting record command"
            );
            record(&cli.config, mode, local).await?;
        }

        Commands::Worker { port, grace_secs } => {
            tracing::info!(port = ?port, grace_secs = %grace_secs, "Starting worker command");
            worker(&cli.config, port, grace_secs).await?;
        }

        Commands::Scan {
            method,
            port,
            local,
        } => {
            tracing::info!(method = ?method, port = %port, local = %local, "Starting scan command");
            scan(method, port, local).await?;
        }

        Commands::Devices => {
            devices()?;
        }
    }

    tracing::info!("hansori completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("hansori=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("hansori=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Load the configuration file, falling back to environment defaults
fn load_config(path: &PathBuf) -> Result<Config> {
    let config = if path.exists() {
        Config::from_file(path)?
    } else {
        tracing::warn!(
            config = %path.display(),
            "Config file not found, using environment defaults"
        );
        Config::from_env()?
    };
    config.validate()?;
    Ok(config)
}

/// Run one recording session, with signal-safe cleanup
async fn record(config_path: &PathBuf, mode: Option<String>, local: bool) -> Result<()> {
    let config = load_config(config_path)?;

    let mode_override = match mode.as_deref() {
        Some(value) => Some(
            SessionMode::parse(value)
                .with_context(|| format!("unknown recording mode '{value}'"))?,
        ),
        None => None,
    };
    let local_override = local.then_some(true);

    let system = DeviceControlSystem::new(config, mode_override, local_override);
    let controller = system.controller();

    let result = tokio::select! {
        result = system.run() => result.map(Some),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt received, cleaning up");
            system.request_audio_stop();
            Ok(None)
        }
    };

    // Cleanup is idempotent; this covers both the interrupt path and any
    // failure path out of the session
    controller.cleanup().await;

    match result? {
        Some(report) => {
            println!("Session complete: {}", report.session_dir.display());
            println!("  Devices: {}", report.device_count);
            for file in &report.files {
                println!("  {}", file.display());
            }
            Ok(())
        }
        None => {
            println!("Session interrupted.");
            Ok(())
        }
    }
}

/// Run the worker agent until interrupted
async fn worker(config_path: &PathBuf, port: Option<u16>, grace_secs: u64) -> Result<()> {
    let port = match port {
        Some(port) => port,
        None => match load_config(config_path) {
            Ok(config) => config.recording.worker_port,
            Err(_) => DEFAULT_AGENT_PORT,
        },
    };

    let server_config = WorkerServerConfig {
        bind_address: SocketAddr::from(([0, 0, 0, 0], port)),
        stop_grace_secs: grace_secs,
        ..Default::default()
    };

    println!("Worker agent listening on port {port}");
    let server = WorkerServer::new(server_config);
    server
        .start_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Worker agent interrupted");
        })
        .await
        .context("worker agent failed")?;

    Ok(())
}

/// Scan the subnet and print discovered workers
async fn scan(method: ScanMethod, port: u16, local: bool) -> Result<()> {
    let scan_config = ScanConfig {
        local_only: local,
        port,
        ..Default::default()
    };

    let hosts = match method {
        ScanMethod::Ping => discovery::scan_ping(&scan_config).await,
        ScanMethod::Agent => discovery::scan_agents(&scan_config).await,
    };

    if hosts.is_empty() {
        println!("No workers found.");
    } else {
        println!("Found {} host(s):", hosts.len());
        for host in hosts {
            println!("  {host}");
        }
    }

    Ok(())
}

/// List audio input devices of the default host
fn devices() -> Result<()> {
    let devices = hansori::audio::list_input_devices();
    if devices.is_empty() {
        println!("No audio input devices found.");
    } else {
        println!("Audio input devices:");
        for (index, name) in devices {
            println!("  {index}: {name}");
        }
    }
    Ok(())
}
