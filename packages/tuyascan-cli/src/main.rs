//! Tuyascan CLI - LAN discovery for Tuya-compatible smart devices
//!
//! This binary can:
//! - Listen for device broadcasts and list what answered
//! - Sweep the local subnet for MAC addresses before listening
//! - Save a timestamped snapshot of the scan as JSON

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tuyascan_core::{config, scanner, snapshot};

#[derive(Parser)]
#[command(name = "tuyascan")]
#[command(version)]
#[command(about = "Discover Tuya-compatible devices on the local network")]
#[command(long_about = "
tuyascan listens for the UDP announcements Tuya devices broadcast on ports
6666 and 6667, enriches them from a known-devices file, and lists what it
heard. Press Ctrl-C to stop early and keep the devices found so far.

Quick start:
  1. Listen:             tuyascan scan
  2. Sweep first:        tuyascan scan --force
  3. Show settings:      tuyascan config
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for device broadcasts
    Scan {
        /// Retry budget (default: 15 + number of known devices)
        #[arg(short, long)]
        max_retries: Option<u32>,

        /// Sweep the subnet on TCP 6668 before listening
        #[arg(long)]
        force: bool,

        /// Do not poll found devices for status
        #[arg(long)]
        no_poll: bool,

        /// Known devices file
        #[arg(short, long)]
        devices: Option<PathBuf>,

        /// Snapshot file to write after the scan
        #[arg(short, long, conflicts_with = "no_snapshot")]
        snapshot: Option<PathBuf>,

        /// Do not write a snapshot
        #[arg(long)]
        no_snapshot: bool,

        /// Subnet to sweep instead of the local /24 (implies --force)
        #[arg(long)]
        subnet: Option<String>,
    },

    /// Show configuration paths and settings
    Config,
}

struct ScanArgs {
    max_retries: Option<u32>,
    force: bool,
    no_poll: bool,
    devices: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    no_snapshot: bool,
    subnet: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("tuyascan={},tuyascan_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Scan {
            max_retries,
            force,
            no_poll,
            devices,
            snapshot,
            no_snapshot,
            subnet,
        } => {
            let args = ScanArgs {
                max_retries: *max_retries,
                force: *force,
                no_poll: *no_poll,
                devices: devices.clone(),
                snapshot: snapshot.clone(),
                no_snapshot: *no_snapshot,
                subnet: subnet.clone(),
            };
            cmd_scan(&cli, args).await
        }
        Commands::Config => cmd_config(&cli),
    }
}

fn apply_args(config: &mut config::ScanConfig, args: ScanArgs) {
    if args.max_retries.is_some() {
        config.max_retries = args.max_retries;
    }
    if args.force || args.subnet.is_some() {
        config.force_scan = true;
    }
    if args.no_poll {
        config.poll = false;
    }
    if let Some(devices) = args.devices {
        config.devices_file = devices;
    }
    if args.no_snapshot {
        config.snapshot_file = None;
    } else if let Some(path) = args.snapshot {
        config.snapshot_file = Some(path);
    }
    if let Some(subnet) = args.subnet {
        config.subnet = Some(subnet);
    }
}

async fn cmd_scan(cli: &Cli, args: ScanArgs) -> Result<()> {
    let mut scan_config = config::load_scan_config();
    apply_args(&mut scan_config, args);
    let snapshot_path = scan_config.snapshot_file.clone();

    // Ctrl-C stops the scan; the devices found so far are kept
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping scan...");
            on_signal.cancel();
        }
    });

    // Create progress callback for text mode
    let progress_callback: Option<scanner::ProgressCallback> = match cli.format {
        OutputFormat::Text => Some(Box::new(|progress: scanner::ScanProgress| {
            match progress.stage {
                scanner::ScanStage::DeviceFound => println!("  + {}", progress.message),
                _ => println!("  {}", progress.message),
            }
        })),
        OutputFormat::Json => None,
    };

    let scan_result = scanner::scan_devices(
        scan_config,
        scanner::Collaborators::default(),
        cancel,
        progress_callback,
    )
    .await
    .context("Scan failed")?;

    let saved_to = match snapshot_path {
        Some(path) => {
            let snapshot = snapshot::Snapshot::new(scan_result.devices.clone());
            match snapshot::save_snapshot(&path, &snapshot) {
                Ok(()) => Some(path),
                Err(e) => {
                    tracing::error!("{}", e);
                    None
                }
            }
        }
        None => None,
    };

    match cli.format {
        OutputFormat::Text => {
            println!();
            println!(
                "Found {} devices{}:",
                scan_result.devices.len(),
                if scan_result.interrupted { " (interrupted)" } else { "" }
            );
            println!();
            for device in scan_result.devices.values() {
                let name = device.name.as_deref().unwrap_or("-");
                let id = device.device_id.as_deref().unwrap_or("-");
                let version = device.protocol_version.as_deref().unwrap_or("?");
                let vendor = device.vendor.as_deref().unwrap_or("");

                if vendor.is_empty() {
                    println!("  {:15} v{:4} {:22} {}", device.ip, version, id, name);
                } else {
                    println!(
                        "  {:15} v{:4} {:22} {} ({})",
                        device.ip, version, id, name, vendor
                    );
                }

                if let Some(status) = &device.dps_status {
                    println!("  {:15} status: {}", "", status["dps"]);
                } else if let Some(err) = &device.poll_error {
                    println!("  {:15} status: {}", "", err);
                }
            }

            if let Some(path) = &saved_to {
                println!();
                println!("Snapshot saved to {}", path.display());
            }
        }
        OutputFormat::Json => {
            println!("{}", scan_report(&scan_result, saved_to.as_deref())?);
        }
    }

    Ok(())
}

/// JSON form of a scan: the serialized result plus where the snapshot went.
fn scan_report(
    result: &scanner::ScanResult,
    saved_to: Option<&std::path::Path>,
) -> Result<serde_json::Value> {
    let mut report = serde_json::to_value(result).context("Failed to serialize scan result")?;
    report["snapshotFile"] = serde_json::json!(saved_to.map(|p| p.display().to_string()));
    Ok(report)
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let scan_config = config::load_scan_config();
    let config_path = config::get_config_file_path_string();
    let snapshot_file = scan_config
        .snapshot_file
        .as_ref()
        .map(|p| p.display().to_string());

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Loaded from:      {}", scan_config.source);
            println!("Devices file:     {}", scan_config.devices_file.display());
            println!(
                "Snapshot file:    {}",
                snapshot_file.as_deref().unwrap_or("(disabled)")
            );
            println!(
                "Max retries:      {}",
                scan_config
                    .max_retries
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "15 + known devices".to_string())
            );
            println!("Force sweep:      {}", scan_config.force_scan);
            println!("Poll devices:     {}", scan_config.poll);
            println!(
                "Ports:            UDP {}/{}, TCP {}",
                scan_config.ports.udp_a, scan_config.ports.udp_b, scan_config.ports.tcp
            );
            println!();
            println!("Environment variables:");
            println!("  TUYASCAN_DEVICES_FILE - Override known devices file");
            println!("  TUYASCAN_MAX_RETRIES  - Override retry budget");
            println!("  TUYASCAN_FORCE_SCAN   - Sweep before listening (1/true/yes)");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": format!("{}", scan_config.source),
                    "devices_file": scan_config.devices_file.display().to_string(),
                    "snapshot_file": snapshot_file,
                    "max_retries": scan_config.max_retries,
                    "force_scan": scan_config.force_scan,
                    "poll": scan_config.poll,
                    "subnet": scan_config.subnet,
                    "ports": {
                        "udp_a": scan_config.ports.udp_a,
                        "udp_b": scan_config.ports.udp_b,
                        "tcp": scan_config.ports.tcp,
                    },
                })
            );
        }
    }

    Ok(())
}
