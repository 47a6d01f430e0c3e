//! Tuyascan Core Library
//!
//! LAN discovery for Tuya-compatible smart devices:
//! - Listening for device broadcast announcements (plain and encrypted dialects)
//! - Optional active sweep of the local subnet for MAC addresses
//! - Enrichment from a known-devices file and the IEEE OUI registry
//! - One-shot status polling of each newly found device
//!
//! # Example
//!
//! ```no_run
//! use tuyascan_core::{config, scanner, snapshot};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_scan_config();
//!     let snapshot_path = config.snapshot_file.clone();
//!
//!     let result = scanner::scan_devices(
//!         config,
//!         scanner::Collaborators::default(),
//!         CancellationToken::new(),
//!         None,
//!     )
//!     .await?;
//!     println!("Found {} devices", result.devices.len());
//!
//!     if let Some(path) = snapshot_path {
//!         snapshot::save_snapshot(&path, &snapshot::Snapshot::new(result.devices))?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod scanner;
pub mod snapshot;

// Re-export commonly used types
pub use config::{ConfigSource, ScanConfig, ScanPorts};
pub use error::{ScanError, SweepError};
pub use identity::{IdentityRegistry, KnownIdentity};
pub use scanner::{
    Collaborators, DeviceEntry, Dialect, ProgressCallback, ScanProgress, ScanResult, ScanStage,
    scan_devices,
};
pub use snapshot::Snapshot;
