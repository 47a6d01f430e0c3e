//! Error types for the scan engine.
//!
//! Only resource acquisition at startup is fatal to a scan. Everything that can
//! go wrong per datagram, per device or during the sweep is contained where it
//! happens and never reaches the caller as an error.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to load device file {path:?}: {reason}")]
    Identity { path: PathBuf, reason: String },
    #[error("Snapshot file {path:?}: {reason}")]
    Snapshot { path: PathBuf, reason: String },
}

/// Why the optional active sweep could not run.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Invalid sweep subnet '{0}'")]
    InvalidSubnet(String),
    #[error("Only IPv4 subnets can be swept, got {0}")]
    UnsupportedSubnet(String),
}
