//! Timestamped snapshot of a scan, written as pretty JSON.

use crate::error::{Result, ScanError};
use crate::scanner::DeviceEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix seconds with millisecond precision
    pub timestamp: f64,
    pub devices: BTreeMap<String, DeviceEntry>,
}

impl Snapshot {
    pub fn new(devices: BTreeMap<String, DeviceEntry>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            devices,
        }
    }

    /// Scan time as RFC 3339, for display
    pub fn taken_at(&self) -> String {
        chrono::DateTime::from_timestamp_millis((self.timestamp * 1000.0) as i64)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Save a snapshot to disk
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let to_error = |reason: String| ScanError::Snapshot {
        path: path.to_path_buf(),
        reason,
    };

    let content = serde_json::to_string_pretty(snapshot).map_err(|e| to_error(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| to_error(e.to_string()))?;

    tracing::debug!(
        "Saved snapshot to {:?}: {} devices",
        path,
        snapshot.devices.len()
    );
    Ok(())
}

/// Load a snapshot written by [`save_snapshot`]
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let to_error = |reason: String| ScanError::Snapshot {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| to_error(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| to_error(e.to_string()))
}
