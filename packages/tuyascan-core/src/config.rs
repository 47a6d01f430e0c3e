use crate::error::{Result, ScanError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// UDP port for plaintext (v3.1) broadcasts
pub const DEFAULT_UDP_PORT_A: u16 = 6666;

/// UDP port for encrypted (v3.3+) broadcasts
pub const DEFAULT_UDP_PORT_B: u16 = 6667;

/// TCP port devices accept local control sessions on
pub const DEFAULT_TCP_PORT: u16 = 6668;

/// Retry budget when no device file is loaded
pub const DEFAULT_MAX_RETRIES: u32 = 15;

pub const DEFAULT_DEVICES_FILE: &str = "devices.json";
pub const DEFAULT_SNAPSHOT_FILE: &str = "tuyascan.json";

/// Subnet swept when the local address cannot be detected
pub const DEFAULT_SUBNET: &str = "192.168.0.0/24";

const DEFAULT_RECV_TIMEOUT_MS: u64 = 3000;
const DEFAULT_SWEEP_TIMEOUT_MS: u64 = 400;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 5000;
const DEFAULT_POLL_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DATAGRAM: usize = 4048;

const ENV_DEVICES_FILE: &str = "TUYASCAN_DEVICES_FILE";
const ENV_MAX_RETRIES: &str = "TUYASCAN_MAX_RETRIES";
const ENV_FORCE_SCAN: &str = "TUYASCAN_FORCE_SCAN";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    scan: Option<ScanSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ScanSection {
    max_retries: Option<u32>,
    force_scan: Option<bool>,
    poll: Option<bool>,
    devices_file: Option<PathBuf>,
    snapshot_file: Option<PathBuf>,
    subnet: Option<String>,
    recv_timeout_ms: Option<u64>,
    sweep_timeout_ms: Option<u64>,
    poll_timeout_ms: Option<u64>,
}

/// Listening and probing ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPorts {
    pub udp_a: u16,
    pub udp_b: u16,
    pub tcp: u16,
}

impl Default for ScanPorts {
    fn default() -> Self {
        Self {
            udp_a: DEFAULT_UDP_PORT_A,
            udp_b: DEFAULT_UDP_PORT_B,
            tcp: DEFAULT_TCP_PORT,
        }
    }
}

/// Runtime scan configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Explicit retry budget. `None` derives it from the device file.
    pub max_retries: Option<u32>,
    /// Run the active TCP sweep before listening
    pub force_scan: bool,
    /// Poll newly found devices for their status
    pub poll: bool,
    pub devices_file: PathBuf,
    pub snapshot_file: Option<PathBuf>,
    /// CIDR to sweep instead of the detected local /24
    pub subnet: Option<String>,
    pub ports: ScanPorts,
    pub recv_timeout: Duration,
    pub sweep_timeout: Duration,
    pub poll_timeout: Duration,
    pub poll_delay: Duration,
    pub max_datagram: usize,
    /// Source of the configuration (for logging)
    pub source: ConfigSource,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            force_scan: false,
            poll: true,
            devices_file: PathBuf::from(DEFAULT_DEVICES_FILE),
            snapshot_file: Some(PathBuf::from(DEFAULT_SNAPSHOT_FILE)),
            subnet: None,
            ports: ScanPorts::default(),
            recv_timeout: Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS),
            sweep_timeout: Duration::from_millis(DEFAULT_SWEEP_TIMEOUT_MS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            poll_delay: Duration::from_millis(DEFAULT_POLL_DELAY_MS),
            max_datagram: DEFAULT_MAX_DATAGRAM,
            source: ConfigSource::Default,
        }
    }
}

impl ScanConfig {
    /// Retry budget for this scan. An explicit value wins; otherwise every
    /// known device buys one extra retry.
    pub fn effective_max_retries(&self, known_devices: Option<usize>) -> u32 {
        match (self.max_retries, known_devices) {
            (Some(explicit), _) => explicit,
            (None, Some(count)) => DEFAULT_MAX_RETRIES.saturating_add(count as u32),
            (None, None) => DEFAULT_MAX_RETRIES,
        }
    }
}

/// Highest-priority layer that set any value. Environment beats the config
/// file, which beats the built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Nothing overridden
    Default,
    /// `[scan]` table of the config file, no environment overrides
    ConfigFile,
    /// At least one `TUYASCAN_*` variable was applied
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConfigSource::Default => "built-in defaults",
            ConfigSource::ConfigFile => "config file",
            ConfigSource::Environment => "environment",
        };
        f.write_str(label)
    }
}

fn config_file_path() -> Option<PathBuf> {
    let base = dirs::config_dir().or_else(|| dirs::home_dir().map(|home| home.join(".config")))?;
    Some(base.join("tuyascan").join("config.toml"))
}

/// Parse the config file at `path`. A missing file is `Ok(None)`.
fn read_config_file(path: &Path) -> Result<Option<ConfigFile>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ScanError::Config(format!("{}: {}", path.display(), e))),
    };

    let file = toml::from_str(&content)
        .map_err(|e| ScanError::Config(format!("{}: {}", path.display(), e)))?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(Some(file))
}

fn apply_config_file(config: &mut ScanConfig, file: ConfigFile) {
    let Some(scan) = file.scan else {
        return;
    };

    config.source = ConfigSource::ConfigFile;

    if let Some(retries) = scan.max_retries {
        config.max_retries = Some(retries);
    }
    if let Some(force) = scan.force_scan {
        config.force_scan = force;
    }
    if let Some(poll) = scan.poll {
        config.poll = poll;
    }
    if let Some(path) = scan.devices_file {
        config.devices_file = path;
    }
    if let Some(path) = scan.snapshot_file {
        config.snapshot_file = Some(path);
    }
    if let Some(subnet) = scan.subnet.filter(|s| !s.trim().is_empty()) {
        config.subnet = Some(subnet.trim().to_string());
    }
    if let Some(ms) = scan.recv_timeout_ms {
        config.recv_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = scan.sweep_timeout_ms {
        config.sweep_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = scan.poll_timeout_ms {
        config.poll_timeout = Duration::from_millis(ms);
    }
}

fn apply_environment<F>(config: &mut ScanConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_DEVICES_FILE).filter(|s| !s.trim().is_empty()) {
        tracing::info!("Using device file from environment variable: {}", path);
        config.devices_file = PathBuf::from(path.trim());
        config.source = ConfigSource::Environment;
    }

    if let Some(raw) = lookup(ENV_MAX_RETRIES) {
        match raw.trim().parse::<u32>() {
            Ok(retries) => {
                config.max_retries = Some(retries);
                config.source = ConfigSource::Environment;
            }
            Err(_) => tracing::warn!("Ignoring {}={:?}: not a number", ENV_MAX_RETRIES, raw),
        }
    }

    if let Some(raw) = lookup(ENV_FORCE_SCAN) {
        config.force_scan = matches!(raw.trim(), "1" | "true" | "yes");
        config.source = ConfigSource::Environment;
    }
}

/// Load scan configuration with priority:
/// 1. Environment variables (TUYASCAN_*)
/// 2. Config file (~/.config/tuyascan/config.toml)
/// 3. Default values
pub fn load_scan_config() -> ScanConfig {
    let mut config = ScanConfig::default();

    if let Some(path) = config_file_path() {
        match read_config_file(&path) {
            Ok(Some(file)) => apply_config_file(&mut config, file),
            Ok(None) => {}
            Err(e) => tracing::warn!("{}; using defaults", e),
        }
    }
    apply_environment(&mut config, |name| std::env::var(name).ok());

    tracing::debug!("Scan configuration loaded from {}", config.source);
    config
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/tuyascan/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# tuyascan configuration
# Place this file at: ~/.config/tuyascan/config.toml

[scan]
# Retry budget for the broadcast listener (default: 15 + number of known devices)
# max_retries = 20

# Probe every host of the local /24 on TCP 6668 before listening
# force_scan = false

# Poll newly found devices for status
# poll = true

# devices_file = "devices.json"
# snapshot_file = "tuyascan.json"

# Sweep this subnet instead of the detected local /24
# subnet = "192.168.1.0/24"

# recv_timeout_ms = 3000
# sweep_timeout_ms = 400
# poll_timeout_ms = 5000
"#
    .to_string()
}
