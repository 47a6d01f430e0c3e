//! Device discovery.
//!
//! A scan runs in three phases on a single task:
//! - optional active sweep of the local subnet (TCP connect + ARP lookup)
//! - bounded broadcast listening on the two announcement ports
//! - a status poll of each newly found device, inline with listening
//!
//! Listening ends when the retry budget is exhausted or the scan is cancelled.
//! Either way the devices found so far are the result.

pub mod arp;
pub mod budget;
pub mod listener;
pub mod oui;
pub mod payload;
pub mod poll;
pub mod registry;
pub mod sweep;

pub use arp::{ArpTableResolver, MacResolver};
pub use budget::{BudgetState, RetryBudget};
pub use listener::{BroadcastListener, Reception};
pub use payload::{
    CandidateRecord, PayloadDecryptor, PayloadInterpreter, PayloadStatus, PlainTextOnly,
};
pub use poll::{PollOrchestrator, PollTarget, StatusClient};
pub use registry::{DeviceEntry, DeviceRegistry, PollOutcome};
pub use sweep::SweepTable;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::identity::IdentityRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Announcement dialect, one per listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// v3.1 devices: plaintext announcements, status readable without a key
    Legacy,
    /// v3.3+ devices: encrypted announcements, polling needs the local key
    Encrypted,
}

impl Dialect {
    pub fn for_version(version: &str) -> Self {
        if version.trim() == "3.1" {
            Dialect::Legacy
        } else {
            Dialect::Encrypted
        }
    }

    pub fn default_version(self) -> &'static str {
        match self {
            Dialect::Legacy => "3.1",
            Dialect::Encrypted => "3.3",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Legacy => write!(f, "legacy"),
            Dialect::Encrypted => write!(f, "encrypted"),
        }
    }
}

/// External collaborators a scan delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub decryptor: Arc<dyn PayloadDecryptor>,
    /// Without a status client, devices are discovered but not polled.
    pub status_client: Option<Arc<dyn StatusClient>>,
    pub mac_resolver: Arc<dyn MacResolver>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            decryptor: Arc::new(PlainTextOnly),
            status_client: None,
            mac_resolver: Arc::new(ArpTableResolver),
        }
    }
}

/// Scan result: every device found, keyed by IP
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub devices: BTreeMap<String, DeviceEntry>,
    pub max_retries: u32,
    pub known_devices: Option<usize>,
    pub sweep_hosts: usize,
    /// Cancelled before the budget ran out
    pub interrupted: bool,
    pub elapsed_secs: f64,
}

/// Progress updates during a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub stage: ScanStage,
    pub message: String,
    pub devices_found: Option<usize>,
    pub elapsed_secs: f64,
}

/// Stages of a scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Starting,
    Sweeping,
    Listening,
    DeviceFound,
    Polling,
    Complete,
    Interrupted,
}

/// Callback type for scan progress updates
pub type ProgressCallback = Box<dyn Fn(ScanProgress) + Send + Sync>;

/// A scan with its sockets bound, ready to run.
pub struct DeviceScan {
    config: ScanConfig,
    identities: IdentityRegistry,
    known_devices: Option<usize>,
    collaborators: Collaborators,
    listener: BroadcastListener,
}

impl DeviceScan {
    /// Bind both announcement ports. This is the only step of a scan that can
    /// fail.
    pub fn bind(
        config: ScanConfig,
        identities: Option<IdentityRegistry>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let listener =
            BroadcastListener::bind(config.ports, config.recv_timeout, config.max_datagram)?;
        let known_devices = identities.as_ref().map(IdentityRegistry::record_count);

        Ok(Self {
            config,
            identities: identities.unwrap_or_default(),
            known_devices,
            collaborators,
            listener,
        })
    }

    pub fn local_port(&self, dialect: Dialect) -> Option<u16> {
        self.listener.local_port(dialect)
    }

    /// Run the scan to completion or cancellation. Sockets are released when
    /// this returns.
    pub async fn run(
        self,
        cancel: CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> ScanResult {
        let DeviceScan {
            config,
            identities,
            known_devices,
            collaborators,
            mut listener,
        } = self;

        let scan_start = Instant::now();
        let emit_progress = |stage: ScanStage, message: &str, devices: Option<usize>| {
            let progress = ScanProgress {
                stage,
                message: message.to_string(),
                devices_found: devices,
                elapsed_secs: scan_start.elapsed().as_secs_f64(),
            };
            tracing::info!("[Scan] {}", message);
            if let Some(ref callback) = on_progress {
                callback(progress);
            }
        };

        let max_retries = config.effective_max_retries(known_devices);
        match known_devices {
            Some(count) => emit_progress(
                ScanStage::Starting,
                &format!("Loaded {} known devices, {} retries", count, max_retries),
                None,
            ),
            None => emit_progress(
                ScanStage::Starting,
                &format!("No device file, {} retries", max_retries),
                None,
            ),
        }

        // Stage 1: optional sweep
        let sweep = if config.force_scan {
            emit_progress(
                ScanStage::Sweeping,
                "Scanning local network. This may take a while...",
                None,
            );
            let table = run_sweep(&config, collaborators.mac_resolver.as_ref(), &cancel).await;
            emit_progress(
                ScanStage::Sweeping,
                &format!("Sweep found {} hosts", table.len()),
                None,
            );
            table
        } else {
            SweepTable::default()
        };

        // Stage 2: listen
        emit_progress(
            ScanStage::Listening,
            &format!(
                "Listening for devices on UDP {} and {}",
                listener.local_port(Dialect::Legacy).unwrap_or(config.ports.udp_a),
                listener.local_port(Dialect::Encrypted).unwrap_or(config.ports.udp_b)
            ),
            Some(0),
        );

        let interpreter = PayloadInterpreter::new(collaborators.decryptor.as_ref());
        let poller = match (&collaborators.status_client, config.poll) {
            (Some(client), true) => Some(PollOrchestrator::new(
                client.as_ref(),
                config.poll_delay,
                config.poll_timeout,
            )),
            (None, true) => {
                tracing::info!("Status polling unavailable: no device session configured");
                None
            }
            (_, false) => None,
        };

        let mut budget = RetryBudget::new(max_retries);
        let mut registry = DeviceRegistry::new();
        let mut interrupted = false;

        while budget.state() == BudgetState::Listening {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let dialect = budget.next_dialect();
            let reception = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                reception = listener.receive(dialect) => reception,
            };

            let (data, peer) = match reception {
                Reception::Datagram { data, peer } => (data, peer),
                Reception::Silence => {
                    budget.record_silence(dialect);
                    continue;
                }
            };

            let candidate = interpreter.interpret(&data, peer.ip());
            let ip = candidate.ip.clone();
            let payload_mac = candidate.mac.clone();

            if !registry.observe(candidate, dialect) {
                budget.record_duplicate(dialect);
                continue;
            }
            budget.record_novel(dialect);

            let device_id = registry.get(&ip).and_then(|e| e.device_id.clone());
            let resolved = identities.resolve(
                device_id.as_deref(),
                payload_mac.as_deref(),
                sweep.mac_for(&ip),
            );
            let vendor = Some(resolved.mac.as_str())
                .filter(|mac| !mac.is_empty())
                .and_then(oui::lookup_vendor);
            registry.enrich(&ip, &resolved, vendor);

            let Some(entry) = registry.get(&ip).cloned() else {
                continue;
            };
            emit_progress(
                ScanStage::DeviceFound,
                &describe(&entry),
                Some(registry.len()),
            );

            if let Some(ref poller) = poller {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    outcome = poller.poll(&entry) => outcome,
                };
                if let Some(outcome) = outcome {
                    if let PollOutcome::Failed(ref reason) = outcome {
                        emit_progress(
                            ScanStage::Polling,
                            &format!("{}: {}", ip, reason),
                            Some(registry.len()),
                        );
                    }
                    registry.record_poll(&ip, outcome);
                }
            }
        }

        drop(listener);

        let devices = registry.into_devices();
        if interrupted {
            emit_progress(
                ScanStage::Interrupted,
                &format!("Scan interrupted, {} devices found", devices.len()),
                Some(devices.len()),
            );
        } else {
            emit_progress(
                ScanStage::Complete,
                &format!(
                    "Scan complete: {} devices found in {:.1}s",
                    devices.len(),
                    scan_start.elapsed().as_secs_f64()
                ),
                Some(devices.len()),
            );
        }

        tracing::debug!(
            "Budget at exit: legacy={} encrypted={} max={} extensions={}",
            budget.silence(Dialect::Legacy),
            budget.silence(Dialect::Encrypted),
            budget.max_retries(),
            budget.extensions()
        );

        ScanResult {
            devices,
            max_retries,
            known_devices,
            sweep_hosts: sweep.len(),
            interrupted,
            elapsed_secs: scan_start.elapsed().as_secs_f64(),
        }
    }
}

/// One-line summary of a newly found device
fn describe(entry: &DeviceEntry) -> String {
    let name = match entry.name.as_deref() {
        Some(name) => name.to_string(),
        None => format!(
            "Unknown v{} Device",
            entry.protocol_version.as_deref().unwrap_or("?")
        ),
    };
    format!(
        "{} at {} [{} payload] id={} product={} mac={}",
        name,
        entry.ip,
        entry.payload,
        entry.device_id.as_deref().unwrap_or("-"),
        entry.product_key.as_deref().unwrap_or("-"),
        entry.mac.as_deref().unwrap_or("-")
    )
}

/// Sweep the configured or detected subnet. Any failure disables the sweep
/// and yields an empty table.
async fn run_sweep(
    config: &ScanConfig,
    resolver: &dyn MacResolver,
    cancel: &CancellationToken,
) -> SweepTable {
    match sweep::sweep_target(config.subnet.as_deref()).await {
        Ok(network) => {
            sweep::sweep_subnet(
                network,
                config.ports.tcp,
                config.sweep_timeout,
                resolver,
                cancel,
            )
            .await
        }
        Err(e) => {
            tracing::warn!("Error scanning network ({}), sweep disabled", e);
            SweepTable::default()
        }
    }
}

/// Load known devices, bind, and run a full scan.
pub async fn scan_devices(
    config: ScanConfig,
    collaborators: Collaborators,
    cancel: CancellationToken,
    on_progress: Option<ProgressCallback>,
) -> Result<ScanResult> {
    let identities = IdentityRegistry::load_or_skip(&config.devices_file);
    let scan = DeviceScan::bind(config, identities, collaborators)?;
    Ok(scan.run(cancel, on_progress).await)
}
