//! One-shot status polling of newly discovered devices.

use super::registry::{DeviceEntry, PollOutcome};
use super::Dialect;
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;

/// Generic marker recorded when the device could not be reached or answered
/// with something unusable.
pub const UNABLE_TO_POLL: &str = "Unable to poll";

/// Everything a device session needs to fetch status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub device_id: String,
    pub ip: String,
    pub key: String,
    pub version: String,
}

/// Local device session. Implementations speak the device protocol; a
/// successful call returns the device's response mapping (with `dps` on
/// success or `Error` on rejection).
pub trait StatusClient: Send + Sync {
    fn status<'a>(&'a self, target: &'a PollTarget) -> BoxFuture<'a, anyhow::Result<Value>>;
}

/// Why a device was or was not polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible(PollTarget),
    /// Undecodable announcement, no device id to address
    NoDeviceId,
    /// Encrypted dialect without a local key
    KeyRequired,
}

/// Decide whether `entry` can be polled. Legacy devices need no key; the
/// encrypted dialect needs a non-empty one.
pub fn eligibility(entry: &DeviceEntry) -> Eligibility {
    let Some(device_id) = entry.device_id.clone().filter(|id| !id.is_empty()) else {
        return Eligibility::NoDeviceId;
    };

    let dialect = entry.poll_dialect();
    let key = entry.key.clone().unwrap_or_default();
    if dialect == Dialect::Encrypted && key.is_empty() {
        return Eligibility::KeyRequired;
    }

    let version = entry
        .protocol_version
        .clone()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| dialect.default_version().to_string());

    Eligibility::Eligible(PollTarget {
        device_id,
        ip: entry.ip.clone(),
        key,
        version,
    })
}

/// Map a device response to the value stored on the entry.
pub fn interpret_response(ip: &str, response: Value) -> PollOutcome {
    if response.get("dps").is_some() {
        return PollOutcome::Status(response);
    }

    match response.get("Error") {
        Some(Value::String(reason)) => {
            tracing::warn!("Access rejected by {}: {}", ip, reason);
            PollOutcome::Failed(format!("Access rejected: {}", reason))
        }
        Some(other) => {
            tracing::warn!("Access rejected by {}: {}", ip, other);
            PollOutcome::Failed(format!("Access rejected: {}", other))
        }
        None => {
            tracing::warn!("Invalid response from {}: {}", ip, response);
            PollOutcome::Failed(UNABLE_TO_POLL.to_string())
        }
    }
}

/// Runs status fetches with a delay and timeout.
pub struct PollOrchestrator<'a> {
    client: &'a dyn StatusClient,
    delay: Duration,
    timeout: Duration,
}

impl<'a> PollOrchestrator<'a> {
    pub fn new(client: &'a dyn StatusClient, delay: Duration, timeout: Duration) -> Self {
        Self {
            client,
            delay,
            timeout,
        }
    }

    /// Poll one device. `None` when it is not eligible.
    pub async fn poll(&self, entry: &DeviceEntry) -> Option<PollOutcome> {
        let target = match eligibility(entry) {
            Eligibility::Eligible(target) => target,
            Eligibility::KeyRequired => {
                tracing::info!(
                    "No status for {}: device key required to poll",
                    entry.ip
                );
                return None;
            }
            Eligibility::NoDeviceId => return None,
        };

        // give the device a break between its broadcast and our connect
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = match tokio::time::timeout(self.timeout, self.client.status(&target)).await {
            Ok(Ok(response)) => interpret_response(&target.ip, response),
            Ok(Err(e)) => {
                tracing::warn!("Unexpected error for {}: {}", target.ip, e);
                PollOutcome::Failed(UNABLE_TO_POLL.to_string())
            }
            Err(_) => {
                tracing::warn!("Status poll of {} timed out", target.ip);
                PollOutcome::Failed(UNABLE_TO_POLL.to_string())
            }
        };

        if let PollOutcome::Status(ref status) = outcome {
            tracing::info!("Status of {}: {}", target.ip, status["dps"]);
        }

        Some(outcome)
    }
}
