//! Discovered devices, one entry per IP address.

use super::payload::{CandidateRecord, PayloadStatus};
use super::Dialect;
use crate::identity::ResolvedIdentity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Accumulated discovery record for one IP address. Once created an entry is
/// only ever enriched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub ip: String,
    #[serde(rename = "gwId", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(rename = "productKey", default, skip_serializing_if = "Option::is_none")]
    pub product_key: Option<String>,
    #[serde(rename = "version", default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Device vendor/manufacturer from MAC OUI lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(rename = "dps", default, skip_serializing_if = "Option::is_none")]
    pub dps_status: Option<Value>,
    #[serde(rename = "err", default, skip_serializing_if = "Option::is_none")]
    pub poll_error: Option<String>,
    /// Port the first announcement arrived on
    pub dialect: Dialect,
    pub payload: PayloadStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceEntry {
    fn from_candidate(candidate: CandidateRecord, dialect: Dialect) -> Self {
        Self {
            ip: candidate.ip,
            device_id: candidate.device_id,
            product_key: candidate.product_key,
            protocol_version: candidate.protocol_version,
            name: None,
            key: None,
            mac: None,
            vendor: None,
            dps_status: None,
            poll_error: None,
            dialect,
            payload: candidate.payload_status,
            extra: candidate.extra,
        }
    }

    /// Dialect that governs polling: the reported protocol version when the
    /// payload carried one, otherwise the port it was heard on.
    pub fn poll_dialect(&self) -> Dialect {
        self.protocol_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(Dialect::for_version)
            .unwrap_or(self.dialect)
    }

    pub fn is_valid(&self) -> bool {
        self.payload == PayloadStatus::Valid
    }
}

/// Outcome of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Status(Value),
    Failed(String),
}

/// Owns every [`DeviceEntry`] for the lifetime of a scan.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement. Returns `true` the first time an IP is seen;
    /// repeated announcements leave the existing entry untouched.
    pub fn observe(&mut self, candidate: CandidateRecord, dialect: Dialect) -> bool {
        if self.devices.contains_key(&candidate.ip) {
            return false;
        }
        let entry = DeviceEntry::from_candidate(candidate, dialect);
        self.devices.insert(entry.ip.clone(), entry);
        true
    }

    /// Fill in identity fields that are still empty. Empty strings are skipped.
    pub fn enrich(&mut self, ip: &str, identity: &ResolvedIdentity, vendor: Option<String>) {
        let Some(entry) = self.devices.get_mut(ip) else {
            return;
        };

        if entry.name.is_none() && !identity.name.is_empty() {
            entry.name = Some(identity.name.clone());
        }
        if entry.key.is_none() && !identity.key.is_empty() {
            entry.key = Some(identity.key.clone());
        }
        if entry.mac.is_none() && !identity.mac.is_empty() {
            entry.mac = Some(identity.mac.clone());
        }
        if entry.vendor.is_none() {
            entry.vendor = vendor;
        }
    }

    pub fn record_poll(&mut self, ip: &str, outcome: PollOutcome) {
        let Some(entry) = self.devices.get_mut(ip) else {
            return;
        };
        match outcome {
            PollOutcome::Status(status) => entry.dps_status = Some(status),
            PollOutcome::Failed(reason) => entry.poll_error = Some(reason),
        }
    }

    pub fn get(&self, ip: &str) -> Option<&DeviceEntry> {
        self.devices.get(ip)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> &BTreeMap<String, DeviceEntry> {
        &self.devices
    }

    pub fn into_devices(self) -> BTreeMap<String, DeviceEntry> {
        self.devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(ip: &str, id: &str, version: &str) -> CandidateRecord {
        CandidateRecord {
            ip: ip.to_string(),
            device_id: Some(id.to_string()),
            product_key: Some("pk".to_string()),
            protocol_version: Some(version.to_string()),
            payload_status: PayloadStatus::Valid,
            raw_peer_ip: ip.to_string(),
            mac: None,
            extra: Map::new(),
        }
    }

    fn unknown(ip: &str) -> CandidateRecord {
        CandidateRecord {
            ip: ip.to_string(),
            device_id: None,
            product_key: None,
            protocol_version: None,
            payload_status: PayloadStatus::Unknown,
            raw_peer_ip: ip.to_string(),
            mac: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_observe_is_new_once_per_ip() {
        let mut registry = DeviceRegistry::new();
        let sightings = [
            ("10.0.0.5", true),
            ("10.0.0.6", true),
            ("10.0.0.5", false),
            ("10.0.0.5", false),
            ("10.0.0.6", false),
            ("10.0.0.7", true),
        ];
        for (ip, expected) in sightings {
            assert_eq!(
                registry.observe(valid(ip, "id", "3.3"), Dialect::Encrypted),
                expected,
                "ip {}",
                ip
            );
        }
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_first_seen_values_win() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.observe(valid("10.0.0.5", "first", "3.3"), Dialect::Encrypted));
        assert!(!registry.observe(valid("10.0.0.5", "second", "3.4"), Dialect::Encrypted));

        let entry = registry.get("10.0.0.5").unwrap();
        assert_eq!(entry.device_id.as_deref(), Some("first"));
        assert_eq!(entry.protocol_version.as_deref(), Some("3.3"));
    }

    #[test]
    fn test_unknown_payload_recorded_by_ip_only() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.observe(unknown("10.0.0.9"), Dialect::Encrypted));

        let entry = registry.get("10.0.0.9").unwrap();
        assert!(!entry.is_valid());
        assert!(entry.device_id.is_none());
        assert!(entry.product_key.is_none());
    }

    #[test]
    fn test_enrich_never_overwrites() {
        let mut registry = DeviceRegistry::new();
        registry.observe(valid("10.0.0.5", "abc", "3.1"), Dialect::Legacy);

        let first = ResolvedIdentity {
            name: "Lamp".to_string(),
            key: String::new(),
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
        };
        registry.enrich("10.0.0.5", &first, None);

        let second = ResolvedIdentity {
            name: "Other".to_string(),
            key: "k1".to_string(),
            mac: "11:22:33:44:55:66".to_string(),
        };
        registry.enrich("10.0.0.5", &second, Some("Vendor".to_string()));

        let entry = registry.get("10.0.0.5").unwrap();
        assert_eq!(entry.name.as_deref(), Some("Lamp"));
        assert_eq!(entry.key.as_deref(), Some("k1"));
        assert_eq!(entry.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(entry.vendor.as_deref(), Some("Vendor"));
    }

    #[test]
    fn test_poll_dialect_prefers_reported_version() {
        let mut registry = DeviceRegistry::new();
        registry.observe(valid("10.0.0.5", "abc", "3.1"), Dialect::Encrypted);
        registry.observe(unknown("10.0.0.6"), Dialect::Legacy);

        assert_eq!(registry.get("10.0.0.5").unwrap().poll_dialect(), Dialect::Legacy);
        assert_eq!(registry.get("10.0.0.6").unwrap().poll_dialect(), Dialect::Legacy);
    }

    #[test]
    fn test_entry_serializes_with_device_field_names() {
        let mut registry = DeviceRegistry::new();
        let mut candidate = valid("10.0.0.5", "abc", "3.1");
        candidate.extra.insert("active".to_string(), Value::from(2));
        registry.observe(candidate, Dialect::Legacy);
        registry.record_poll("10.0.0.5", PollOutcome::Failed("Unable to poll".to_string()));

        let json = serde_json::to_value(registry.get("10.0.0.5").unwrap()).unwrap();
        assert_eq!(json["gwId"], "abc");
        assert_eq!(json["productKey"], "pk");
        assert_eq!(json["version"], "3.1");
        assert_eq!(json["err"], "Unable to poll");
        assert_eq!(json["active"], 2);
        assert_eq!(json["dialect"], "legacy");
        assert!(json.get("dps").is_none());
    }
}
