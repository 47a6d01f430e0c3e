//! Known device identities loaded from a local device file.
//!
//! The device file is a JSON array of `{ "id", "name", "key", "mac"? }` records
//! (extra fields are ignored). It is read once before scanning and never
//! mutated afterwards.

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownIdentity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub mac: Option<String>,
}

/// Name, key and MAC resolved for one device. Empty strings mean unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub name: String,
    pub key: String,
    pub mac: String,
}

/// Read-only lookup table of known identities, keyed by device id.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    by_id: HashMap<String, KnownIdentity>,
    /// Records in the file, duplicates included
    records: usize,
}

impl IdentityRegistry {
    pub fn new(identities: Vec<KnownIdentity>) -> Self {
        let records = identities.len();
        let mut by_id = HashMap::with_capacity(records);
        for identity in identities {
            // First record wins when the file lists an id twice
            by_id.entry(identity.id.clone()).or_insert(identity);
        }
        Self { by_id, records }
    }

    pub fn from_json_str(content: &str) -> serde_json::Result<Self> {
        let identities: Vec<KnownIdentity> = serde_json::from_str(content)?;
        Ok(Self::new(identities))
    }

    /// Load the device file. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!("No device file at {:?}", path);
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| ScanError::Identity {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let registry = Self::from_json_str(&content).map_err(|e| ScanError::Identity {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Loaded {:?} [{} devices]", path, registry.len());
        Ok(Some(registry))
    }

    /// Like [`IdentityRegistry::load`] but an unreadable file is logged and
    /// treated as absent.
    pub fn load_or_skip(path: &Path) -> Option<Self> {
        match Self::load(path) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!("{}; continuing without known devices", e);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Number of records the file listed. Sizes the retry budget.
    pub fn record_count(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, device_id: &str) -> Option<&KnownIdentity> {
        self.by_id.get(device_id)
    }

    /// Name, key and MAC for a device id, each empty if unknown.
    pub fn lookup(&self, device_id: &str) -> (String, String, String) {
        match self.by_id.get(device_id) {
            Some(identity) => (
                identity.name.clone(),
                identity.key.clone(),
                identity.mac.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new(), String::new()),
        }
    }

    /// Merge the three identity sources for one device.
    ///
    /// Name and key come from the device file only. The MAC is the first
    /// non-empty value of: payload, device file, sweep table.
    pub fn resolve(
        &self,
        device_id: Option<&str>,
        payload_mac: Option<&str>,
        sweep_mac: Option<&str>,
    ) -> ResolvedIdentity {
        let (name, key, file_mac) = device_id
            .filter(|id| !id.is_empty())
            .map(|id| self.lookup(id))
            .unwrap_or_default();

        let mac = [payload_mac, Some(file_mac.as_str()), sweep_mac]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|m| !m.is_empty())
            .unwrap_or_default()
            .to_string();

        ResolvedIdentity { name, key, mac }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn registry() -> IdentityRegistry {
        IdentityRegistry::from_json_str(
            r#"[
                {"id": "abc", "name": "Lamp", "key": "k1"},
                {"id": "def", "name": "Plug", "key": "k2", "mac": "10:d5:61:aa:bb:cc", "category": "cz"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_known_and_unknown() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.lookup("abc"),
            ("Lamp".to_string(), "k1".to_string(), String::new())
        );
        assert_eq!(
            registry.lookup("nope"),
            (String::new(), String::new(), String::new())
        );
    }

    #[test]
    fn test_resolve_mac_precedence() {
        let registry = registry();

        let from_file = registry.resolve(Some("def"), None, Some("aa:aa:aa:aa:aa:aa"));
        assert_eq!(from_file.mac, "10:d5:61:aa:bb:cc");
        assert_eq!(from_file.name, "Plug");

        let from_sweep = registry.resolve(Some("abc"), None, Some("aa:aa:aa:aa:aa:aa"));
        assert_eq!(from_sweep.mac, "aa:aa:aa:aa:aa:aa");
        assert_eq!(from_sweep.key, "k1");

        let from_payload = registry.resolve(Some("def"), Some("bb:bb:bb:bb:bb:bb"), None);
        assert_eq!(from_payload.mac, "bb:bb:bb:bb:bb:bb");

        let unknown = registry.resolve(None, Some(""), None);
        assert_eq!(unknown, ResolvedIdentity::default());
    }

    #[test]
    fn test_duplicate_ids_keep_first_record() {
        let registry = IdentityRegistry::from_json_str(
            r#"[{"id": "x", "name": "First", "key": "a"}, {"id": "x", "name": "Second", "key": "b"}]"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.record_count(), 2);
        assert_eq!(registry.get("x").map(|i| i.name.as_str()), Some("First"));
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = IdentityRegistry::load(&dir.path().join("devices.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_invalid_file_is_error_but_skippable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        assert!(matches!(
            IdentityRegistry::load(file.path()),
            Err(ScanError::Identity { .. })
        ));
        assert!(IdentityRegistry::load_or_skip(file.path()).is_none());
    }

    #[test]
    fn test_load_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[{"id": "abc", "name": "Lamp", "key": "k1"}]"#)
            .unwrap();

        let registry = IdentityRegistry::load(file.path()).unwrap().unwrap();
        assert_eq!(registry.len(), 1);
    }
}
