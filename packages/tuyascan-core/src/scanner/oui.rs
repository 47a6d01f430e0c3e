//! Vendor names from the IEEE OUI registry.
//!
//! Tuya devices are built on third-party Wi-Fi modules, so the vendor is
//! usually the module maker (Espressif, Beken, ...) rather than the brand on
//! the box.

/// Organization registered for the first three octets of `mac`, if any.
pub fn lookup_vendor(mac: &str) -> Option<String> {
    let normalized = normalize_mac(mac)?;
    let vendor = oui_data::lookup(&normalized).map(|record| record.organization().to_string());
    tracing::debug!("OUI {} -> {:?}", normalized, vendor);
    vendor
}

/// Canonical `AA:BB:CC:DD:EE:FF` form of a full 48-bit MAC written with
/// colons, dashes, dots or no separators.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned: String = mac.trim().replace([':', '-', '.'], "").to_uppercase();

    if cleaned.len() != 12 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    Some(format!(
        "{}:{}:{}:{}:{}:{}",
        &cleaned[0..2],
        &cleaned[2..4],
        &cleaned[4..6],
        &cleaned[6..8],
        &cleaned[8..10],
        &cleaned[10..12]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac_formats() {
        assert_eq!(
            normalize_mac("10-d5-61-aa-bb-cc").as_deref(),
            Some("10:D5:61:AA:BB:CC")
        );
        assert_eq!(
            normalize_mac("10d5.61aa.bbcc").as_deref(),
            Some("10:D5:61:AA:BB:CC")
        );
        assert_eq!(
            normalize_mac(" 10:d5:61:aa:bb:cc ").as_deref(),
            Some("10:D5:61:AA:BB:CC")
        );
    }

    #[test]
    fn test_normalize_mac_rejects_garbage() {
        assert_eq!(normalize_mac(""), None);
        assert_eq!(normalize_mac("10:d5:61"), None);
        assert_eq!(normalize_mac("zz:d5:61:aa:bb:cc"), None);
    }

    #[test]
    fn test_lookup_vendor_invalid_mac() {
        assert_eq!(lookup_vendor("not-a-mac"), None);
    }
}
