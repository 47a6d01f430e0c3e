//! Broadcast payload interpretation.
//!
//! Devices announce themselves with a framed datagram: a 20 byte header, the
//! (possibly encrypted) JSON body, then an 8 byte trailer. The body is
//! decrypted by a [`PayloadDecryptor`] when one is available; payloads that
//! cannot be decoded still identify the sender by IP.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

const HEADER_LEN: usize = 20;
const TRAILER_LEN: usize = 8;

/// Announcement fields that would collide with what the scanner records on a
/// device entry. They are never carried as extras.
const RESERVED_FIELDS: [&str; 8] = [
    "name", "key", "mac", "vendor", "dps", "err", "dialect", "payload",
];

/// Decrypts the body of an announcement.
pub trait PayloadDecryptor: Send + Sync {
    fn decrypt(&self, body: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Decryptor for installations without the device protocol keys. Every body
/// goes through the plain-text path.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextOnly;

impl PayloadDecryptor for PlainTextOnly {
    fn decrypt(&self, _body: &[u8]) -> anyhow::Result<Vec<u8>> {
        Err(anyhow::anyhow!("no payload decryptor configured"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadStatus {
    Valid,
    Unknown,
}

impl std::fmt::Display for PayloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadStatus::Valid => write!(f, "Valid"),
            PayloadStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// What one datagram tells us about its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    /// Registry key: the address the device reports, or the sender address
    /// for undecodable payloads.
    pub ip: String,
    pub device_id: Option<String>,
    pub product_key: Option<String>,
    pub protocol_version: Option<String>,
    pub payload_status: PayloadStatus,
    pub raw_peer_ip: String,
    /// MAC the device reported about itself
    pub mac: Option<String>,
    /// Remaining announcement fields (`active`, `encrypt`, `ability`, ...)
    pub extra: Map<String, Value>,
}

impl CandidateRecord {
    fn unknown(peer: IpAddr) -> Self {
        Self {
            ip: peer.to_string(),
            device_id: None,
            product_key: None,
            protocol_version: None,
            payload_status: PayloadStatus::Unknown,
            raw_peer_ip: peer.to_string(),
            mac: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Announcement {
    ip: String,
    #[serde(rename = "gwId")]
    gw_id: String,
    #[serde(rename = "productKey")]
    product_key: String,
    version: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Strip the frame around an announcement body. Datagrams too short to carry
/// a frame yield an empty body.
fn strip_frame(datagram: &[u8]) -> &[u8] {
    if datagram.len() < HEADER_LEN + TRAILER_LEN {
        return &[];
    }
    &datagram[HEADER_LEN..datagram.len() - TRAILER_LEN]
}

/// Turns raw datagrams into candidate records.
pub struct PayloadInterpreter<'a> {
    decryptor: &'a dyn PayloadDecryptor,
}

impl<'a> PayloadInterpreter<'a> {
    pub fn new(decryptor: &'a dyn PayloadDecryptor) -> Self {
        Self { decryptor }
    }

    pub fn interpret(&self, datagram: &[u8], peer: IpAddr) -> CandidateRecord {
        let body = strip_frame(datagram);

        let announcement = self
            .decryptor
            .decrypt(body)
            .ok()
            .and_then(|plain| serde_json::from_slice::<Announcement>(&plain).ok())
            .or_else(|| serde_json::from_slice::<Announcement>(body).ok());

        match announcement {
            Some(mut a) => {
                let mac = a
                    .extra
                    .get("mac")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|mac| !mac.is_empty())
                    .map(String::from);
                for field in RESERVED_FIELDS {
                    a.extra.remove(field);
                }

                tracing::debug!(
                    "Received valid UDP packet from {}: gwId={} version={}",
                    peer,
                    a.gw_id,
                    a.version
                );
                CandidateRecord {
                    ip: a.ip,
                    device_id: Some(a.gw_id),
                    product_key: Some(a.product_key),
                    protocol_version: Some(a.version),
                    payload_status: PayloadStatus::Valid,
                    raw_peer_ip: peer.to_string(),
                    mac,
                    extra: a.extra,
                }
            }
            None => {
                tracing::debug!(
                    "Unexpected payload from {} ({} bytes)",
                    peer,
                    datagram.len()
                );
                CandidateRecord::unknown(peer)
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn frame(body: &[u8]) -> Vec<u8> {
    let mut datagram = vec![0u8; HEADER_LEN];
    datagram.extend_from_slice(body);
    datagram.extend_from_slice(&[0u8; TRAILER_LEN]);
    datagram
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANNOUNCEMENT: &str = r#"{"ip":"10.0.0.5","gwId":"abc","active":2,"encrypt":false,"productKey":"pk1","version":"3.1"}"#;

    /// Reverses the body, standing in for real decryption.
    struct Reversing;

    impl PayloadDecryptor for Reversing {
        fn decrypt(&self, body: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(body.iter().rev().copied().collect())
        }
    }

    fn peer() -> IpAddr {
        "192.168.1.20".parse().unwrap()
    }

    #[test]
    fn test_plaintext_announcement() {
        let interpreter = PayloadInterpreter::new(&PlainTextOnly);
        let candidate = interpreter.interpret(&frame(ANNOUNCEMENT.as_bytes()), peer());

        assert_eq!(candidate.payload_status, PayloadStatus::Valid);
        assert_eq!(candidate.ip, "10.0.0.5");
        assert_eq!(candidate.raw_peer_ip, "192.168.1.20");
        assert_eq!(candidate.device_id.as_deref(), Some("abc"));
        assert_eq!(candidate.product_key.as_deref(), Some("pk1"));
        assert_eq!(candidate.protocol_version.as_deref(), Some("3.1"));
        assert_eq!(candidate.extra.get("active"), Some(&Value::from(2)));
        assert!(!candidate.extra.contains_key("gwId"));
    }

    #[test]
    fn test_decrypted_announcement() {
        let encrypted: Vec<u8> = ANNOUNCEMENT.bytes().rev().collect();
        let interpreter = PayloadInterpreter::new(&Reversing);
        let candidate = interpreter.interpret(&frame(&encrypted), peer());

        assert_eq!(candidate.payload_status, PayloadStatus::Valid);
        assert_eq!(candidate.device_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_plaintext_fallback_when_decryption_yields_garbage() {
        let interpreter = PayloadInterpreter::new(&Reversing);
        let candidate = interpreter.interpret(&frame(ANNOUNCEMENT.as_bytes()), peer());
        assert_eq!(candidate.payload_status, PayloadStatus::Valid);
    }

    #[test]
    fn test_garbage_is_unknown_keyed_by_peer() {
        let interpreter = PayloadInterpreter::new(&PlainTextOnly);
        let candidate = interpreter.interpret(&frame(b"\x8f\x01garbage"), peer());

        assert_eq!(candidate.payload_status, PayloadStatus::Unknown);
        assert_eq!(candidate.ip, "192.168.1.20");
        assert!(candidate.device_id.is_none());
        assert!(candidate.product_key.is_none());
    }

    #[test]
    fn test_missing_required_field_is_unknown() {
        let interpreter = PayloadInterpreter::new(&PlainTextOnly);
        let body = br#"{"ip":"10.0.0.5","gwId":"abc","version":"3.3"}"#;
        let candidate = interpreter.interpret(&frame(body), peer());
        assert_eq!(candidate.payload_status, PayloadStatus::Unknown);
    }

    #[test]
    fn test_reported_mac_lifted_and_reserved_fields_dropped() {
        let interpreter = PayloadInterpreter::new(&PlainTextOnly);
        let body = br#"{"ip":"10.0.0.5","gwId":"abc","productKey":"pk1","version":"3.1","mac":"aa:aa:aa:aa:aa:aa","name":"fromdev","dps":{"1":true},"active":2}"#;
        let candidate = interpreter.interpret(&frame(body), peer());

        assert_eq!(candidate.mac.as_deref(), Some("aa:aa:aa:aa:aa:aa"));
        assert_eq!(candidate.extra.get("active"), Some(&Value::from(2)));
        for field in RESERVED_FIELDS {
            assert!(!candidate.extra.contains_key(field), "{} kept", field);
        }
    }

    #[test]
    fn test_short_datagram_is_unknown() {
        let interpreter = PayloadInterpreter::new(&PlainTextOnly);
        let candidate = interpreter.interpret(b"tiny", peer());
        assert_eq!(candidate.payload_status, PayloadStatus::Unknown);
        assert_eq!(candidate.ip, "192.168.1.20");
    }
}
