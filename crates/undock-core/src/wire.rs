//! undock wire format — what travels between nodes.
//!
//! Two surfaces:
//!   - Overlay streams negotiated with `ROUTER_PROTOCOL_ID`, carrying one
//!     complete HTTP/1.1 request out and one complete response back.
//!   - Announcements: JSON records broadcast on `ANNOUNCE_TOPIC`.
//!
//! Announcement field names are camelCase on the wire (`id`, `services`,
//! `lastSeen`) so any node speaking the same topic can decode them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::PeerId;

/// Stream protocol identifier used both to forward proxied requests and to
/// receive them.
pub const ROUTER_PROTOCOL_ID: &str = "/undock/router/1.0.0";

/// Broadcast topic carrying service announcements.
pub const ANNOUNCE_TOPIC: &str = "undock-services";

/// Default seconds between periodic announcements.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 10;

/// Link-local all-nodes multicast group used for announcements.
pub const MULTICAST_ADDR: &str = "ff02::1";

/// UDP port on which announcements are received.
pub const ANNOUNCE_PORT: u16 = 9100;

/// Request header naming the logical service a request is meant for.
///
/// Set by callers to ask for per-service selection, and always set by the
/// forwarding node so the target peer knows which local workload to call.
pub const SERVICE_HEADER: &str = "x-undock-service";

/// One locally hosted service as published to the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncedService {
    #[serde(rename = "serviceID")]
    pub service_id: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub port: u16,
    /// Requests the announcing node is currently serving for peers.
    #[serde(default)]
    pub load: u64,
}

/// "Which services does node X host, as of when."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: PeerId,
    #[serde(default)]
    pub services: Vec<AnnouncedService>,
    pub last_seen: DateTime<Utc>,
    /// TCP port the announcing node accepts overlay streams on. 0 = unknown.
    #[serde(default)]
    pub overlay_port: u16,
}

impl Announcement {
    pub fn encode(&self) -> Vec<u8> {
        // Every field serializes infallibly.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Announcement {
        Announcement {
            id: PeerId::from_bytes([7u8; 32]),
            services: vec![AnnouncedService {
                service_id: "llm".into(),
                image: "ollama/ollama".into(),
                port: 11434,
                load: 2,
            }],
            last_seen: "2026-10-19T12:00:00Z".parse().unwrap(),
            overlay_port: 4100,
        }
    }

    #[test]
    fn announcement_uses_camel_case_keys() {
        let json: serde_json::Value = serde_json::from_slice(&sample().encode()).unwrap();
        assert_eq!(json["id"], "07".repeat(32));
        assert_eq!(json["lastSeen"], "2026-10-19T12:00:00Z");
        assert_eq!(json["overlayPort"], 4100);
        assert_eq!(json["services"][0]["serviceID"], "llm");
        assert_eq!(json["services"][0]["load"], 2);
    }

    #[test]
    fn decode_accepts_minimal_record() {
        let id = "07".repeat(32);
        let text = format!(
            r#"{{"id":"{id}","services":[{{"serviceID":"a"}}],"lastSeen":"2026-10-19T12:00:00Z"}}"#
        );
        let ann = Announcement::decode(text.as_bytes()).unwrap();
        assert_eq!(ann.services[0].service_id, "a");
        assert_eq!(ann.services[0].load, 0);
        assert_eq!(ann.overlay_port, 0);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Announcement::decode(b"not json").is_err());
        assert!(Announcement::decode(br#"{"id":"short","lastSeen":"2026-10-19T12:00:00Z"}"#).is_err());
    }
}
