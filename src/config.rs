//! Relay configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration shared by every session. Upstream and downstream peers
/// use the same STUN-only ICE set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// STUN server URLs.
    pub stun_servers: Vec<String>,
    /// Advisory producer label reported by `/config` as `sender_url`.
    pub sender_url: String,
    /// Directory the consumer page is served from.
    pub static_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            sender_url: "Producer via WebSocket".to_string(),
            static_dir: PathBuf::from("./static"),
        }
    }
}
