use std::sync::Arc;

use crate::config::RelayConfig;
use crate::relay::registry::ReceiverRegistry;
use crate::relay::sender::SenderSlot;

/// Application-wide state shared across handlers and sessions.
///
/// The sender slot is the only process-global mutable value: the single
/// upstream peer, its forwarding track and the connected flag, all
/// behind one mutex. The receiver registry is a separate reader/writer
/// mapping so timestamp fan-out contends with nothing else.
pub struct AppState {
    pub config: RelayConfig,
    pub sender: SenderSlot,
    pub receivers: ReceiverRegistry,
}

impl AppState {
    /// Create new application state
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sender: SenderSlot::default(),
            receivers: ReceiverRegistry::default(),
        })
    }
}
