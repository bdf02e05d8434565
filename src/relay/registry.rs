//! Dynamic set of receiver sessions and the timestamp fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::receiver::ReceiverSession;

/// Broadcast progress is logged once per this many records.
const BROADCAST_LOG_STRIDE: u64 = 100;

/// Registry of live receiver sessions keyed by id.
///
/// The lock guards only the map itself: a broadcast copies the session
/// list under the read lock and performs every enqueue after releasing
/// it, so a slow consumer can never hold up the sender's read task.
#[derive(Default)]
pub struct ReceiverRegistry {
    sessions: RwLock<HashMap<String, Arc<ReceiverSession>>>,
    broadcasts: AtomicU64,
}

impl ReceiverRegistry {
    pub async fn insert(&self, session: Arc<ReceiverSession>) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Remove a session: close its queue, stop its send loop and close
    /// the peer. The peer close runs on its own task because removal is
    /// often triggered from that peer's own state-change callback.
    pub async fn remove(&self, id: &str) {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = removed {
            session.close();
            tokio::spawn(async move {
                let _ = session.pc.close().await;
            });
            info!("receiver {id} removed");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Copy of the current session list.
    pub async fn snapshot(&self) -> Vec<Arc<ReceiverSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Fan a serialized timestamp record out to every receiver. Enqueues
    /// never block; a full queue drops the record for that receiver
    /// only. Returns how many receivers accepted the record.
    pub async fn broadcast(&self, message: &str) -> usize {
        let receivers = self.snapshot().await;

        let mut delivered = 0;
        for receiver in &receivers {
            if receiver.enqueue(message.to_string()) {
                delivered += 1;
            } else {
                debug!("receiver {}: timestamp dropped", receiver.id);
            }
        }

        let count = self.broadcasts.fetch_add(1, Ordering::Relaxed) + 1;
        if count % BROADCAST_LOG_STRIDE == 0 {
            info!("{count} timestamps broadcast to {} receivers", receivers.len());
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::relay::peer;

    async fn test_session(id: &str) -> Arc<ReceiverSession> {
        let pc = peer::new_peer(&RelayConfig::default()).await.unwrap();
        ReceiverSession::new(id.to_string(), pc)
    }

    #[tokio::test]
    async fn insert_broadcast_remove() {
        let registry = ReceiverRegistry::default();
        assert!(registry.is_empty().await);

        let session = test_session("receiver-1").await;
        registry.insert(session.clone()).await;
        assert_eq!(registry.len().await, 1);

        // No side-channel installed yet: the record is still accepted
        // onto the queue (and dropped later by the send loop).
        assert_eq!(registry.broadcast(r#"{"type":"frame_timestamp"}"#).await, 1);

        registry.remove("receiver-1").await;
        assert!(registry.is_empty().await);
        // The removed session's queue is closed.
        assert!(!session.enqueue("late".to_string()));
    }

    #[tokio::test]
    async fn broadcast_skips_dead_receiver_only() {
        let registry = ReceiverRegistry::default();
        let dead = test_session("receiver-dead").await;
        let live = test_session("receiver-live").await;

        registry.insert(dead.clone()).await;
        registry.insert(live).await;
        dead.close();

        // The dead receiver rejects the record; the live one accepts it.
        let delivered = registry.broadcast("ts").await;
        assert_eq!(delivered, 1);
    }
}
