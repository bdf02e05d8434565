//! Downstream receiver session: the forwarded video track plus the
//! `timestamps` side-channel with its bounded outbound queue.
//!
//! The side-channel is always created by the consumer inside its offer;
//! the relay only adopts it through the peer's data-channel callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

use super::signaling::ChannelMessage;

/// Label of the side-channel the consumer opens in its offer. Any other
/// label announced by a consumer is ignored.
pub const TIMESTAMP_CHANNEL_LABEL: &str = "timestamps";

/// Outbound queue depth per receiver; a full queue drops the record for
/// that receiver only.
pub const SEND_QUEUE_CAPACITY: usize = 100;

/// Bounded outbound queue with non-blocking enqueue. The closed flag is
/// a single atomic so the hot path never takes a lock.
pub struct OutboundQueue {
    tx: mpsc::Sender<String>,
    closed: AtomicBool,
    shutdown: Notify,
}

impl OutboundQueue {
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
            },
            rx,
        )
    }

    /// Non-blocking enqueue; false when the queue is full or closed.
    pub fn offer(&self, message: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.try_send(message).is_ok()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One downstream consumer: owned peer, side-channel slot, outbound
/// queue and its dedicated send loop.
pub struct ReceiverSession {
    pub id: String,
    pub pc: Arc<RTCPeerConnection>,
    channel: RwLock<Option<Arc<RTCDataChannel>>>,
    queue: OutboundQueue,
}

impl ReceiverSession {
    /// Create the session and start its send loop.
    pub fn new(id: String, pc: Arc<RTCPeerConnection>) -> Arc<Self> {
        let (queue, rx) = OutboundQueue::new();
        let session = Arc::new(Self {
            id,
            pc,
            channel: RwLock::new(None),
            queue,
        });
        tokio::spawn(Self::send_loop(session.clone(), rx));
        session
    }

    /// Non-blocking enqueue of a serialized record.
    pub fn enqueue(&self, message: String) -> bool {
        self.queue.offer(message)
    }

    /// Mark closed and stop the send loop.
    pub fn close(&self) {
        self.queue.close();
    }

    /// Adopt the consumer-created `timestamps` channel and install the
    /// clock-sync responder: inbound pings are answered on the same
    /// channel with the relay wall-clock; everything else is ignored.
    pub async fn install_channel(&self, dc: Arc<RTCDataChannel>) {
        let open_id = self.id.clone();
        dc.on_open(Box::new(move || {
            info!("receiver {open_id}: timestamps channel open");
            Box::pin(async {})
        }));

        let close_id = self.id.clone();
        dc.on_close(Box::new(move || {
            debug!("receiver {close_id}: timestamps channel closed");
            Box::pin(async {})
        }));

        let responder = dc.clone();
        let message_id = self.id.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let responder = responder.clone();
            let id = message_id.clone();
            Box::pin(async move {
                let Ok(text) = std::str::from_utf8(&msg.data) else {
                    return;
                };
                match serde_json::from_str::<ChannelMessage>(text) {
                    Ok(ChannelMessage::Ping { client_time }) => {
                        debug!("receiver {id}: clock-sync ping");
                        match serde_json::to_string(&ChannelMessage::pong(client_time)) {
                            Ok(body) => {
                                if let Err(e) = responder.send_text(body).await {
                                    warn!("receiver {id}: pong send failed: {e}");
                                }
                            }
                            Err(e) => warn!("receiver {id}: pong encode failed: {e}"),
                        }
                    }
                    // Only pings travel consumer -> relay.
                    Ok(_) | Err(_) => {}
                }
            })
        }));

        *self.channel.write().await = Some(dc);
    }

    /// Drain the queue into the side-channel. Records are written only
    /// while the channel exists and is open; otherwise they are dropped,
    /// which is acceptable because timestamps are advisory.
    async fn send_loop(session: Arc<Self>, mut rx: mpsc::Receiver<String>) {
        let mut send_error_logged = false;
        loop {
            let message = tokio::select! {
                message = rx.recv() => message,
                _ = session.queue.shutdown.notified() => None,
            };
            let Some(message) = message else { break };
            if session.queue.is_closed() {
                break;
            }

            let channel = session.channel.read().await.clone();
            let Some(channel) = channel else { continue };
            if channel.ready_state() != RTCDataChannelState::Open {
                continue;
            }

            if let Err(e) = channel.send_text(message).await {
                // The channel's own state machine fail-closes the
                // session when this is fatal.
                if !send_error_logged {
                    warn!("receiver {}: side-channel send failed: {e}", session.id);
                    send_error_logged = true;
                }
            }
        }
        debug!("receiver {}: send loop stopped", session.id);
    }
}

/// Drain receiver-originated RTCP on an outbound track sender so the
/// feedback path never backs up; the reports themselves are unused.
pub fn spawn_rtcp_drain(rtp_sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while rtp_sender.read(&mut buf).await.is_ok() {}
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drops_when_full() {
        let (queue, _rx) = OutboundQueue::new();
        for _ in 0..SEND_QUEUE_CAPACITY {
            assert!(queue.offer("x".to_string()));
        }
        // Capacity reached and nothing draining: the overflow is dropped.
        assert!(!queue.offer("overflow".to_string()));
    }

    #[test]
    fn closed_queue_rejects_everything() {
        let (queue, _rx) = OutboundQueue::new();
        assert!(queue.offer("x".to_string()));
        queue.close();
        assert!(queue.is_closed());
        assert!(!queue.offer("y".to_string()));
    }
}
