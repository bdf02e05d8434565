//! Upstream signaling socket (`/ws`).
//!
//! One long-lived duplex channel to the producer carrying offer/answer,
//! trickle ICE, application keepalives and the frame-timestamp stream.
//! The socket task is the sender session's lifeline: a read or write
//! failure, or 120 s of idleness, tears the whole session down. Every
//! outbound frame (answer, ICE candidate, pong, keepalive) goes through
//! this one task so writes are never interleaved.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};
use webrtc::peer_connection::RTCPeerConnection;

use crate::relay::signaling::SignalMessage;
use crate::relay::{peer, sender};
use crate::state::AppState;

/// Idle read deadline; extended on every inbound frame, including
/// framing-level pongs.
const READ_DEADLINE: Duration = Duration::from_secs(120);
/// Keepalive ping cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Per-write deadline.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Outbound signaling queue depth (answer, trickle ICE, pongs).
const SIGNAL_QUEUE_CAPACITY: usize = 32;

/// WebSocket upgrade handler for the producer's signaling connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_sender_socket(socket, state))
}

async fn handle_sender_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("producer signaling connected");

    let pc = match peer::new_peer(&state.config).await {
        Ok(pc) => pc,
        Err(e) => {
            warn!("sender peer creation failed: {e}");
            return;
        }
    };

    let (signal_tx, mut signal_rx) = mpsc::channel::<SignalMessage>(SIGNAL_QUEUE_CAPACITY);
    sender::install(state.clone(), pc.clone(), signal_tx.clone()).await;

    let (mut sink, mut stream) = socket.split();
    let mut keepalive = interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // the first tick fires immediately
    let mut read_deadline = Instant::now() + READ_DEADLINE;

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else {
                    info!("producer signaling closed");
                    break;
                };
                read_deadline = Instant::now() + READ_DEADLINE;
                match message {
                    Message::Text(text) => dispatch(&state, &pc, &signal_tx, &text).await,
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => {
                        info!("producer signaling closed");
                        break;
                    }
                    Message::Binary(_) => debug!("binary frame on signaling socket ignored"),
                }
            }
            outbound = signal_rx.recv() => {
                let Some(message) = outbound else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("signal encode failed: {e}");
                        continue;
                    }
                };
                match timeout(WRITE_DEADLINE, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("signal write failed: {e}");
                        break;
                    }
                    Err(_) => {
                        warn!("signal write timed out");
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                match timeout(WRITE_DEADLINE, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("keepalive failed: {e}");
                        break;
                    }
                    Err(_) => {
                        warn!("keepalive timed out");
                        break;
                    }
                }
            }
            _ = sleep_until(read_deadline) => {
                warn!("producer signaling idle for {}s, closing", READ_DEADLINE.as_secs());
                break;
            }
        }
    }

    // Existing receiver sessions fail naturally once their source ends.
    state.sender.clear(&pc).await;
    if let Err(e) = pc.close().await {
        debug!("sender peer close: {e}");
    }
    info!("producer disconnected");
}

/// Handle one inbound signaling frame. Malformed or unrecognized
/// messages are logged and skipped; the session keeps running.
async fn dispatch(
    state: &Arc<AppState>,
    pc: &Arc<RTCPeerConnection>,
    signal_tx: &mpsc::Sender<SignalMessage>,
    text: &str,
) {
    let message = match serde_json::from_str::<SignalMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("unparseable signaling message ignored: {e}");
            return;
        }
    };

    match message {
        SignalMessage::Offer { sdp } => {
            info!("processing producer offer");
            match sender::handle_offer(pc, sdp).await {
                Ok(answer) => {
                    if signal_tx.send(answer).await.is_err() {
                        warn!("signaling writer gone, answer dropped");
                    } else {
                        info!("answer queued for producer");
                    }
                }
                Err(e) => warn!("offer handling failed: {e}"),
            }
        }
        SignalMessage::IceCandidate { candidate } => {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                warn!("ICE candidate add failed: {e}");
            }
        }
        SignalMessage::Ping => {
            let _ = signal_tx.send(SignalMessage::Pong).await;
        }
        SignalMessage::FrameTimestamp(record) => match record.enrich() {
            Ok(enriched) => {
                state.receivers.broadcast(&enriched).await;
            }
            Err(e) => warn!("timestamp re-encode failed: {e}"),
        },
        SignalMessage::Answer { .. } | SignalMessage::Pong => {
            debug!("outbound-only message from producer ignored");
        }
    }
}
