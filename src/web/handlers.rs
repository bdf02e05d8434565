//! HTTP handlers: downstream offer exchange, advisory config, health.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::clock;
use crate::error::{RelayError, Result};
use crate::relay::peer;
use crate::relay::receiver::{spawn_rtcp_drain, ReceiverSession, TIMESTAMP_CHANNEL_LABEL};
use crate::relay::signaling::{AnswerResponse, ConfigResponse, OfferRequest};
use crate::state::AppState;

/// Bound on downstream ICE gathering; past it the answer ships whatever
/// candidates were collected.
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(3);

/// `POST /offer` — one-shot downstream negotiation.
///
/// The consumer must create the `timestamps` channel before generating
/// its offer so the SDP already carries an application m-section; the
/// relay only ever adopts that channel through the data-channel
/// callback. A relay-created channel would sit in `connecting` forever
/// because the negotiation it needs has already concluded.
pub async fn offer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OfferRequest>,
) -> Result<Json<AnswerResponse>> {
    if request.kind != "offer" {
        return Err(RelayError::InvalidOffer);
    }

    if !state.sender.is_connected().await {
        return Err(RelayError::NotReady);
    }
    let Some(video_track) = state.sender.video_track().await else {
        return Err(RelayError::NotReady);
    };

    let pc = peer::new_peer(&state.config).await?;
    let id = format!("receiver-{}", clock::unix_nanos());
    info!("creating {id}");

    let session = ReceiverSession::new(id.clone(), pc.clone());

    // Adopt the consumer-created side-channel; anything else is noise.
    // The callback holds a weak reference so the peer does not keep its
    // own session alive after removal.
    let channel_session = Arc::downgrade(&session);
    pc.on_data_channel(Box::new(move |dc| {
        let session = channel_session.clone();
        Box::pin(async move {
            let Some(session) = session.upgrade() else {
                return;
            };
            if dc.label() == TIMESTAMP_CHANNEL_LABEL {
                debug!("receiver {}: timestamps channel announced", session.id);
                session.install_channel(dc).await;
            } else {
                warn!(
                    "receiver {}: unexpected channel '{}' ignored",
                    session.id,
                    dc.label()
                );
            }
        })
    }));

    state.receivers.insert(session).await;

    // Lifecycle: keyframe solicitation on connect, removal on failure.
    let lifecycle_state = state.clone();
    let lifecycle_id = id.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let state = lifecycle_state.clone();
        let id = lifecycle_id.clone();
        Box::pin(async move {
            debug!("receiver {id} state: {s}");
            match s {
                RTCPeerConnectionState::Connected => {
                    info!("receiver {id} connected");
                    // A late joiner should not have to wait out the
                    // periodic solicitation interval.
                    state.sender.request_keyframe().await;
                }
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                    state.receivers.remove(&id).await;
                }
                _ => {}
            }
        })
    }));

    match negotiate(&pc, &id, video_track, request.sdp).await {
        Ok(answer) => {
            info!("answer sent to {id}");
            Ok(Json(answer))
        }
        Err(e) => {
            // Unwind the half-built session instead of stranding it.
            state.receivers.remove(&id).await;
            Err(e)
        }
    }
}

/// Attach the forwarding track and complete the offer/answer exchange,
/// with ICE gathered up-front so the answer is self-contained.
async fn negotiate(
    pc: &Arc<RTCPeerConnection>,
    id: &str,
    video_track: Arc<TrackLocalStaticRTP>,
    sdp: String,
) -> Result<AnswerResponse> {
    // Outbound video plus a drain for receiver-originated RTCP.
    let rtp_sender = pc.add_track(video_track).await?;
    spawn_rtcp_drain(rtp_sender);

    if sdp.contains("m=application") {
        debug!("receiver {id}: data channel present in offer");
    } else {
        warn!("receiver {id}: no data channel in offer, timestamps will not flow");
    }

    let offer = RTCSessionDescription::offer(sdp)?;
    pc.set_remote_description(offer).await?;
    let answer = pc.create_answer(None).await?;

    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await?;
    if timeout(ICE_GATHERING_TIMEOUT, gathered.recv()).await.is_err() {
        debug!("receiver {id}: ICE gathering timed out, replying with partial candidates");
    }

    let local = pc
        .local_description()
        .await
        .ok_or_else(|| RelayError::Internal("no local description after answer".to_string()))?;

    Ok(AnswerResponse::answer(local.sdp))
}

/// `GET /config` — advisory reachability record for consumers.
pub async fn config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        sender_url: state.config.sender_url.clone(),
        status: state.sender.is_connected().await,
        num_receivers: state.receivers.len().await,
        codec: "H264".to_string(),
        latency_supported: true,
    })
}

/// `GET /health`
pub async fn health() -> &'static str {
    concat!(
        "glass-relay ",
        env!("CARGO_PKG_VERSION"),
        " - H264 relay with glass-to-glass latency measurement"
    )
}
