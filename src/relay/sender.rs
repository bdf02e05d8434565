//! Upstream sender session: answers the producer's offer, forwards the
//! inbound H.264 track into a locally-owned forwarding track, and
//! solicits keyframes until the first one goes through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;
use webrtc::Error as RtcError;

use super::h264;
use super::receiver::spawn_rtcp_drain;
use super::signaling::SignalMessage;
use crate::error::Result;
use crate::state::AppState;

/// Forwarding track codec parameters (RFC 6184 baseline).
pub const H264_CLOCK_RATE: u32 = 90_000;
pub const H264_FMTP: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Delay before the first keyframe solicitation after track creation.
const INITIAL_PLI_DELAY: Duration = Duration::from_millis(500);
/// Solicitation cadence until the first keyframe is seen.
const PLI_INTERVAL: Duration = Duration::from_secs(3);
/// Unexpected outbound write errors are logged once per this many packets.
const WRITE_ERROR_LOG_STRIDE: u64 = 100;
const FORWARD_LOG_STRIDE: u64 = 500;

/// Process-wide sender state: at most one upstream producer at a time.
/// The peer, the forwarding track, the inbound SSRC and the connected
/// flag all live behind the one mutex.
#[derive(Default)]
pub struct SenderSlot {
    inner: Mutex<SenderShared>,
}

#[derive(Default)]
struct SenderShared {
    pc: Option<Arc<RTCPeerConnection>>,
    video_track: Option<Arc<TrackLocalStaticRTP>>,
    video_ssrc: Option<u32>,
    connected: bool,
}

impl SenderSlot {
    /// Install the upstream peer on signaling connect.
    pub async fn install(&self, pc: Arc<RTCPeerConnection>) {
        let mut inner = self.inner.lock().await;
        inner.pc = Some(pc);
        inner.connected = true;
    }

    /// Publish the forwarding track once the first video track arrives.
    /// Returns false when a track was already published this session.
    pub async fn publish_track(&self, track: Arc<TrackLocalStaticRTP>, ssrc: u32) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.video_track.is_some() {
            return false;
        }
        inner.video_track = Some(track);
        inner.video_ssrc = Some(ssrc);
        true
    }

    /// Clear the slot on upstream disconnect, but only while it still
    /// belongs to this peer; a replacement producer may already have
    /// taken it over. Existing receiver sessions are left to fail
    /// naturally when their source ends.
    pub async fn clear(&self, pc: &Arc<RTCPeerConnection>) {
        let mut inner = self.inner.lock().await;
        if inner
            .pc
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, pc))
        {
            inner.pc = None;
            inner.video_track = None;
            inner.video_ssrc = None;
            inner.connected = false;
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn video_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.inner.lock().await.video_track.clone()
    }

    async fn pli_target(&self) -> Option<(Arc<RTCPeerConnection>, u32)> {
        let inner = self.inner.lock().await;
        Some((inner.pc.clone()?, inner.video_ssrc?))
    }

    /// Solicit a keyframe from the producer on its inbound video SSRC.
    /// A no-op while no producer track is live; failures are left to the
    /// next solicitation.
    pub async fn request_keyframe(&self) {
        let Some((pc, ssrc)) = self.pli_target().await else {
            return;
        };
        if let Err(e) = write_pli(&pc, ssrc).await {
            warn!("keyframe request failed: {e}");
        }
    }
}

/// Install upstream observers on a freshly created sender peer.
/// `signal_tx` feeds the signaling socket's single writer task.
pub async fn install(
    state: Arc<AppState>,
    pc: Arc<RTCPeerConnection>,
    signal_tx: mpsc::Sender<SignalMessage>,
) {
    state.sender.install(pc.clone()).await;

    // Trickle ICE back to the producer.
    let ice_tx = signal_tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let ice_tx = ice_tx.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                debug!("sender ICE gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    if ice_tx
                        .send(SignalMessage::IceCandidate { candidate: init })
                        .await
                        .is_err()
                    {
                        debug!("signaling writer gone, ICE candidate dropped");
                    }
                }
                Err(e) => warn!("ICE candidate serialization failed: {e}"),
            }
        })
    }));

    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        Box::pin(async move {
            info!("sender connection state: {s}");
        })
    }));

    let track_state = state.clone();
    let track_pc = pc.clone();
    pc.on_track(Box::new(move |remote, _receiver, _transceiver| {
        let state = track_state.clone();
        let pc = track_pc.clone();
        Box::pin(async move {
            let codec = remote.codec();
            info!(
                "sender track: {} {} (pt {})",
                remote.kind(),
                codec.capability.mime_type,
                remote.payload_type()
            );
            if remote.kind() == RTPCodecType::Video {
                start_forwarding(state, pc, remote).await;
            }
        })
    }));
}

/// Apply the producer's offer and produce the answer to send back.
/// Trickle candidates follow separately.
pub async fn handle_offer(pc: &Arc<RTCPeerConnection>, sdp: String) -> Result<SignalMessage> {
    if sdp.contains("H264") {
        debug!("H264 codec present in sender offer");
    } else {
        warn!("no H264 codec in sender offer");
    }

    let offer = RTCSessionDescription::offer(sdp)?;
    pc.set_remote_description(offer).await?;

    let answer = pc.create_answer(None).await?;
    pc.set_local_description(answer.clone()).await?;

    Ok(SignalMessage::Answer { sdp: answer.sdp })
}

/// First inbound video track: materialize the forwarding track, attach
/// it to already-connected receivers, and run the keyframe policy plus
/// the RTP forward loop until the inbound track ends.
async fn start_forwarding(state: Arc<AppState>, pc: Arc<RTCPeerConnection>, remote: Arc<TrackRemote>) {
    let forward = Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: H264_CLOCK_RATE,
            sdp_fmtp_line: H264_FMTP.to_owned(),
            ..Default::default()
        },
        "video".to_owned(),
        "stream".to_owned(),
    ));

    let ssrc = remote.ssrc();
    if !state.sender.publish_track(forward.clone(), ssrc).await {
        warn!("ignoring additional video track from sender");
        return;
    }
    info!("forwarding H264 track published");

    // Receivers that connected before the track existed attach it now;
    // later arrivals attach at session creation instead.
    for receiver in state.receivers.snapshot().await {
        if receiver.pc.connection_state() == RTCPeerConnectionState::Connected {
            match receiver.pc.add_track(forward.clone()).await {
                Ok(rtp_sender) => spawn_rtcp_drain(rtp_sender),
                Err(e) => warn!("add track to {} failed: {e}", receiver.id),
            }
        }
    }

    // One solicitation shortly after the track exists, so the first
    // consumer is not stuck waiting on the encoder's GOP cadence.
    {
        let pc = pc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(INITIAL_PLI_DELAY).await;
            if let Err(e) = write_pli(&pc, ssrc).await {
                warn!("initial keyframe request failed: {e}");
            } else {
                debug!("initial keyframe requested");
            }
        });
    }

    // Solicit periodically until the first keyframe is seen.
    let has_keyframe = Arc::new(AtomicBool::new(false));
    {
        let pc = pc.clone();
        let has_keyframe = has_keyframe.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PLI_INTERVAL);
            ticker.tick().await; // the first tick is immediate
            loop {
                ticker.tick().await;
                if has_keyframe.load(Ordering::Acquire) {
                    break;
                }
                match pc.connection_state() {
                    RTCPeerConnectionState::Connected => {
                        if let Err(e) = write_pli(&pc, ssrc).await {
                            warn!("keyframe request failed: {e}");
                        }
                    }
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => break,
                    _ => {}
                }
            }
        });
    }

    // Forward RTP until the inbound track ends. Plain passthrough; the
    // downstream peers consume the forwarding track directly.
    tokio::spawn(async move {
        let mut packets: u64 = 0;
        loop {
            let (packet, _attributes) = match remote.read_rtp().await {
                Ok(read) => read,
                Err(e) => {
                    debug!("sender RTP read ended: {e}");
                    break;
                }
            };
            packets += 1;

            if !has_keyframe.load(Ordering::Acquire) && h264::is_keyframe(&packet.payload) {
                info!("first H264 keyframe at packet #{packets}");
                has_keyframe.store(true, Ordering::Release);
            }

            if packets % FORWARD_LOG_STRIDE == 0 {
                debug!("{packets} H264 packets forwarded");
            }

            if let Err(e) = forward.write_rtp(&packet).await {
                if matches!(e, RtcError::ErrClosedPipe) {
                    // A consumer went away mid-write; nothing to do.
                    continue;
                }
                if packets % WRITE_ERROR_LOG_STRIDE == 0 {
                    warn!("forwarding write failed: {e}");
                }
            }
        }
    });
}

async fn write_pli(pc: &Arc<RTCPeerConnection>, media_ssrc: u32) -> Result<()> {
    pc.write_rtcp(&[Box::new(PictureLossIndication {
        sender_ssrc: 0,
        media_ssrc,
    })])
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::relay::peer;

    #[tokio::test]
    async fn slot_lifecycle() {
        let slot = SenderSlot::default();
        assert!(!slot.is_connected().await);
        assert!(slot.video_track().await.is_none());

        let pc = peer::new_peer(&RelayConfig::default()).await.unwrap();
        slot.install(pc.clone()).await;
        assert!(slot.is_connected().await);

        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: H264_CLOCK_RATE,
                sdp_fmtp_line: H264_FMTP.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "stream".to_owned(),
        ));
        assert!(slot.publish_track(track.clone(), 1234).await);
        // The forwarding track is created exactly once per session.
        assert!(!slot.publish_track(track, 5678).await);
        assert!(slot.video_track().await.is_some());

        // A stale peer must not clear the slot out from under the
        // installed one.
        let stale = peer::new_peer(&RelayConfig::default()).await.unwrap();
        slot.clear(&stale).await;
        assert!(slot.is_connected().await);

        slot.clear(&pc).await;
        assert!(!slot.is_connected().await);
        assert!(slot.video_track().await.is_none());
    }

    #[tokio::test]
    async fn keyframe_request_without_sender_is_a_noop() {
        let slot = SenderSlot::default();
        slot.request_keyframe().await;
    }
}
