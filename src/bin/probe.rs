//! Headless consumer probe.
//!
//! Connects to a running relay the same way the browser page does:
//! fetches the advisory config, creates the `timestamps` data channel
//! *before* generating the offer, POSTs the offer, then receives the
//! forwarded video track while running the clock-sync probe loop and the
//! glass-to-glass latency estimator. The figures a viewer page would
//! display are logged instead.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use glass_relay::clock;
use glass_relay::config::RelayConfig;
use glass_relay::latency::{LatencyEstimator, LatencyUpdate, ProbeSchedule};
use glass_relay::relay::peer;
use glass_relay::relay::signaling::{AnswerResponse, ChannelMessage, ConfigResponse, OfferRequest};
use glass_relay::relay::TIMESTAMP_CHANNEL_LABEL;

/// Snapshots are logged once per this many accepted samples.
const STATS_LOG_STRIDE: usize = 30;

/// glass-probe command line arguments
#[derive(Parser, Debug)]
#[command(name = "glass-probe")]
#[command(version, about = "Headless glass-to-glass latency probe", long_about = None)]
struct CliArgs {
    /// Relay base URL
    #[arg(long, value_name = "URL", default_value = "http://127.0.0.1:8081")]
    relay: String,

    /// STUN server URL (repeatable; defaults to Google STUN)
    #[arg(long = "stun", value_name = "URL")]
    stun_servers: Vec<String>,

    /// Exit after this many seconds (runs until ctrl-c when absent)
    #[arg(long, value_name = "SECONDS")]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging();

    let http = reqwest::Client::new();

    // Advisory reachability check; the offer below is the real gate.
    match http.get(format!("{}/config", args.relay)).send().await {
        Ok(response) => match response.json::<ConfigResponse>().await {
            Ok(cfg) => info!(
                "relay config: sender_connected={} receivers={} codec={} latency_supported={}",
                cfg.status, cfg.num_receivers, cfg.codec, cfg.latency_supported
            ),
            Err(e) => debug!("config response not parseable: {e}"),
        },
        Err(e) => warn!("relay config unreachable: {e}"),
    }

    let mut config = RelayConfig::default();
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers;
    }
    let pc = peer::new_peer(&config).await?;

    let estimator = Arc::new(Mutex::new(LatencyEstimator::new()));

    // The channel must exist before the offer is generated so the SDP
    // carries an application m-section; the relay adopts the channel
    // and never creates its own.
    let dc = pc.create_data_channel(TIMESTAMP_CHANNEL_LABEL, None).await?;
    install_channel_handlers(&dc, estimator.clone());

    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await?;

    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        Box::pin(async move {
            info!(
                "video track: {} (ssrc {})",
                track.codec().capability.mime_type,
                track.ssrc()
            );
            tokio::spawn(async move {
                let mut packets: u64 = 0;
                while track.read_rtp().await.is_ok() {
                    packets += 1;
                    if packets % 500 == 0 {
                        debug!("{packets} RTP packets received");
                    }
                }
                info!("video track ended after {packets} packets");
            });
        })
    }));

    pc.on_peer_connection_state_change(Box::new(|s: RTCPeerConnectionState| {
        Box::pin(async move {
            info!("connection state: {s}");
        })
    }));

    // The downstream exchange is one-shot: gather candidates first, then
    // POST the complete offer.
    let offer = pc.create_offer(None).await?;
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await?;
    let _ = tokio::time::timeout(Duration::from_secs(3), gathered.recv()).await;
    let local = pc
        .local_description()
        .await
        .context("no local description after offer")?;

    let response = http
        .post(format!("{}/offer", args.relay))
        .json(&OfferRequest {
            sdp: local.sdp,
            kind: "offer".to_string(),
        })
        .send()
        .await
        .context("offer POST failed")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // Typically "Video not ready" - start the producer, then retry.
        bail!("relay rejected offer ({status}): {body}");
    }

    let answer: AnswerResponse = response.json().await.context("answer parse failed")?;
    pc.set_remote_description(RTCSessionDescription::answer(answer.sdp)?)
        .await?;
    info!("answer applied, waiting for media");

    match args.duration {
        Some(secs) => sleep(Duration::from_secs(secs)).await,
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    info!("stopping");
    if let Ok(estimator) = estimator.lock() {
        let snap = estimator.snapshot();
        info!(
            "final: current={:.1}ms avg={:.1}ms min={:.1}ms max={:.1}ms ({} samples, {} frames buffered)",
            snap.current,
            snap.avg,
            snap.min,
            snap.max,
            snap.samples,
            estimator.frames().len()
        );
    }
    pc.close().await?;
    Ok(())
}

/// Wire the side-channel: the probe loop starts on open, and every
/// inbound payload feeds the estimator.
fn install_channel_handlers(dc: &Arc<RTCDataChannel>, estimator: Arc<Mutex<LatencyEstimator>>) {
    let ping_channel = dc.clone();
    dc.on_open(Box::new(move || {
        info!("timestamps channel open, starting clock-sync probes");
        let channel = ping_channel.clone();
        Box::pin(async move {
            let mut schedule = ProbeSchedule::new();
            loop {
                let ping = ChannelMessage::Ping {
                    client_time: Some(clock::epoch_ms()),
                };
                let body = match serde_json::to_string(&ping) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("ping encode failed: {e}");
                        break;
                    }
                };
                if channel.send_text(body).await.is_err() {
                    debug!("ping send failed, probe loop stopped");
                    break;
                }
                sleep(schedule.next_delay()).await;
            }
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let estimator = estimator.clone();
        Box::pin(async move {
            let Ok(text) = std::str::from_utf8(&msg.data) else {
                return;
            };
            let update = match estimator.lock() {
                Ok(mut estimator) => estimator.on_message(text, clock::epoch_ms()),
                Err(_) => return,
            };
            match update {
                LatencyUpdate::Latency(snap) => {
                    if snap.samples % STATS_LOG_STRIDE == 0 {
                        info!(
                            "glass-to-glass: current={:.1}ms avg={:.1}ms min={:.1}ms max={:.1}ms stddev={:.1}ms",
                            snap.current, snap.avg, snap.min, snap.max, snap.stddev
                        );
                    }
                }
                LatencyUpdate::ClockSync { offset_ms, rtt_ms } => {
                    debug!("clock sync: offset={offset_ms:.1}ms rtt={rtt_ms:.1}ms");
                }
                LatencyUpdate::Ignored => {}
            }
        })
    }));
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("glass_probe=info,glass_relay=info,webrtc=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
