//! Signaling and side-channel message types.
//!
//! Both transports carry JSON objects discriminated by a `type` field.
//! The sets are closed: a message with an unrecognized `type` fails to
//! parse and the caller logs and drops it instead of failing the session.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::clock;

/// Messages exchanged on the upstream signaling socket.
///
/// Inbound from the producer: `Offer`, `IceCandidate`, `Ping`,
/// `FrameTimestamp`. Outbound to the producer: `Answer`, `IceCandidate`,
/// `Pong`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    #[serde(rename = "offer")]
    Offer { sdp: String },
    #[serde(rename = "answer")]
    Answer { sdp: String },
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: RTCIceCandidateInit },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    /// Per-frame capture timestamp from the producer, forwarded to every
    /// receiver side-channel after ingress stamping.
    #[serde(rename = "frame_timestamp")]
    FrameTimestamp(TimestampRecord),
}

/// Messages exchanged on a receiver's `timestamps` side-channel.
/// Consumers send `Ping`; the relay replies `Pong` and fans out
/// `FrameTimestamp` records. Always text-framed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    #[serde(rename = "frame_timestamp")]
    FrameTimestamp(TimestampRecord),
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_time: Option<f64>,
    },
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_time: Option<f64>,
        server_time: f64,
    },
}

impl ChannelMessage {
    /// Clock-sync reply: echo the consumer's stamp, add ours.
    pub fn pong(client_time: Option<f64>) -> Self {
        ChannelMessage::Pong {
            client_time,
            server_time: clock::epoch_ms(),
        }
    }
}

/// Per-frame timestamp record. Everything is optional on the wire; which
/// of the identity fields the producer stamps varies by deployment, so
/// consumers accept whichever is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimestampRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_num: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
    /// Producer wall-clock at capture, ms since epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_ms: Option<f64>,
    /// Producer wall-clock just before transmit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_time_ms: Option<f64>,
    /// Relay wall-clock at ingress; stamped by [`TimestampRecord::enrich`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time: Option<f64>,
}

impl TimestampRecord {
    /// Producer frame identity: `frame_id`, else `frame_num`, else `seq`.
    pub fn frame_identity(&self) -> Option<i64> {
        self.frame_id.or(self.frame_num).or(self.seq)
    }

    /// Stamp the relay ingress wall-clock and re-serialize for fan-out.
    pub fn enrich(mut self) -> serde_json::Result<String> {
        self.relay_time_ms = Some(clock::epoch_ms());
        serde_json::to_string(&ChannelMessage::FrameTimestamp(self))
    }
}

/// Downstream offer POST body: `{sdp, type:"offer"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Downstream answer body: `{sdp, type:"answer"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AnswerResponse {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".to_string(),
        }
    }
}

/// Advisory record returned by `GET /config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub sender_url: String,
    /// Whether a producer is currently connected.
    pub status: bool,
    pub num_receivers: usize,
    pub codec: String,
    pub latency_supported: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_producer_offer() {
        let msg: SignalMessage =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0\r\n"}"#).unwrap();
        assert!(matches!(msg, SignalMessage::Offer { sdp } if sdp == "v=0\r\n"));
    }

    #[test]
    fn parses_trickle_ice_candidate() {
        let msg: SignalMessage = serde_json::from_str(
            r#"{"type":"ice-candidate","candidate":{"candidate":"candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        match msg {
            SignalMessage::IceCandidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_frame_timestamp_with_partial_fields() {
        let msg: SignalMessage = serde_json::from_str(
            r#"{"type":"frame_timestamp","frame_num":42,"capture_ms":1700000000123.5,"send_time_ms":1700000000125.0}"#,
        )
        .unwrap();
        match msg {
            SignalMessage::FrameTimestamp(record) => {
                assert_eq!(record.frame_num, Some(42));
                assert_eq!(record.capture_ms, Some(1_700_000_000_123.5));
                assert_eq!(record.relay_time_ms, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        assert!(serde_json::from_str::<SignalMessage>(r#"{"type":"telemetry","x":1}"#).is_err());
        assert!(serde_json::from_str::<ChannelMessage>(r#"{"type":"stats"}"#).is_err());
    }

    #[test]
    fn keepalive_ping_parses_as_unit() {
        let msg: SignalMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, SignalMessage::Ping));
    }

    #[test]
    fn frame_identity_prefers_frame_id_then_frame_num_then_seq() {
        let record = TimestampRecord {
            seq: Some(1),
            frame_num: Some(2),
            frame_id: Some(3),
            ..Default::default()
        };
        assert_eq!(record.frame_identity(), Some(3));

        let record = TimestampRecord {
            seq: Some(1),
            frame_num: Some(2),
            ..Default::default()
        };
        assert_eq!(record.frame_identity(), Some(2));

        let record = TimestampRecord {
            seq: Some(1),
            ..Default::default()
        };
        assert_eq!(record.frame_identity(), Some(1));
        assert_eq!(TimestampRecord::default().frame_identity(), None);
    }

    #[test]
    fn enrich_stamps_relay_ingress_time() {
        let record = TimestampRecord {
            frame_num: Some(7),
            capture_ms: Some(1000.0),
            ..Default::default()
        };
        let before = crate::clock::epoch_ms();
        let enriched = record.enrich().unwrap();
        let after = crate::clock::epoch_ms();

        let parsed: ChannelMessage = serde_json::from_str(&enriched).unwrap();
        match parsed {
            ChannelMessage::FrameTimestamp(record) => {
                let stamp = record.relay_time_ms.unwrap();
                assert!(stamp >= before && stamp <= after);
                assert_eq!(record.frame_num, Some(7));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(enriched.contains(r#""type":"frame_timestamp""#));
    }

    #[test]
    fn pong_echoes_client_time() {
        let pong = ChannelMessage::pong(Some(123.5));
        let body = serde_json::to_string(&pong).unwrap();
        assert!(body.contains(r#""type":"pong""#));
        assert!(body.contains(r#""client_time":123.5"#));
        assert!(body.contains("server_time"));
    }

    #[test]
    fn answer_response_carries_answer_type() {
        let body = serde_json::to_string(&AnswerResponse::answer("v=0")).unwrap();
        assert!(body.contains(r#""type":"answer""#));
    }
}
