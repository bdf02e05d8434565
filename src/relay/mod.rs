//! WebRTC relay core: one upstream producer, many downstream consumers.
//!
//! Architecture:
//! ```text
//! Producer ──ws signaling (offer/ICE/keepalive/frame timestamps)──> Relay
//!     │                                                              │
//!     └── H264 RTP ──> forwarding track ──┬──> receiver peer (video)
//!                                         ├──> receiver peer (video)
//!                                         ⋮
//! frame timestamps ──> per-receiver queue ──> `timestamps` side-channel
//! clock-sync ping <── side-channel <── consumer; pong carries relay time
//! ```
//!
//! The forwarding track has one writer (the sender's RTP read task) and
//! is shared by every receiver peer. Timestamp fan-out never blocks and
//! never exerts back-pressure on the producer.

pub mod h264;
pub mod peer;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod signaling;

pub use receiver::{ReceiverSession, TIMESTAMP_CHANNEL_LABEL};
pub use registry::ReceiverRegistry;
pub use sender::SenderSlot;
pub use signaling::{
    AnswerResponse, ChannelMessage, ConfigResponse, OfferRequest, SignalMessage, TimestampRecord,
};
