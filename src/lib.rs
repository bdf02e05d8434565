//! One-to-many WebRTC video relay with a glass-to-glass latency
//! side-channel.
//!
//! A single producer pushes one live H.264 RTP stream plus per-frame
//! capture timestamps over a persistent signaling socket; any number of
//! consumers receive the forwarded track plus the timestamp stream on a
//! reliable ordered data channel, and measure end-to-end latency against
//! clock-sync probes answered by the relay.
//!
//! ```text
//! producer ──/ws──> relay ──/offer──> consumers
//!              │ video: inbound track -> forwarding track -> N peers
//!              │ timestamps: enrich with relay time -> fan out
//!              └ clock sync: per-consumer ping/pong on `timestamps`
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod latency;
pub mod relay;
pub mod state;
pub mod web;
