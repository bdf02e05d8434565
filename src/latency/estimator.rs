//! Per-frame glass-to-glass latency composition.
//!
//! Three wall-clocks are in play: the producer's (stamped into
//! `capture_ms`), the relay's (stamped into `relay_time_ms` at ingress)
//! and the consumer's own. The relay→consumer offset is measured
//! directly from ping/pong exchanges; the producer→relay offset only
//! ever appears as an additive bias inside `relay_time_ms − capture_ms`
//! and is removed by the bias estimator. A fixed allowance covers the
//! display pipeline at the end.

use std::collections::{HashMap, VecDeque};

use crate::relay::signaling::{ChannelMessage, TimestampRecord};

use super::bias::CaptureBias;
use super::clock_sync::ClockSync;
use super::stats::{LatencySnapshot, LatencyStats};

/// Display pipeline allowance for a 60 Hz monitor.
const DISPLAY_DELAY_MS: f64 = 20.0;
/// Composite results outside (0, 2000] are measurement noise.
const MAX_PLAUSIBLE_MS: f64 = 2000.0;
/// Bound on the per-frame correlation buffer.
const FRAME_BUFFER_CAPACITY: usize = 200;

/// Wall-clock tuple retained per frame for off-path correlation (for
/// example against a presentation-time callback).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTimes {
    pub capture_ms: f64,
    pub relay_ms: f64,
    pub send_ms: Option<f64>,
    pub receive_ms: f64,
}

/// Bounded frame-identity → timestamps map, evicted oldest-first.
#[derive(Debug, Default)]
pub struct FrameTimestampBuffer {
    order: VecDeque<i64>,
    entries: HashMap<i64, FrameTimes>,
}

impl FrameTimestampBuffer {
    pub fn insert(&mut self, identity: i64, times: FrameTimes) {
        if !self.entries.contains_key(&identity) {
            if self.order.len() == FRAME_BUFFER_CAPACITY {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(identity);
        }
        self.entries.insert(identity, times);
    }

    pub fn get(&self, identity: i64) -> Option<&FrameTimes> {
        self.entries.get(&identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of feeding one side-channel message to the estimator.
#[derive(Debug, Clone, PartialEq)]
pub enum LatencyUpdate {
    /// A frame sample survived every filter; the figures moved.
    Latency(LatencySnapshot),
    /// A pong advanced the clock-sync estimate.
    ClockSync { offset_ms: f64, rtt_ms: f64 },
    /// Message parsed (or not) but produced no new figure.
    Ignored,
}

/// Consumer-side estimator tying the pieces together. Owned by the
/// active session: zeroed on start, dropped on stop.
#[derive(Debug, Default)]
pub struct LatencyEstimator {
    clock_sync: ClockSync,
    bias: CaptureBias,
    stats: LatencyStats,
    frames: FrameTimestampBuffer,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw side-channel payload. `now_ms` is the consumer
    /// wall-clock at receipt.
    pub fn on_message(&mut self, payload: &str, now_ms: f64) -> LatencyUpdate {
        match serde_json::from_str::<ChannelMessage>(payload) {
            Ok(ChannelMessage::Pong {
                client_time,
                server_time,
            }) => {
                let Some(client_time) = client_time else {
                    return LatencyUpdate::Ignored;
                };
                match self.clock_sync.on_pong(client_time, server_time, now_ms) {
                    Some(offset_ms) => LatencyUpdate::ClockSync {
                        offset_ms,
                        rtt_ms: now_ms - client_time,
                    },
                    None => LatencyUpdate::Ignored,
                }
            }
            Ok(ChannelMessage::FrameTimestamp(record)) => self.on_frame(&record, now_ms),
            Ok(ChannelMessage::Ping { .. }) | Err(_) => LatencyUpdate::Ignored,
        }
    }

    /// Compose the glass-to-glass figure for one frame record:
    /// relay→display leg from our own clock plus the sync offset,
    /// capture→relay leg from the stamped difference with bias
    /// correction, plus the display allowance.
    pub fn on_frame(&mut self, record: &TimestampRecord, now_ms: f64) -> LatencyUpdate {
        let (Some(capture_ms), Some(relay_ms)) = (record.capture_ms, record.relay_time_ms) else {
            return LatencyUpdate::Ignored;
        };

        if let Some(identity) = record.frame_identity() {
            self.frames.insert(
                identity,
                FrameTimes {
                    capture_ms,
                    relay_ms,
                    send_ms: record.send_time_ms,
                    receive_ms: now_ms,
                },
            );
        }

        let offset = if self.clock_sync.is_synced() {
            self.clock_sync.offset_ms()
        } else {
            0.0
        };
        let downlink = now_ms - relay_ms + offset;
        let uplink = self.bias.correct(relay_ms - capture_ms);
        let latency = uplink + downlink + DISPLAY_DELAY_MS;

        if latency <= 0.0 || latency > MAX_PLAUSIBLE_MS {
            return LatencyUpdate::Ignored;
        }
        match self.stats.record(latency) {
            Some(snapshot) => LatencyUpdate::Latency(snapshot),
            None => LatencyUpdate::Ignored,
        }
    }

    /// Zero every ring, estimate and buffer; used when a session
    /// (re)starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn clock_sync(&self) -> &ClockSync {
        &self.clock_sync
    }

    pub fn frames(&self) -> &FrameTimestampBuffer {
        &self.frames
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: i64, capture: f64, relay: f64) -> String {
        serde_json::to_string(&ChannelMessage::FrameTimestamp(TimestampRecord {
            frame_id: Some(id),
            capture_ms: Some(capture),
            relay_time_ms: Some(relay),
            ..Default::default()
        }))
        .unwrap()
    }

    fn pong(client: f64, server: f64) -> String {
        serde_json::to_string(&ChannelMessage::Pong {
            client_time: Some(client),
            server_time: server,
        })
        .unwrap()
    }

    #[test]
    fn composes_latency_before_clock_sync_with_zero_offset() {
        let mut estimator = LatencyEstimator::new();
        // capture -> relay 30 ms, relay -> here 40 ms.
        let update = estimator.on_message(&frame(1, 1_000.0, 1_030.0), 1_070.0);
        match update {
            LatencyUpdate::Latency(snap) => assert_eq!(snap.current, 30.0 + 40.0 + 20.0),
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn applies_the_sync_offset_once_synced() {
        let mut estimator = LatencyEstimator::new();
        // Relay clock leads ours by 500 ms; 10 exchanges with 20 ms rtt.
        for i in 0..10 {
            let sent = i as f64 * 100.0;
            let update = estimator.on_message(&pong(sent, sent + 10.0 + 500.0), sent + 20.0);
            assert!(matches!(update, LatencyUpdate::ClockSync { .. }));
        }
        assert!(estimator.clock_sync().is_synced());
        assert!((estimator.clock_sync().offset_ms() - 500.0).abs() < 1e-6);

        // Frame stamped 30 ms of uplink; the relay stamp is 500 ms ahead
        // of our clock, so the raw downlink reading alone would be
        // nonsense without the offset.
        let capture = 10_000.0;
        let relay = capture + 30.0 + 500.0; // relay clock
        let now = capture + 30.0 + 40.0; // our clock, 40 ms after ingress
        match estimator.on_frame(
            &TimestampRecord {
                frame_id: Some(9),
                capture_ms: Some(capture),
                relay_time_ms: Some(relay),
                ..Default::default()
            },
            now,
        ) {
            LatencyUpdate::Latency(snap) => {
                // uplink 530 raw (under the skew threshold, passes
                // through), downlink -460 + 500 = 40, display 20.
                assert!((snap.current - 590.0).abs() < 1e-6);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn skewed_capture_clock_is_bias_corrected() {
        let mut estimator = LatencyEstimator::new();
        // Producer clock trails the relay by 22 s.
        let mut last = LatencyUpdate::Ignored;
        for i in 0..30 {
            let relay = 50_000.0 + i as f64 * 33.0;
            let capture = relay - 22_000.0;
            last = estimator.on_frame(
                &TimestampRecord {
                    frame_num: Some(i),
                    capture_ms: Some(capture),
                    relay_time_ms: Some(relay),
                    ..Default::default()
                },
                relay + 15.0,
            );
        }
        // After the bias settles every figure is plausible.
        match last {
            LatencyUpdate::Latency(snap) => {
                assert!(snap.current > 0.0 && snap.current <= 2_000.0);
                assert!((snap.current - (10.0 + 15.0 + 20.0)).abs() < 1.0);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn implausible_composites_are_dropped() {
        let mut estimator = LatencyEstimator::new();
        // Received "before" the relay stamp: negative composite.
        assert_eq!(
            estimator.on_message(&frame(1, 1_000.0, 1_030.0), 900.0),
            LatencyUpdate::Ignored
        );
        // Five-second composite: beyond plausible.
        assert_eq!(
            estimator.on_message(&frame(2, 1_000.0, 2_000.0), 6_000.0),
            LatencyUpdate::Ignored
        );
        assert_eq!(estimator.snapshot().samples, 0);
    }

    #[test]
    fn records_without_both_stamps_are_ignored() {
        let mut estimator = LatencyEstimator::new();
        let update = estimator.on_frame(
            &TimestampRecord {
                frame_num: Some(1),
                capture_ms: Some(1_000.0),
                ..Default::default()
            },
            1_100.0,
        );
        assert_eq!(update, LatencyUpdate::Ignored);
    }

    #[test]
    fn pings_and_garbage_are_ignored() {
        let mut estimator = LatencyEstimator::new();
        assert_eq!(
            estimator.on_message(r#"{"type":"ping","client_time":1.0}"#, 2.0),
            LatencyUpdate::Ignored
        );
        assert_eq!(estimator.on_message("not json", 2.0), LatencyUpdate::Ignored);
        assert_eq!(
            estimator.on_message(r#"{"type":"mystery"}"#, 2.0),
            LatencyUpdate::Ignored
        );
    }

    #[test]
    fn frame_buffer_keeps_the_newest_two_hundred() {
        let mut estimator = LatencyEstimator::new();
        for i in 0..250 {
            let capture = 1_000.0 + i as f64 * 33.0;
            estimator.on_frame(
                &TimestampRecord {
                    frame_id: Some(i),
                    capture_ms: Some(capture),
                    relay_time_ms: Some(capture + 30.0),
                    ..Default::default()
                },
                capture + 70.0,
            );
        }
        assert_eq!(estimator.frames().len(), 200);
        assert!(estimator.frames().get(49).is_none());
        assert!(estimator.frames().get(50).is_some());
        assert!(estimator.frames().get(249).is_some());
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut estimator = LatencyEstimator::new();
        estimator.on_message(&frame(1, 1_000.0, 1_030.0), 1_070.0);
        estimator.on_message(&pong(0.0, 10.0), 20.0);
        assert!(!estimator.frames().is_empty());

        estimator.reset();
        assert_eq!(estimator.snapshot(), LatencySnapshot::default());
        assert!(estimator.frames().is_empty());
        assert_eq!(estimator.clock_sync().accepted(), 0);
    }
}
