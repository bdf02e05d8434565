//! Relay↔consumer clock offset estimation from ping/pong round trips.
//!
//! Each exchange yields `offset = server_time + rtt/2 − receive_time`,
//! the signed difference between the relay's wall-clock and ours under a
//! symmetric-path assumption. Slow round trips say little about the
//! offset, so the estimate uses only the lowest-RTT half of a bounded
//! sample ring.

use std::collections::VecDeque;
use std::time::Duration;

/// Round trips slower than this are rejected outright.
const MAX_RTT_MS: f64 = 500.0;
/// Accepted samples before exponential smoothing takes over from direct
/// median assignment.
const DIRECT_SAMPLES: usize = 20;
/// Ring bound: twice the direct-assignment window.
const MAX_SAMPLES: usize = 2 * DIRECT_SAMPLES;
/// Weight of the newest median once smoothing is active.
const SMOOTHING_GAIN: f64 = 0.2;

/// Pings fired back-to-back when the side-channel opens.
pub const BURST_PINGS: u32 = 10;
const BURST_INTERVAL: Duration = Duration::from_millis(100);
const STEADY_INTERVAL: Duration = Duration::from_secs(3);

/// One accepted round trip.
#[derive(Debug, Clone, Copy)]
pub struct ClockSyncSample {
    /// Signed relay−consumer offset implied by this exchange.
    pub offset_ms: f64,
    pub rtt_ms: f64,
    /// Consumer wall-clock when the pong landed.
    pub at_ms: f64,
}

/// Estimator for the signed offset between the relay's wall-clock and
/// the consumer's.
#[derive(Debug, Default)]
pub struct ClockSync {
    samples: VecDeque<ClockSyncSample>,
    accepted: usize,
    offset_ms: f64,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one pong. `receive_ms` is the consumer wall-clock at
    /// receipt. Returns the updated offset, or None when the sample was
    /// rejected.
    pub fn on_pong(
        &mut self,
        client_time_ms: f64,
        server_time_ms: f64,
        receive_ms: f64,
    ) -> Option<f64> {
        let rtt = receive_ms - client_time_ms;
        if !(0.0..=MAX_RTT_MS).contains(&rtt) {
            return None;
        }
        let one_way = rtt / 2.0;
        let offset = server_time_ms + one_way - receive_ms;

        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(ClockSyncSample {
            offset_ms: offset,
            rtt_ms: rtt,
            at_ms: receive_ms,
        });
        self.accepted += 1;

        let median = self.best_half_median();
        self.offset_ms = if self.accepted <= DIRECT_SAMPLES {
            median
        } else {
            (1.0 - SMOOTHING_GAIN) * self.offset_ms + SMOOTHING_GAIN * median
        };
        Some(self.offset_ms)
    }

    /// Median offset of the ⌈n/2⌉ samples with the lowest RTT.
    fn best_half_median(&self) -> f64 {
        let mut by_rtt: Vec<&ClockSyncSample> = self.samples.iter().collect();
        by_rtt.sort_by(|a, b| a.rtt_ms.total_cmp(&b.rtt_ms));
        let keep = by_rtt.len().div_ceil(2);
        let mut offsets: Vec<f64> = by_rtt[..keep].iter().map(|s| s.offset_ms).collect();
        median_in_place(&mut offsets)
    }

    /// Signed relay−consumer offset in milliseconds.
    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    /// True once enough pongs have landed for the offset to be usable in
    /// the latency composition. The initial burst is sized to get here
    /// within the first second after channel open.
    pub fn is_synced(&self) -> bool {
        self.accepted >= BURST_PINGS as usize
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Median of a slice, sorting it in place. Empty input yields 0.
pub(crate) fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Ping pacing: a short burst when the side-channel opens, then a slow
/// steady state.
#[derive(Debug, Default)]
pub struct ProbeSchedule {
    sent: u32,
}

impl ProbeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one ping just sent and return the delay before the
    /// next one.
    pub fn next_delay(&mut self) -> Duration {
        self.sent += 1;
        if self.sent < BURST_PINGS {
            BURST_INTERVAL
        } else {
            STEADY_INTERVAL
        }
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }
}
