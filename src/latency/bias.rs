//! Producer↔relay clock-skew compensation.
//!
//! `relay_time_ms − capture_ms` should be a transit time of a few
//! milliseconds. When the producer host and the relay host disagree on
//! wall-clock, the difference is dominated by their offset instead.
//! Differences beyond a magnitude threshold are folded into a slowly
//! varying bias (the median of recent skewed measurements) and
//! subtracted back out, leaving a small floor standing in for plausible
//! real transit.

use std::collections::VecDeque;

use super::clock_sync::median_in_place;

/// Above this magnitude the difference is clock skew, not transit.
const SKEW_THRESHOLD_MS: f64 = 10_000.0;
/// Stand-in transit time after bias removal.
const TRANSIT_FLOOR_MS: f64 = 10.0;
const MAX_SAMPLES: usize = 30;

/// Bias estimator over the producer→relay leg.
#[derive(Debug, Default)]
pub struct CaptureBias {
    samples: VecDeque<f64>,
    bias_ms: f64,
}

impl CaptureBias {
    pub fn new() -> Self {
        Self::default()
    }

    /// Correct one `relay_time_ms − capture_ms` measurement.
    pub fn correct(&mut self, uplink_ms: f64) -> f64 {
        if uplink_ms.abs() <= SKEW_THRESHOLD_MS {
            return uplink_ms;
        }

        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(uplink_ms);

        let mut window: Vec<f64> = self.samples.iter().copied().collect();
        self.bias_ms = median_in_place(&mut window);

        uplink_ms - self.bias_ms + TRANSIT_FLOOR_MS
    }

    /// Current skew estimate in milliseconds.
    pub fn bias_ms(&self) -> f64 {
        self.bias_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_measurements_pass_through() {
        let mut bias = CaptureBias::new();
        assert_eq!(bias.correct(35.0), 35.0);
        assert_eq!(bias.correct(-80.0), -80.0);
        assert_eq!(bias.bias_ms(), 0.0);
    }

    #[test]
    fn stabilizes_on_a_constant_skew() {
        let mut bias = CaptureBias::new();
        // Producer clock trails the relay by ~22 s; per-frame jitter of
        // a few ms rides on top.
        for i in 0..30 {
            let jitter = (i % 5) as f64;
            let corrected = bias.correct(22_000.0 + jitter);
            assert!(corrected.abs() < 100.0, "corrected={corrected}");
        }
        assert!((bias.bias_ms() - 22_000.0).abs() < 10.0);

        // Once the skew estimate has settled, corrected values sit near
        // the transit floor.
        let corrected = bias.correct(22_002.0);
        assert!((corrected - 12.0).abs() < 5.0);
    }

    #[test]
    fn recovers_when_clocks_come_back_in_line() {
        let mut bias = CaptureBias::new();
        for _ in 0..30 {
            bias.correct(22_000.0);
        }
        // A sane measurement is used raw regardless of the stored bias.
        assert_eq!(bias.correct(35.0), 35.0);
    }

    #[test]
    fn negative_skew_is_handled_symmetrically() {
        let mut bias = CaptureBias::new();
        let corrected = bias.correct(-22_000.0);
        assert_eq!(corrected, 10.0);
        assert_eq!(bias.bias_ms(), -22_000.0);
    }

    #[test]
    fn window_is_bounded() {
        let mut bias = CaptureBias::new();
        for i in 0..100 {
            bias.correct(20_000.0 + i as f64);
        }
        assert_eq!(bias.samples.len(), MAX_SAMPLES);
        // Median tracks the recent window, not all history.
        assert!((bias.bias_ms() - 20_084.5).abs() < 1.0);
    }
}
