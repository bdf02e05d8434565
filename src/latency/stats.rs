//! Outlier-robust latency statistics.
//!
//! Two rings: a raw history that anchors the outlier gate, and a
//! filtered window that feeds the displayed figures. A sample more than
//! two standard deviations from the raw mean is discarded without
//! touching anything the consumer displays.

use std::collections::VecDeque;

const RAW_CAPACITY: usize = 100;
const FILTERED_CAPACITY: usize = 30;
/// Raw samples needed before the outlier gate arms.
const GATE_MIN_SAMPLES: usize = 10;
/// The gate fires only when the raw ring actually spreads.
const GATE_MIN_STDDEV_MS: f64 = 5.0;
const GATE_SIGMA: f64 = 2.0;

/// Published figures, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencySnapshot {
    pub current: f64,
    /// Running minimum over every accepted sample.
    pub min: f64,
    /// Maximum over the filtered window.
    pub max: f64,
    /// Mean over the filtered window.
    pub avg: f64,
    /// Standard deviation of the raw ring.
    pub stddev: f64,
    /// Accepted samples so far.
    pub samples: usize,
}

/// Rolling latency statistics with a 2σ outlier gate.
#[derive(Debug)]
pub struct LatencyStats {
    raw: VecDeque<f64>,
    filtered: VecDeque<f64>,
    current: f64,
    min: f64,
    max: f64,
    avg: f64,
    stddev: f64,
    accepted: usize,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            raw: VecDeque::new(),
            filtered: VecDeque::new(),
            current: 0.0,
            min: f64::INFINITY,
            max: 0.0,
            avg: 0.0,
            stddev: 0.0,
            accepted: 0,
        }
    }

    /// Record one latency sample. Returns the refreshed snapshot, or
    /// None when the sample was rejected as an outlier — in which case
    /// no displayed figure has moved.
    pub fn record(&mut self, latency_ms: f64) -> Option<LatencySnapshot> {
        if self.raw.len() == RAW_CAPACITY {
            self.raw.pop_front();
        }
        self.raw.push_back(latency_ms);

        if self.raw.len() >= GATE_MIN_SAMPLES {
            let (mean, stddev) = mean_stddev(&self.raw);
            self.stddev = stddev;
            if stddev > GATE_MIN_STDDEV_MS && (latency_ms - mean).abs() > GATE_SIGMA * stddev {
                return None;
            }
        }

        if self.filtered.len() == FILTERED_CAPACITY {
            self.filtered.pop_front();
        }
        self.filtered.push_back(latency_ms);

        self.current = latency_ms;
        self.min = self.min.min(latency_ms);
        self.max = self.filtered.iter().copied().fold(0.0, f64::max);
        self.avg = self.filtered.iter().sum::<f64>() / self.filtered.len() as f64;
        self.accepted += 1;
        Some(self.snapshot())
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            current: self.current,
            min: if self.min.is_finite() { self.min } else { 0.0 },
            max: self.max,
            avg: self.avg,
            stddev: self.stddev,
            samples: self.accepted,
        }
    }
}

fn mean_stddev(values: &VecDeque<f64>) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, variance.sqrt())
}
