//! Consumer-side glass-to-glass latency estimation.
//!
//! The inputs are adversarial: three independent wall-clocks with
//! unknown offsets, a variable network path, and a display subsystem
//! with its own delay. The pipeline combines a ping/pong clock-sync
//! estimator for the relay→consumer leg, a bias estimator for the
//! producer→relay leg, and outlier-robust statistics over the composed
//! per-frame figure. Everything here is pure logic driven by the probe
//! binary; no I/O.

pub mod bias;
pub mod clock_sync;
pub mod estimator;
pub mod stats;

pub use bias::CaptureBias;
pub use clock_sync::{ClockSync, ClockSyncSample, ProbeSchedule};
pub use estimator::{FrameTimes, FrameTimestampBuffer, LatencyEstimator, LatencyUpdate};
pub use stats::{LatencySnapshot, LatencyStats};
