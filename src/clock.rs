//! Monotone wall-clock readings.
//!
//! Every timestamp on the wire is milliseconds since the Unix epoch as an
//! IEEE-754 double. Raw `SystemTime` reads can step backwards under NTP
//! adjustment, which would break the ordering of relay ingress stamps, so
//! the epoch is sampled once per process and advanced with `Instant`.

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

struct Anchor {
    epoch: Duration,
    at: Instant,
}

fn anchor() -> &'static Anchor {
    static ANCHOR: OnceLock<Anchor> = OnceLock::new();
    ANCHOR.get_or_init(|| Anchor {
        epoch: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
        at: Instant::now(),
    })
}

/// Current wall-clock in milliseconds since the Unix epoch.
pub fn epoch_ms() -> f64 {
    let a = anchor();
    (a.epoch + a.at.elapsed()).as_secs_f64() * 1000.0
}

/// Current wall-clock in nanoseconds since the Unix epoch. Used for
/// synthetic receiver ids; non-decreasing within the process.
pub fn unix_nanos() -> u128 {
    let a = anchor();
    (a.epoch + a.at.elapsed()).as_nanos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_ms_is_plausible() {
        // Well past 2023-01-01 in milliseconds.
        assert!(epoch_ms() > 1.672e12);
    }

    #[test]
    fn readings_never_step_backwards() {
        let mut last = epoch_ms();
        for _ in 0..1000 {
            let now = epoch_ms();
            assert!(now >= last);
            last = now;
        }

        let mut last = unix_nanos();
        for _ in 0..1000 {
            let now = unix_nanos();
            assert!(now >= last);
            last = now;
        }
    }
}
