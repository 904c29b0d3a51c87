//! Leading-edge throttle for high-frequency input events

use chrono::{DateTime, Duration, Utc};

/// Admits at most one call per interval, driven by an injected clock.
///
/// The first call is always admitted (leading edge); subsequent calls are
/// dropped until the interval has elapsed.
pub struct Throttle {
    interval: Duration,
    last_admitted: Option<DateTime<Utc>>,
}

impl Throttle {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval: Duration::milliseconds(interval_ms),
            last_admitted: None,
        }
    }

    /// Returns true if the call at `now` is admitted.
    pub fn allow(&mut self, now: DateTime<Utc>) -> bool {
        match self.last_admitted {
            Some(last) if now - last < self.interval => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_edge_admitted() {
        let mut throttle = Throttle::new(50);
        assert!(throttle.allow(Utc::now()));
    }

    #[test]
    fn test_calls_within_interval_dropped() {
        let start = Utc::now();
        let mut throttle = Throttle::new(50);

        assert!(throttle.allow(start));
        assert!(!throttle.allow(start + Duration::milliseconds(10)));
        assert!(!throttle.allow(start + Duration::milliseconds(49)));
        assert!(throttle.allow(start + Duration::milliseconds(50)));
    }

    #[test]
    fn test_interval_resets_after_admission() {
        let start = Utc::now();
        let mut throttle = Throttle::new(500);

        assert!(throttle.allow(start));
        assert!(throttle.allow(start + Duration::milliseconds(500)));
        // Interval is measured from the last admitted call
        assert!(!throttle.allow(start + Duration::milliseconds(750)));
        assert!(throttle.allow(start + Duration::milliseconds(1000)));
    }
}
