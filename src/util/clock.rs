//! Wall-clock helpers for diagnostic timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch. Returns 0 if the clock is before the epoch.
#[must_use]
pub fn now_us() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic_enough() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
        assert!(a > 0);
    }
}
