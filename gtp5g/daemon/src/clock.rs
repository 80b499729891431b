//! Monotonic clock helpers
//!
//! Event timestamps come from `bpf_ktime_get_ns`, which reads
//! CLOCK_MONOTONIC. Userspace reads the same clock here.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use nix::time::{clock_gettime, ClockId};

/// Current CLOCK_MONOTONIC reading in nanoseconds
///
/// Returns 0 if the clock cannot be read, which never happens on Linux.
pub fn monotonic_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(_) => 0,
    }
}

/// Map a monotonic event timestamp to wall-clock time
///
/// Uses the current offset between the two clocks, so the result drifts
/// if the wall clock was stepped since the event.
pub fn monotonic_to_wall(ts_ns: u64) -> DateTime<Utc> {
    let now_wall = Utc::now();
    let age_ns = monotonic_ns().saturating_sub(ts_ns);
    now_wall - ChronoDuration::nanoseconds(age_ns.min(i64::MAX as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_goes_backwards() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_wall_mapping_of_recent_timestamp() {
        let ts = monotonic_ns();
        let wall = monotonic_to_wall(ts);
        let skew = (Utc::now() - wall).num_milliseconds().abs();
        assert!(skew < 1_000);
    }
}
