//! Explicit retry backoff: `base * 2^attempts`, capped.
//!
//! The formula, cap, and attempt budget are all configuration — nothing is
//! inferred from a queue library's defaults.

use chrono::Duration;

/// Delay before the next attempt, given the attempt counter AFTER the
/// failed try has been counted.
pub fn retry_delay(base_secs: u64, cap_secs: u64, attempts: u32) -> Duration {
    let factor = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
    let secs = base_secs.saturating_mul(factor).min(cap_secs);
    Duration::seconds(secs as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_per_attempt() {
        assert_eq!(retry_delay(30, 3600, 1), Duration::seconds(60));
        assert_eq!(retry_delay(30, 3600, 2), Duration::seconds(120));
        assert_eq!(retry_delay(30, 3600, 3), Duration::seconds(240));
    }

    #[test]
    fn test_cap_applies() {
        assert_eq!(retry_delay(30, 3600, 10), Duration::seconds(3600));
        // Overflow-prone attempt counts still land on the cap.
        assert_eq!(retry_delay(30, 3600, 200), Duration::seconds(3600));
    }

    #[test]
    fn test_zero_base_means_immediate() {
        assert_eq!(retry_delay(0, 3600, 5), Duration::seconds(0));
    }
}
