//! Timeout and backoff constants for remote store traffic
//!
//! The live subscription uses an adaptive strategy:
//! 1. **Connecting**: bounded by the connect timeout (10s)
//! 2. **Live**: Firebase sends `keep-alive` every 30s, so a stream silent
//!    for 90s is considered dropped
//! 3. **Reconnecting**: exponential backoff starting at 1s, capped at 30s
//!
//! One-shot requests (read, merge, delete, push send) share a single
//! request timeout.

use std::time::Duration;

/// Timeout for one-shot requests (10s)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Timeout for establishing the streaming connection (10s)
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Max silence on a live stream before reconnecting (90s = 3 missed keep-alives)
pub const STREAM_IDLE_MS: u64 = 90_000;

/// First reconnect delay (1s)
pub const BACKOFF_INITIAL_MS: u64 = 1_000;

/// Reconnect delay ceiling (30s)
pub const BACKOFF_MAX_MS: u64 = 30_000;

/// Buffered snapshots between the remote listener and the store consumer
pub const SNAPSHOT_CHANNEL_CAPACITY: usize = 32;

pub fn request_timeout() -> Duration {
    Duration::from_secs(REQUEST_TIMEOUT_SECS)
}

pub fn connect_timeout() -> Duration {
    Duration::from_millis(CONNECT_TIMEOUT_MS)
}

pub fn stream_idle_timeout() -> Duration {
    Duration::from_millis(STREAM_IDLE_MS)
}

/// Delay before reconnect attempt `attempt` (1-based), doubling up to the cap
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = BACKOFF_INITIAL_MS.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(BACKOFF_MAX_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timeout_is_10s() {
        assert_eq!(request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_idle_covers_three_keep_alives() {
        // Firebase keep-alive interval is 30 seconds
        assert_eq!(STREAM_IDLE_MS, 3 * 30_000);
        assert_eq!(stream_idle_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(5), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(6), Duration::from_secs(30));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_attempt_zero_behaves_like_first() {
        assert_eq!(backoff_delay(0), backoff_delay(1));
    }
}
