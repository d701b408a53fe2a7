//! Reconnect backoff schedule shared by the WebSocket client and the
//! user-data stream

use std::time::Duration;

/// First reconnect delay
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Backoff ceiling
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay to use after one more consecutive failure
#[must_use]
pub fn next_delay(current: Duration) -> Duration {
    (current * 2).min(MAX_DELAY)
}

/// Delay for the n-th consecutive failure (1-based)
#[must_use]
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let mut delay = INITIAL_DELAY;
    for _ in 1..attempt {
        delay = next_delay(delay);
    }
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut delay = INITIAL_DELAY;
        let expected = [2u64, 4, 8, 16, 30, 30];
        for secs in expected {
            delay = next_delay(delay);
            assert_eq!(delay, Duration::from_secs(secs));
        }
    }

    #[test]
    fn attempt_schedule_starts_at_one_second() {
        assert_eq!(delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(delay_for_attempt(10), Duration::from_secs(30));
    }
}
