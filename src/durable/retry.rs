//! Retry backoff for failed execution attempts (SPEC_FULL §4.6: "retries use exponential
//! backoff"). Built on the `backoff` crate's `ExponentialBackoff`, queried for the delay at
//! a given attempt rather than driven through its own retry loop, since
//! [`super::service::DurableService`] persists state between attempts itself.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

/// The delay before attempt number `attempt` (1-indexed: the delay before the *second*
/// attempt is `base_delay_ms`, before the third is roughly `base_delay_ms * multiplier`, ...).
pub fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(base_delay_ms))
        .with_randomization_factor(0.0)
        .with_multiplier(2.0)
        .with_max_interval(Duration::from_secs(60))
        .with_max_elapsed_time(None)
        .build();

    let mut delay = backoff.initial_interval;
    for _ in 0..attempt.saturating_sub(1) {
        delay = backoff.next_backoff().unwrap_or(delay);
    }
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt_number() {
        let first = backoff_delay(100, 1);
        let second = backoff_delay(100, 2);
        let third = backoff_delay(100, 3);
        assert!(first <= second);
        assert!(second <= third);
    }

    #[test]
    fn delay_never_exceeds_the_configured_ceiling() {
        let far_out = backoff_delay(100, 50);
        assert!(far_out <= Duration::from_secs(60));
    }
}
