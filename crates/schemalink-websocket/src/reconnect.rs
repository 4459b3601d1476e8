//! Exponential backoff policy for the reconnector.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Backoff state for one reconnect loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    /// Starts a fresh backoff sequence.
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before 1-based `attempt`: `min(initial * 2^(attempt-1), max)`.
    pub fn delay_for(config: &ReconnectConfig, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        config
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(config.max_delay)
            .min(config.max_delay)
    }

    /// Advances to the next attempt and returns its number and delay, or
    /// `None` once the configured attempt bound is spent.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if let Some(max) = self.config.max_attempts
            && self.attempt >= max
        {
            return None;
        }
        self.attempt += 1;
        Some((self.attempt, Self::delay_for(&self.config, self.attempt)))
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Resets the counter after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(initial_ms: u64, max_ms: u64, max_attempts: Option<u32>) -> ReconnectConfig {
        ReconnectConfig::default()
            .with_initial_delay(Duration::from_millis(initial_ms))
            .with_max_delay(Duration::from_millis(max_ms))
            .with_max_attempts(max_attempts)
    }

    #[test]
    fn test_delay_sequence() {
        let config = config(100, 1_000, None);
        let delays: Vec<_> = (1..=6).map(|n| Backoff::delay_for(&config, n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
            ]
        );
    }

    #[test]
    fn test_bounded_attempts() {
        let mut backoff = Backoff::new(config(10, 100, Some(2)));
        assert_eq!(backoff.next_attempt(), Some((1, Duration::from_millis(10))));
        assert_eq!(backoff.next_attempt(), Some((2, Duration::from_millis(20))));
        assert_eq!(backoff.next_attempt(), None);
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.next_attempt(), Some((1, Duration::from_millis(10))));
    }

    #[test]
    fn test_unbounded_never_exhausts() {
        let mut backoff = Backoff::new(config(1, 5, None));
        for _ in 0..1_000 {
            assert!(backoff.next_attempt().is_some());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_delay_matches_formula(
            initial in 1u64..1_000,
            max in 1u64..100_000,
            attempt in 1u32..64,
        ) {
            let max = max.max(initial);
            let config = config(initial, max, None);
            let delay = Backoff::delay_for(&config, attempt);

            let expected = (initial as u128)
                .saturating_mul(1u128 << (attempt - 1).min(31))
                .min(max as u128);
            prop_assert_eq!(delay.as_millis(), expected);
            prop_assert!(delay <= config.max_delay);
        }
    }
}
