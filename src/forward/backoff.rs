use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Timing of reconnection attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Delay before the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound for the delay between retries (milliseconds).
    pub max_delay_ms: u64,
    /// Time allowed for a single connection attempt (milliseconds).
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ReconnectConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Exponential backoff with jitter, capped at a maximum delay.
#[derive(Debug)]
pub struct Backoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms.max(config.base_delay_ms),
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound of the delay for the given attempt.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        // the exponent is capped, further doubling would only hit the maximum anyway
        let delay = self
            .base_delay_ms
            .saturating_mul(2_u64.pow(attempt.min(16)));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Returns the delay to wait before the next attempt, picked in `[ceiling / 2, ceiling]`.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use crate::forward::backoff::{Backoff, ReconnectConfig};
    use serde_test::{assert_tokens, Token};
    use std::time::Duration;

    fn config_for_tests() -> ReconnectConfig {
        ReconnectConfig {
            base_delay_ms: 50,
            max_delay_ms: 1_000,
            connect_timeout_ms: 200,
        }
    }

    #[test]
    fn test_ceiling_doubles_until_maximum() {
        let backoff = Backoff::new(&config_for_tests());
        assert_eq!(backoff.ceiling(0), Duration::from_millis(50));
        assert_eq!(backoff.ceiling(1), Duration::from_millis(100));
        assert_eq!(backoff.ceiling(2), Duration::from_millis(200));
        assert_eq!(backoff.ceiling(4), Duration::from_millis(800));
        assert_eq!(backoff.ceiling(5), Duration::from_millis(1_000));
        assert_eq!(backoff.ceiling(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_delays_stay_within_bounds() {
        let mut backoff = Backoff::new(&config_for_tests());
        for attempt in 0..50 {
            let ceiling = backoff.ceiling(attempt);
            let delay = backoff.next_delay();
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
            assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?} < half of {ceiling:?}");
        }
        assert_eq!(backoff.attempt(), 50);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(&config_for_tests());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(50));
    }

    #[test]
    fn test_zero_base_delay() {
        let mut backoff = Backoff::new(&ReconnectConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            connect_timeout_ms: 10,
        });
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_serialize_and_deserialize_reconnect_config() {
        assert_tokens(
            &config_for_tests(),
            &[
                Token::Struct {
                    name: "ReconnectConfig",
                    len: 3,
                },
                Token::Str("base_delay_ms"),
                Token::U64(50),
                Token::Str("max_delay_ms"),
                Token::U64(1_000),
                Token::Str("connect_timeout_ms"),
                Token::U64(200),
                Token::StructEnd,
            ],
        );
    }
}
