//! Delay strategies between retry attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay applied before each retry of a failed call.
///
/// Delays are expressed in milliseconds when loaded from a policy source:
///
/// ```json
/// { "type": "exponential", "initial_ms": 10, "max_ms": 500, "multiplier": 2.0 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,

    /// Fixed delay between retries.
    Fixed {
        /// Delay duration.
        #[serde(rename = "delay_ms", with = "millis")]
        delay: Duration,
    },

    /// Linear backoff.
    Linear {
        /// Delay before the first retry.
        #[serde(rename = "initial_ms", with = "millis")]
        initial: Duration,
        /// Added for each further retry.
        #[serde(rename = "increment_ms", with = "millis")]
        increment: Duration,
        /// Upper bound.
        #[serde(rename = "max_ms", with = "millis")]
        max: Duration,
    },

    /// Exponential backoff.
    Exponential {
        /// Delay before the first retry.
        #[serde(rename = "initial_ms", with = "millis")]
        initial: Duration,
        /// Upper bound.
        #[serde(rename = "max_ms", with = "millis")]
        max: Duration,
        /// Multiplier for each retry (default: 2.0).
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Backoff {
    /// Create an exponential backoff with the default multiplier of 2.
    #[must_use]
    pub const fn exponential(initial: Duration, max: Duration) -> Self {
        Self::Exponential { initial, max, multiplier: default_multiplier() }
    }

    /// Calculate the delay before a given retry (1-based: the delay before
    /// the second attempt is `delay_for_retry(1)`).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay } => *delay,
            Self::Linear { initial, increment, max } => {
                let delay = initial.saturating_add(increment.saturating_mul(retry - 1));
                delay.min(*max)
            }
            Self::Exponential { initial, max, multiplier } => {
                let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    return *max;
                }
                Duration::from_secs_f64(secs.max(0.0)).min(*max)
            }
        }
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_zero() {
        assert_eq!(Backoff::None.delay_for_retry(3), Duration::ZERO);
    }

    #[test]
    fn test_fixed() {
        let b = Backoff::Fixed { delay: Duration::from_millis(25) };
        assert_eq!(b.delay_for_retry(1), Duration::from_millis(25));
        assert_eq!(b.delay_for_retry(9), Duration::from_millis(25));
    }

    #[test]
    fn test_linear_caps_at_max() {
        let b = Backoff::Linear {
            initial: Duration::from_millis(10),
            increment: Duration::from_millis(5),
            max: Duration::from_millis(22),
        };
        assert_eq!(b.delay_for_retry(1), Duration::from_millis(10));
        assert_eq!(b.delay_for_retry(2), Duration::from_millis(15));
        assert_eq!(b.delay_for_retry(4), Duration::from_millis(22));
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let b = Backoff::exponential(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(b.delay_for_retry(1), Duration::from_millis(10));
        assert_eq!(b.delay_for_retry(2), Duration::from_millis(20));
        assert_eq!(b.delay_for_retry(3), Duration::from_millis(40));
        assert_eq!(b.delay_for_retry(4), Duration::from_millis(50));
        assert_eq!(b.delay_for_retry(200), Duration::from_millis(50));
    }

    #[test]
    fn test_serde_millis() {
        let json = r#"{"type":"exponential","initial_ms":10,"max_ms":500}"#;
        let b: Backoff = serde_json::from_str(json).expect("deserialize");
        assert_eq!(b, Backoff::exponential(Duration::from_millis(10), Duration::from_millis(500)));

        let fixed = Backoff::Fixed { delay: Duration::from_millis(3) };
        let json = serde_json::to_string(&fixed).expect("serialize");
        assert_eq!(json, r#"{"type":"fixed","delay_ms":3}"#);
    }
}
