use serde::{Deserialize, Serialize};

/// How randomness is mixed into a backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JitterStrategy {
    /// Exact exponential delay.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay / 2, delay]`.
    #[default]
    Equal,
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffStrategy {
    /// Delay before the first retry.
    pub first_ms: u64,
    /// Upper bound of any single delay.
    pub max_ms: u64,
    /// Multiplier applied per attempt.
    pub factor: f64,
    pub jitter: JitterStrategy,
}

impl Default for BackoffStrategy {
    /// 1s, 2s, 4s, 8s, 16s.
    fn default() -> Self {
        Self {
            first_ms: 1_000,
            max_ms: 16_000,
            factor: 2.0,
            jitter: JitterStrategy::Equal,
        }
    }
}

impl BackoffStrategy {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay_ms(&self, retry: u32) -> u64 {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            1.0
        };
        let raw = self.first_ms as f64 * factor.powi(exp);
        if !raw.is_finite() || raw >= self.max_ms as f64 {
            self.max_ms
        } else {
            raw as u64
        }
    }

    /// Delay before retry number `retry` with jitter applied.
    ///
    /// `unit` is a random sample in `[0, 1)`; values outside are clamped.
    pub fn delay_ms(&self, retry: u32, unit: f64) -> u64 {
        let base = self.base_delay_ms(retry);
        let unit = unit.clamp(0.0, 1.0);
        match self.jitter {
            JitterStrategy::None => base,
            JitterStrategy::Full => (base as f64 * unit) as u64,
            JitterStrategy::Equal => {
                let half = base / 2;
                half + ((base - half) as f64 * unit) as u64
            }
        }
    }
}

/// Bounded retry: at most `max_attempts` calls in total, `backoff` between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::default(),
        }
    }

    /// `max_attempts` attempts with a fixed, jitter-free delay.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy {
                first_ms: delay_ms,
                max_ms: delay_ms,
                factor: 1.0,
                jitter: JitterStrategy::None,
            },
        }
    }

    /// Attempts actually allowed; a zero budget still permits one call.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
