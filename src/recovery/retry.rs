//! Retry policy (§4.G step 5): `{fixed|linear|exponential}` delay shapes, a generalization
//! of `support::backoff`'s single doubling shape to the three kinds named in the spec.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub kind: RetryKind,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier for `Exponential`; ignored by `Fixed`/`Linear`.
    pub factor: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            kind: RetryKind::Exponential,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry attempt number `attempt` (1-based). Returns `None` once
    /// `attempt` exceeds `max_attempts`.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let delay = match self.kind {
            RetryKind::Fixed => self.initial_delay,
            RetryKind::Linear => self.initial_delay * attempt,
            RetryKind::Exponential => {
                Duration::from_secs_f64(self.initial_delay.as_secs_f64() * self.factor.powi(attempt as i32 - 1))
            }
        };
        Some(delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_constant() {
        let policy = RetryPolicy { kind: RetryKind::Fixed, ..RetryPolicy::default() };
        assert_eq!(policy.delay_for(1), policy.delay_for(3));
    }

    #[test]
    fn linear_scales_by_attempt() {
        let policy = RetryPolicy {
            kind: RetryKind::Linear,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 1.0,
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(300)));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let policy = RetryPolicy {
            kind: RetryKind::Exponential,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            factor: 2.0,
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(350)));
    }

    #[test]
    fn exceeds_max_attempts_returns_none() {
        let policy = RetryPolicy { max_attempts: 2, ..RetryPolicy::default() };
        assert!(policy.delay_for(3).is_none());
    }
}
