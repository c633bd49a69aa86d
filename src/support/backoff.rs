//! Exponential backoff with jitter (§9 "support::backoff"), shared by the symbol
//! mapping change-stream watcher, the Storage Port's retry policy, and the Stream
//! Receiver's reconnect handling. The doubling-capped-at-a-ceiling shape is the
//! teacher's `edge/receiver.rs` reconnect loop (`reconnect_delay = (reconnect_delay
//! * 2).min(max)`), generalized with optional jitter to avoid thundering-herd
//! reconnects when many components back off together.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    /// Jitter fraction in `[0, 1]`; the delay is scaled by `1 + U(-jitter, jitter)`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial: Duration::from_millis(100), max: Duration::from_secs(30), jitter: 0.1 }
    }
}

/// Stateful doubling backoff. `next()` advances and returns the delay to sleep;
/// `reset()` returns it to `initial` after a success.
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial;
        Self { config, current }
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }

    pub fn next(&mut self) -> Duration {
        let delay = apply_jitter(self.current, self.config.jitter);
        self.current = (self.current * 2).min(self.config.max);
        delay
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_and_caps_at_max() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            jitter: 0.0,
        });
        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        assert_eq!(backoff.next(), Duration::from_millis(350));
        assert_eq!(backoff.next(), Duration::from_millis(350));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff =
            Backoff::new(BackoffConfig { initial: Duration::from_millis(50), max: Duration::from_secs(1), jitter: 0.0 });
        backoff.next();
        backoff.next();
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(50));
    }
}
