//! Exponential backoff for the rate-limited log query API.
//!
//! `FilterLogEvents` runs against a small per-account transaction
//! ceiling, so bursts of page requests are expected to be rejected with
//! a throttling error. The combinator here retries exactly that error
//! class and nothing else.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio::time::{sleep, Instant};

use crate::{Error, Result};

fn default_initial_interval_ms() -> u64 {
    1_000
}

fn default_max_interval_ms() -> u64 {
    30_000
}

fn default_max_elapsed_time_ms() -> u64 {
    120_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Jitter applied to each computed delay.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JitterSetting {
    None,
    /// Sleep a uniformly random fraction of the computed delay.
    #[default]
    Full,
}

/// Backoff policy. All durations are milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval: u64,
    /// Ceiling on the delay between consecutive retries.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval: u64,
    /// Total retry budget. Once it would be exceeded, the last error is
    /// returned instead of sleeping again.
    #[serde(default = "default_max_elapsed_time_ms")]
    pub max_elapsed_time: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub jitter: JitterSetting,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: default_initial_interval_ms(),
            max_interval: default_max_interval_ms(),
            max_elapsed_time: default_max_elapsed_time_ms(),
            multiplier: default_multiplier(),
            jitter: JitterSetting::default(),
        }
    }
}

impl BackoffConfig {
    /// Delay before retry `attempt` (1-based), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_interval as f64 * factor) as u64;
        Duration::from_millis(millis.min(self.max_interval))
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_time)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        match self.jitter {
            JitterSetting::None => delay,
            JitterSetting::Full => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return delay;
                }
                Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
            }
        }
    }
}

/// Retries `op` while it fails with [`Error::Throttled`], sleeping with
/// exponential backoff between attempts. Any other error, and throttling
/// that would outlive `max_elapsed_time`, is returned to the caller.
pub async fn retry_throttled<T, F, Fut>(policy: &BackoffConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Error::Throttled(reason)) => {
                attempt += 1;
                let delay = policy.jittered(policy.delay_for_attempt(attempt));
                if started.elapsed() + delay > policy.max_elapsed() {
                    return Err(Error::Throttled(reason));
                }
                sleep(delay).await;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn policy_without_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_interval: 100,
            max_interval: 1_000,
            max_elapsed_time: 10_000,
            multiplier: 2.0,
            jitter: JitterSetting::None,
        }
    }

    #[test]
    fn delay_progression_doubles_until_capped() {
        let policy = policy_without_jitter();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1_000)); // capped
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(1_000));
    }

    #[test]
    fn full_jitter_stays_within_computed_delay() {
        let policy = BackoffConfig {
            jitter: JitterSetting::Full,
            ..policy_without_jitter()
        };
        for _ in 0..100 {
            let jittered = policy.jittered(Duration::from_millis(400));
            assert!(jittered <= Duration::from_millis(400));
        }
    }

    #[test]
    fn deserializes_with_defaults() {
        let policy: BackoffConfig = serde_yaml::from_str("initial_interval: 250").unwrap();
        assert_eq!(policy.initial_interval, 250);
        assert_eq!(policy.max_interval, default_max_interval_ms());
        assert_eq!(policy.max_elapsed_time, default_max_elapsed_time_ms());
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter, JitterSetting::Full);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_throttled_attempts() {
        let policy = policy_without_jitter();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<u32> = retry_throttled(&policy, || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Throttled("rate exceeded".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_non_throttled_error_immediately() {
        let policy = policy_without_jitter();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<u32> = retry_throttled(&policy, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transport("connection reset".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_elapsed_budget_runs_out() {
        let policy = BackoffConfig {
            initial_interval: 100,
            max_interval: 100,
            max_elapsed_time: 350,
            multiplier: 1.0,
            jitter: JitterSetting::None,
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<u32> = retry_throttled(&policy, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Throttled("rate exceeded".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Throttled(_))));
        // 3 sleeps of 100ms fit the 350ms budget, the 4th would not.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
