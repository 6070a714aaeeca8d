// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::time::Duration;

/// How a lost connection is retried: doubling sleeps between attempts up to a maximum, for a
/// limited number of attempts. A policy without a limit retries forever.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRetryPolicy {
    initial_sleep: Duration,
    max_sleep: Duration,
    retry_limit: Option<u32>,
}

impl Default for SessionRetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(Self::DEFAULT_MAX_SLEEP_MS),
            Some(Self::DEFAULT_RETRY_LIMIT),
            Duration::from_millis(Self::DEFAULT_INITIAL_SLEEP_MS),
        )
    }
}

impl SessionRetryPolicy {
    pub const DEFAULT_RETRY_LIMIT: u32 = 5;
    pub const DEFAULT_INITIAL_SLEEP_MS: u64 = 500;
    pub const DEFAULT_MAX_SLEEP_MS: u64 = 30000;

    pub fn new(max_sleep: Duration, retry_limit: Option<u32>, initial_sleep: Duration) -> Self {
        Self {
            initial_sleep,
            max_sleep: max_sleep.max(initial_sleep),
            retry_limit,
        }
    }

    pub fn retry_limit(&self) -> Option<u32> {
        self.retry_limit
    }

    /// The sleep before retry number `attempt`, counting from zero.
    fn sleep_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_sleep
            .checked_mul(factor)
            .map_or(self.max_sleep, |d| d.min(self.max_sleep))
    }

    /// A fresh sequence of sleeps, one per connect attempt that failed.
    pub(crate) fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ExponentialBackoff {
    policy: SessionRetryPolicy,
    attempt: u32,
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self
            .policy
            .retry_limit
            .is_some_and(|limit| self.attempt >= limit)
        {
            return None;
        }
        let sleep = self.policy.sleep_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(sleep)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::SessionRetryPolicy;

    #[test]
    fn default_policy_doubles_five_times() {
        let sleeps: Vec<u128> = SessionRetryPolicy::default()
            .new_backoff()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(sleeps, vec![500, 1000, 2000, 4000, 8000]);
    }

    #[test]
    fn sleeps_are_capped() {
        let policy = SessionRetryPolicy::new(
            Duration::from_millis(30000),
            Some(10),
            Duration::from_millis(500),
        );
        let sleeps: Vec<_> = policy.new_backoff().collect();
        assert_eq!(sleeps.len(), 10);
        assert_eq!(sleeps[5], Duration::from_millis(16000));
        assert_eq!(sleeps[6], Duration::from_millis(30000));
        assert_eq!(sleeps[9], Duration::from_millis(30000));
    }

    #[test]
    fn unlimited_policy_keeps_going() {
        let policy =
            SessionRetryPolicy::new(Duration::from_millis(3000), None, Duration::from_millis(500));
        let mut backoff = policy.new_backoff();
        assert_eq!(backoff.nth(100), Some(Duration::from_millis(3000)));
        assert!(backoff.next().is_some());
    }

    #[test]
    fn zero_limit_never_retries() {
        let policy = SessionRetryPolicy::new(
            Duration::from_millis(3000),
            Some(0),
            Duration::from_millis(500),
        );
        assert!(policy.new_backoff().next().is_none());
    }
}
