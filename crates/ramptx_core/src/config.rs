//! Transaction configuration.

use rand::Rng;
use std::time::Duration;

/// What rollback does with a document the transaction created as an empty
/// placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderPolicy {
    /// Leave the empty document in place.
    #[default]
    Keep,
    /// Delete the placeholder if it is still empty.
    Remove,
}

/// Configuration shared by the coordinator, stager, commit executor and
/// recovery scanner.
#[derive(Debug, Clone)]
pub struct Config {
    /// Age, in logical ticks, after which staged metadata counts as
    /// abandoned.
    pub staleness_threshold: u64,

    /// Rollback behavior for placeholder documents.
    pub placeholder_policy: PlaceholderPolicy,

    /// Number of committed timestamps remembered per document.
    ///
    /// A timestamp younger than `staleness_threshold` relative to the newest
    /// entry is kept even past this limit.
    pub commit_history: usize,

    /// Attempts per document before giving up on CAS mismatches.
    pub max_cas_retries: u32,

    /// Whole-transaction retries `execute` makes after a conflict.
    pub max_conflict_retries: u32,

    /// Whether `execute` resolves an abandoned conflicting transaction
    /// before retrying.
    pub recover_on_conflict: bool,

    /// Retry policy for transient store failures.
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staleness_threshold: 64,
            placeholder_policy: PlaceholderPolicy::Keep,
            commit_history: 16,
            max_cas_retries: 16,
            max_conflict_retries: 3,
            recover_on_conflict: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the staleness threshold in logical ticks.
    #[must_use]
    pub const fn staleness_threshold(mut self, ticks: u64) -> Self {
        self.staleness_threshold = ticks;
        self
    }

    /// Sets the placeholder rollback policy.
    #[must_use]
    pub const fn placeholder_policy(mut self, policy: PlaceholderPolicy) -> Self {
        self.placeholder_policy = policy;
        self
    }

    /// Sets how many committed timestamps each document remembers.
    #[must_use]
    pub const fn commit_history(mut self, entries: usize) -> Self {
        self.commit_history = entries;
        self
    }

    /// Sets the CAS retry limit.
    #[must_use]
    pub const fn max_cas_retries(mut self, attempts: u32) -> Self {
        self.max_cas_retries = attempts;
        self
    }

    /// Sets the conflict retry limit of `execute`.
    #[must_use]
    pub const fn max_conflict_retries(mut self, attempts: u32) -> Self {
        self.max_conflict_retries = attempts;
        self
    }

    /// Sets whether `execute` runs recovery on conflicting documents.
    #[must_use]
    pub const fn recover_on_conflict(mut self, value: bool) -> Self {
        self.recover_on_conflict = value;
        self
    }

    /// Sets the transient failure retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Retry policy for transient store failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts per store call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration that retries immediately, without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::no_retry()
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
