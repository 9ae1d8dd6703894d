//! Bounded retry for token exchanges

use std::time::Duration;

/// Configuration for how to back off between failed attempts
#[derive(Clone, Debug)]
pub struct ErrorBackoffConfig {
    initial_error_delay: Duration,
    max_error_delay: Duration,
    multiplier: u32,
}

impl Default for ErrorBackoffConfig {
    /// Default backoff configuration
    ///
    /// Uses an initial delay of 250 ms with a multiplier of 2, capped at 2 seconds.
    fn default() -> Self {
        Self {
            initial_error_delay: Duration::from_millis(250),
            max_error_delay: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// After the first failure the delay is `initial_error_delay`. Each
    /// further failure multiplies the delay by `multiplier`, up to
    /// `max_error_delay`.
    pub fn new(initial_error_delay: Duration, max_error_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_error_delay,
            max_error_delay,
            multiplier,
        }
    }

    /// A configuration that never waits between attempts
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 1)
    }
}

/// Tracks the delay to apply after consecutive failures
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
}

impl ErrorBackoffHandler {
    /// Constructs a new handler from an [`ErrorBackoffConfig`]
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
        }
    }

    /// Reports a failure and returns the delay to wait before the next attempt
    pub fn error(&mut self) -> Duration {
        let new_delay = self
            .last_delay
            .map(|d| {
                d.saturating_mul(self.config.multiplier)
                    .min(self.config.max_error_delay)
            })
            .unwrap_or(self.config.initial_error_delay);
        self.last_delay = Some(new_delay);
        new_delay
    }
}

impl From<ErrorBackoffConfig> for ErrorBackoffHandler {
    fn from(config: ErrorBackoffConfig) -> Self {
        Self::new(config)
    }
}

/// How many times, and for how long each, a token exchange is attempted
///
/// The worst-case duration of one exchange is roughly
/// `max_attempts × attempt_timeout` plus the backoff delays, which is also an
/// upper bound on how long an encrypted cache holds its lock.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    attempt_timeout: Duration,
    backoff: ErrorBackoffConfig,
}

impl Default for RetryPolicy {
    /// Three attempts of at most 15 seconds each, with the default backoff
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(15),
            backoff: ErrorBackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// Constructs a new retry policy
    ///
    /// `max_attempts` is clamped to at least one attempt.
    pub fn new(max_attempts: u32, attempt_timeout: Duration, backoff: ErrorBackoffConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
            backoff,
        }
    }

    /// The total number of attempts made before giving up
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The timeout applied to each individual attempt
    #[inline]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// An upper bound on the time spent across all attempts and delays
    pub fn worst_case(&self) -> Duration {
        let mut handler = ErrorBackoffHandler::new(self.backoff.clone());
        let delays: Duration = (1..self.max_attempts).map(|_| handler.error()).sum();
        self.attempt_timeout.saturating_mul(self.max_attempts) + delays
    }

    pub(crate) fn backoff_handler(&self) -> ErrorBackoffHandler {
        ErrorBackoffHandler::new(self.backoff.clone())
    }
}
