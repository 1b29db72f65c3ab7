//! Exponential backoff retry policy and driver.
//!
//! [`RetryPolicy`] is the persisted, all-optional form carried on a
//! stream spec; [`RetrySettings`] is the resolved form after defaults are
//! applied; [`RetryDriver`] tracks attempts and computes delays for one
//! batch (or one source restart cycle). The driver resets to the initial
//! delay on any success.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Persisted retry policy. Absent fields resolve against live defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    /// Multiplier applied to the delay after each attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    /// Upper bound on the delay, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Attempts per batch before the poison-pill path; `None` = unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// An empty policy: every field resolves to the default.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            initial_delay_ms: None,
            factor: None,
            max_delay_ms: None,
            max_attempts: None,
        }
    }

    /// Resolves this policy against `defaults`, field by field.
    #[must_use]
    pub fn resolve(&self, defaults: &RetrySettings) -> RetrySettings {
        RetrySettings {
            initial_delay: self
                .initial_delay_ms
                .map_or(defaults.initial_delay, Duration::from_millis),
            factor: self.factor.unwrap_or(defaults.factor),
            max_delay: self
                .max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
            max_attempts: self.max_attempts.or(defaults.max_attempts),
        }
    }
}

/// Fully resolved retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub factor: f64,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Attempts per batch before the poison-pill path; `None` = unbounded.
    pub max_attempts: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

/// Tracks attempts and computes exponential backoff delays.
#[derive(Debug)]
pub struct RetryDriver {
    settings: RetrySettings,
    attempt: u32,
    current_delay: Duration,
}

impl RetryDriver {
    /// Creates a driver at attempt zero.
    #[must_use]
    pub fn new(settings: RetrySettings) -> Self {
        let current_delay = settings.initial_delay;
        Self {
            settings,
            attempt: 0,
            current_delay,
        }
    }

    /// Returns the current attempt count.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns whether the configured attempt bound has been reached.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.settings
            .max_attempts
            .is_some_and(|max| self.attempt >= max)
    }

    /// Resets the driver after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.settings.initial_delay;
    }

    /// Records an attempt and returns the delay to wait before the next
    /// one, or `None` when the attempt bound has been reached.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempt += 1;

        let delay = self.current_delay;
        let next_ms = (self.current_delay.as_millis() as f64 * self.settings.factor) as u64;
        self.current_delay = Duration::from_millis(next_ms).min(self.settings.max_delay);
        Some(delay)
    }
}
