//! Backoff between reconnection attempts.
//!
//! The supervisor never gives up: it waits `delay_for_attempt(n)` after the
//! `n`-th consecutive failed session and tries again. The default policy is
//! a fixed five-second delay.
//!
//! # Example
//!
//! ```rust
//! use broker_rpc_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let fixed = RetryPolicy::fixed(Duration::from_secs(5));
//! assert_eq!(fixed.delay_for_attempt(7), Duration::from_secs(5));
//!
//! let growing = RetryPolicy::builder()
//!     .initial_delay(Duration::from_millis(500))
//!     .max_delay(Duration::from_secs(30))
//!     .multiplier(2.0)
//!     .build();
//! assert_eq!(growing.delay_for_attempt(2), Duration::from_secs(2));
//! ```

use std::time::Duration;

/// Delay applied after a failed session.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Backoff policy between reconnection attempts.
///
/// # Default Values
///
/// - `initial_delay`: 5 seconds
/// - `max_delay`: 5 seconds
/// - `multiplier`: 1.0 (fixed delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Cap on the delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl RetryPolicy {
    /// Policy waiting `delay` after every failure.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Delay after the `attempt`-th consecutive failure (zero-based).
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let exponent = attempt.min(64) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay.max(0.0))
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set the delay after the first failure.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the cap on the delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor per consecutive failure.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let initial_delay = self.initial_delay.unwrap_or(DEFAULT_RECONNECT_DELAY);
        RetryPolicy {
            initial_delay,
            max_delay: self.max_delay.unwrap_or(initial_delay),
            multiplier: self.multiplier.unwrap_or(1.0),
        }
    }
}
