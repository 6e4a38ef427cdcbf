//! Retry policies
//!
//! A lifecycle asks a fresh [`RetryController`] for permission before every
//! attempt, waits on its delay, and reports each transient failure to it.
//! When the controller refuses, its combined error is what the caller sees.

use crate::config::RetryConfig;
use crate::error::AtomError;
use crate::types::Name;
use futures_util::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::time::Duration;

/// Per-call retry state
pub trait RetryController: Send {
    /// Whether another attempt may start
    fn should_retry(&mut self) -> bool;

    /// Wait before the attempt that was just allowed
    fn delay(&mut self) -> BoxFuture<'static, ()>;

    /// Record a transient failure
    fn transient_error(&mut self, error: AtomError);

    /// Aggregate of every recorded failure
    fn combined_error(&mut self) -> AtomError;
}

/// Factory for retry controllers, one per call
pub trait RetryPolicy: Send + Sync {
    fn controller(&self, pattern: &Name) -> Box<dyn RetryController>;
}

/// Exponential backoff with down-jitter and an optional attempt ceiling
#[derive(Debug, Clone, Default)]
pub struct BackoffPolicy {
    config: RetryConfig,
}

impl BackoffPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl RetryPolicy for BackoffPolicy {
    fn controller(&self, pattern: &Name) -> Box<dyn RetryController> {
        Box::new(BackoffController::new(self.config.clone(), pattern.clone()))
    }
}

/// Controller produced by [`BackoffPolicy`]
pub struct BackoffController {
    config: RetryConfig,
    pattern: Name,
    attempts: u32,
    errors: Vec<AtomError>,
}

impl BackoffController {
    pub fn new(config: RetryConfig, pattern: Name) -> Self {
        Self {
            config,
            pattern,
            attempts: 0,
            errors: Vec::new(),
        }
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl RetryController for BackoffController {
    fn should_retry(&mut self) -> bool {
        if let Some(max) = self.config.max_attempts {
            if self.attempts >= max {
                return false;
            }
        }
        self.attempts += 1;
        true
    }

    fn delay(&mut self) -> BoxFuture<'static, ()> {
        match self.attempts.checked_sub(2) {
            Some(step) => {
                let delay = backoff_delay(step, &self.config);
                if delay.is_zero() {
                    future::ready(()).boxed()
                } else {
                    tokio::time::sleep(delay).boxed()
                }
            }
            None => future::ready(()).boxed(),
        }
    }

    fn transient_error(&mut self, error: AtomError) {
        self.errors.push(error);
    }

    fn combined_error(&mut self) -> AtomError {
        AtomError::RetriesExhausted {
            pattern: self.pattern.clone(),
            attempts: self.attempts,
            errors: std::mem::take(&mut self.errors),
        }
    }
}

impl fmt::Debug for BackoffController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffController")
            .field("pattern", &self.pattern)
            .field("attempts", &self.attempts)
            .field("errors", &self.errors.len())
            .finish()
    }
}

/// Delay before retry number `step + 1`
///
/// `initial_delay * 2^step`, capped at `max_delay`, scaled by a random
/// factor in `[1 - jitter_factor, 1]`. A jitter factor outside `[0, 1]` is
/// clamped; a non-finite one disables jitter.
pub fn backoff_delay(step: u32, config: &RetryConfig) -> Duration {
    let base = config.initial_delay().as_secs_f64() * 2.0_f64.powi(step.min(30) as i32);
    let capped = base.min(config.max_delay().as_secs_f64());
    let jitter_factor = if config.jitter_factor.is_finite() {
        config.jitter_factor.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let jitter = 1.0 - rand::random::<f64>() * jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}
