//! Reconnect policy applied when a connection drops unexpectedly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Delay schedule between reconnect attempts.
///
/// `attempt` starts at 0 for the first retry.
pub trait Backoff: Send + Sync + fmt::Debug {
    fn delay(&self, attempt: u32) -> Duration;

    fn name(&self) -> &str;
}

/// Same delay before every attempt.
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    pub delay: Duration,
}

impl Backoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// `initial + step * attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    pub initial: Duration,
    pub step: Duration,
    pub max: Duration,
}

impl Backoff for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.step
            .checked_mul(attempt)
            .and_then(|d| d.checked_add(self.initial))
            .map_or(self.max, |d| d.min(self.max))
    }

    fn name(&self) -> &str {
        "linear"
    }
}

/// `initial * multiplier^attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            max,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn name(&self) -> &str {
        "exponential"
    }
}

/// What the connection does after an unexpected disconnect.
#[derive(Debug, Clone, Default)]
pub enum ReconnectStrategy {
    /// Nothing happens automatically; the caller reconnects when it wants.
    UserControlled,
    /// The connection is closed for good. Further calls fail with
    /// [`ClientError::Closed`](crate::ClientError::Closed).
    #[default]
    Disconnect,
    /// Retries until connected or explicitly disconnected.
    Retry(Arc<dyn Backoff>),
}

impl ReconnectStrategy {
    pub fn constant(delay: Duration) -> Self {
        Self::Retry(Arc::new(ConstantBackoff { delay }))
    }

    pub fn linear(initial: Duration, step: Duration, max: Duration) -> Self {
        Self::Retry(Arc::new(LinearBackoff { initial, step, max }))
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::Retry(Arc::new(ExponentialBackoff::new(initial, max)))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::UserControlled => "user_controlled",
            Self::Disconnect => "disconnect",
            Self::Retry(backoff) => backoff.name(),
        }
    }
}
