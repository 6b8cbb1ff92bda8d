//! Bounded retry with optional exponential backoff.

use std::thread;
use std::time::Duration;

/// How often, and how patiently, to poll for something that appears asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(200),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Default delays with a custom attempt budget (at least one attempt).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// No delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts).delay(Duration::ZERO)
    }

    /// Delay before the second attempt.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Multiplier applied to the delay after each attempt; `1.0` keeps it fixed.
    pub fn backoff(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.0
        };
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait before `attempt` (1-based). The first attempt is immediate.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let scaled = self.delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Calls `probe` until it yields a value or the attempt budget runs out.
    ///
    /// `probe` receives the 1-based attempt number. On exhaustion the number
    /// of attempts made is returned as the error.
    pub fn poll<T>(&self, mut probe: impl FnMut(u32) -> Option<T>) -> Result<T, u32> {
        for attempt in 1..=self.max_attempts {
            let wait = self.delay_before(attempt);
            if !wait.is_zero() {
                thread::sleep(wait);
            }
            if let Some(value) = probe(attempt) {
                return Ok(value);
            }
        }
        Err(self.max_attempts)
    }
}
