//! Reconnection Policy
//!
//! Exponential backoff for feed reconnection, plus the single-shot timer a
//! connection uses to wait out the delay.
//!
//! Delays grow from `initial_delay` by `multiplier` per attempt, computed
//! directly from the attempt number so fractional milliseconds are kept
//! (3s × 1.5⁴ = 15187.5ms). Once `max_attempts` delays have been handed out
//! the policy refuses further attempts until [`ReconnectPolicy::reset`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, Sleep};

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay (`None` = uncapped).
    pub max_delay: Option<Duration>,
    /// Growth factor per attempt (e.g., 1.5 adds half the delay each time).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: None,
            multiplier: 1.5,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Option<Duration>,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_attempts,
        }
    }

    /// Whether `attempt` (1-based) is within the attempt budget.
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }

    /// Un-jittered delay for `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);

        let delay = Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Reconnection policy implementing exponential backoff with optional jitter.
///
/// # Example
///
/// ```rust
/// use market_stream_client::infrastructure::stream::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(3000)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(4500)));
///
/// // Connection reached Open
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Consume one attempt and return its delay.
    ///
    /// Returns `None` once the attempt budget is exhausted; the attempt
    /// counter is left unchanged in that case.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        let attempt = self.attempt_count.saturating_add(1);
        if !self.config.allows(attempt) {
            return None;
        }

        self.attempt_count = attempt;
        Some(self.apply_jitter(self.config.delay_for(attempt)))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Policy configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        let base_secs = duration.as_secs_f64();
        let jitter_range = base_secs * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted = (base_secs + jitter).max(0.001);

        Duration::try_from_secs_f64(adjusted).unwrap_or(duration)
    }
}

// =============================================================================
// Reconnect Timer
// =============================================================================

/// Cancelable single-shot reconnect timer.
///
/// At most one sleep is armed at a time: [`schedule`](Self::schedule)
/// cancels the pending one before arming a new one. Polling an unarmed
/// timer stays pending forever, so it can sit in a `select!` unconditionally.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    /// Create an unarmed timer.
    #[must_use]
    pub const fn new() -> Self {
        Self { sleep: None }
    }

    /// Arm the timer to fire after `delay`, replacing any pending sleep.
    pub fn schedule(&mut self, delay: Duration) {
        self.cancel();
        let deadline = Instant::now().checked_add(delay).unwrap_or_else(far_future);
        self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline)));
    }

    /// Disarm the timer. No-op when unarmed.
    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    /// Whether a sleep is pending.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }
}

impl Future for ReconnectTimer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(sleep) = self.sleep.as_mut() else {
            return Poll::Pending;
        };
        match sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.sleep = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn far_future() -> Instant {
    // Roughly 30 years.
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(3));
        assert_eq!(config.max_delay, None);
        assert!((config.multiplier - 1.5).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn backoff_sequence_keeps_fractional_millis() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        let delays: Vec<Duration> = std::iter::from_fn(|| policy.next_delay()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(3000),
                Duration::from_millis(4500),
                Duration::from_millis(6750),
                Duration::from_millis(10_125),
                Duration::from_micros(15_187_500),
            ]
        );
        assert_eq!(policy.attempt_count(), 5);
    }

    #[test]
    fn sixth_attempt_is_refused() {
        let mut policy = ReconnectPolicy::new(no_jitter(5));
        for _ in 0..5 {
            assert!(policy.next_delay().is_some());
        }

        assert!(policy.next_delay().is_none());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 5);
        assert!(!policy.should_retry());
    }

    #[test]
    fn delay_for_is_pure() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_secs(3));
        assert_eq!(config.delay_for(1), Duration::from_secs(3));
        assert_eq!(config.delay_for(3), Duration::from_millis(6750));
        assert_eq!(config.delay_for(3), config.delay_for(3));
    }

    #[test]
    fn policy_max_delay_cap() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Some(Duration::from_millis(2000)),
            multiplier: 4.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        };
        let mut policy = ReconnectPolicy::new(config);

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn huge_attempts_saturate_instead_of_overflowing() {
        let config = ReconnectConfig {
            multiplier: 10.0,
            max_attempts: 0,
            ..ReconnectConfig::default()
        };
        assert_eq!(config.delay_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });

            let millis = policy.next_delay().unwrap().as_millis();

            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));

        for _ in 0..1000 {
            assert!(policy.should_retry());
            assert!(policy.next_delay().is_some());
        }
    }

    #[tokio::test]
    async fn timer_fires_once() {
        let mut timer = ReconnectTimer::new();
        timer.schedule(Duration::from_millis(10));
        assert!(timer.is_armed());

        (&mut timer).await;
        assert!(!timer.is_armed());

        let pending = tokio::time::timeout(Duration::from_millis(30), &mut timer).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn schedule_replaces_pending_sleep() {
        let mut timer = ReconnectTimer::new();
        timer.schedule(Duration::from_secs(60));
        timer.schedule(Duration::from_millis(10));

        tokio::time::timeout(Duration::from_secs(1), &mut timer)
            .await
            .expect("rescheduled timer fires on the short delay");
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let mut timer = ReconnectTimer::new();
        timer.cancel();
        timer.schedule(Duration::from_millis(10));
        timer.cancel();
        timer.cancel();

        assert!(!timer.is_armed());
        let pending = tokio::time::timeout(Duration::from_millis(30), &mut timer).await;
        assert!(pending.is_err());
    }
}
