//! Condition polling with a deadline and exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// How long to keep polling a condition, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_multiplier: u32,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            timeout,
            initial_interval,
            max_interval,
            backoff_multiplier: 2,
        }
    }

    /// Poll `probe` until it reports true or the deadline passes.
    ///
    /// The probe always runs at least once, and once more at the deadline.
    /// Returns whether the condition was met.
    pub async fn until<F, Fut>(&self, mut probe: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        // A timeout too large to represent never expires.
        let deadline = Instant::now().checked_add(self.timeout);
        let mut delay = self.initial_interval;

        loop {
            if probe().await {
                return true;
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => return false,
                Some(deadline) => delay.min(deadline - now),
                None => delay,
            };

            tokio::time::sleep(pause).await;
            delay = delay.saturating_mul(self.backoff_multiplier).min(self.max_interval);
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(10),
            Duration::from_millis(250),
            Duration::from_secs(2),
        )
    }
}
