//! Polling with exponential backoff.
//!
//! The status tracker's poll loop and [`wait_for`] share [`Backoff`], so a
//! session is never polled faster than `initial` or slower than `max`.

use std::future::Future;

use tokio::time::{Duration, Instant, sleep};

/// Delay schedule for a poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first poll.
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
    /// Stop after this many polls, counting the first.
    pub max_polls: Option<usize>,
}

impl Backoff {
    /// Delay that follows `current`, capped at `max`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(self.factor).min(self.max)
    }

    fn exhausted(&self, polls: usize) -> bool {
        self.max_polls.is_some_and(|max| polls >= max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(6),
            factor: 2,
            max_polls: None,
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone)]
pub enum WaitFor<T> {
    Ready(T),
    /// Not there yet; `last_observed` describes what was seen.
    NotReady { last_observed: Option<String> },
}

impl<T> WaitFor<T> {
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::Ready(value)
    }

    #[must_use]
    pub fn not_ready(last_observed: impl Into<Option<String>>) -> Self {
        Self::NotReady {
            last_observed: last_observed.into(),
        }
    }
}

/// A wait gave up.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "gave up waiting for {expected} after {}ms and {polls} polls (last seen: {})",
    .elapsed.as_millis(),
    .last_observed.as_deref().unwrap_or("nothing")
)]
pub struct WaitError {
    pub expected: String,
    pub last_observed: Option<String>,
    pub polls: usize,
    pub elapsed: Duration,
}

/// Run `check` until it reports ready, the deadline passes or the backoff
/// runs out of polls.
pub async fn wait_for<F, Fut, T>(
    expected: impl Into<String>,
    mut check: F,
    timeout: Duration,
    backoff: &Backoff,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WaitFor<T>>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut delay = backoff.initial;
    let mut polls = 0usize;
    let mut last_observed = None;

    loop {
        polls += 1;
        match check().await {
            WaitFor::Ready(value) => return Ok(value),
            WaitFor::NotReady { last_observed: Some(seen) } => last_observed = Some(seen),
            WaitFor::NotReady { last_observed: None } => {}
        }

        let now = Instant::now();
        if now >= deadline || backoff.exhausted(polls) {
            return Err(WaitError {
                expected: expected.into(),
                last_observed,
                polls,
                elapsed: now.saturating_duration_since(start),
            });
        }

        let pause = delay.min(deadline.saturating_duration_since(now));
        if !pause.is_zero() {
            sleep(pause).await;
        }
        delay = backoff.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_backoff() -> Backoff {
        Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(40),
            factor: 2,
            max_polls: None,
        }
    }

    #[test]
    fn delay_doubles_up_to_max() {
        let backoff = fast_backoff();
        let delays: Vec<u64> = std::iter::successors(Some(backoff.initial), |d| {
            Some(backoff.next_delay(*d))
        })
        .take(4)
        .map(|d| d.as_millis() as u64)
        .collect();
        assert_eq!(delays, vec![10, 20, 40, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_value_once_ready() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let value = wait_for(
            "third poll",
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n >= 3 {
                        WaitFor::ready(n)
                    } else {
                        WaitFor::not_ready(format!("poll {n}"))
                    }
                }
            },
            Duration::from_secs(5),
            &fast_backoff(),
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_last_observation() {
        let err = wait_for(
            "session s-1 to finish",
            || async { WaitFor::<()>::not_ready("broadcast".to_string()) },
            Duration::from_millis(100),
            &fast_backoff(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.last_observed.as_deref(), Some("broadcast"));
        assert!(err.polls >= 2);
        let message = err.to_string();
        assert!(message.contains("session s-1 to finish"), "{message}");
        assert!(message.contains("last seen: broadcast"), "{message}");
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_polls() {
        let backoff = Backoff {
            max_polls: Some(2),
            ..fast_backoff()
        };
        let err = wait_for(
            "bounded",
            || async { WaitFor::<()>::not_ready(None) },
            Duration::from_secs(60),
            &backoff,
        )
        .await
        .unwrap_err();
        assert_eq!(err.polls, 2);
        assert_eq!(err.last_observed, None);
    }
}
