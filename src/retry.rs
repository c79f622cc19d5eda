//! Bounded retry with fixed or linear backoff.
//!
//! Screenshot capture and artifact cleanup both retry a fallible device
//! operation a handful of times. The loop lives here once; callers supply the
//! operation and a classifier deciding whether a failure is worth another try.

use std::future::Future;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Same delay after every failed attempt.
    Fixed,
    /// `base_delay × attempt`.
    Linear,
}

/// Attempt budget plus delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub schedule: Schedule,
}

impl Backoff {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            schedule: Schedule::Fixed,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            schedule: Schedule::Linear,
        }
    }

    /// Delay earned by the failure of `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.schedule {
            Schedule::Fixed => self.base_delay,
            Schedule::Linear => self.base_delay * attempt.max(1),
        }
    }
}

/// Classifier decision for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    GiveUp,
}

/// Outcome of [`retry`]: the last result and how many attempts ran.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, the classifier gives up, or the budget is spent.
///
/// `op` and `classify` both receive the 1-based attempt number. The delay is
/// only slept between attempts, never after the last one.
pub async fn retry<T, E, Op, Fut, Classify>(
    backoff: Backoff,
    mut op: Op,
    mut classify: Classify,
) -> Retried<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Classify: FnMut(u32, &E) -> Verdict,
{
    let max_attempts = backoff.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = op(attempt).await;
        let err = match &result {
            Ok(_) => return Retried { result, attempts: attempt },
            Err(e) => e,
        };

        if attempt >= max_attempts || classify(attempt, err) == Verdict::GiveUp {
            return Retried { result, attempts: attempt };
        }

        let delay = backoff.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_schedules() {
        let fixed = Backoff::fixed(3, Duration::from_millis(200));
        assert_eq!(fixed.delay_for(1), Duration::from_millis(200));
        assert_eq!(fixed.delay_for(3), Duration::from_millis(200));

        let linear = Backoff::linear(3, Duration::from_millis(500));
        assert_eq!(linear.delay_for(1), Duration::from_millis(500));
        assert_eq!(linear.delay_for(2), Duration::from_millis(1000));
        assert_eq!(linear.delay_for(3), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_stops_on_first_success() {
        let calls = Cell::new(0);
        let out: Retried<u32, &str> = retry(
            Backoff::fixed(3, Duration::ZERO),
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt == 2 {
                        Ok(attempt)
                    } else {
                        Err("nope")
                    }
                }
            },
            |_, _| Verdict::Retry,
        )
        .await;

        assert_eq!(out.result, Ok(2));
        assert_eq!(out.attempts, 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let out: Retried<(), u32> = retry(
            Backoff::linear(3, Duration::ZERO),
            |attempt| async move { Err(attempt) },
            |_, _| Verdict::Retry,
        )
        .await;

        assert_eq!(out.result, Err(3));
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test]
    async fn test_classifier_can_give_up() {
        let out: Retried<(), &str> = retry(
            Backoff::fixed(5, Duration::ZERO),
            |_| async { Err("fatal") },
            |_, _| Verdict::GiveUp,
        )
        .await;

        assert_eq!(out.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_only_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Retried<(), ()> = retry(
            Backoff::fixed(3, Duration::from_millis(200)),
            |_| async { Err(()) },
            |_, _| Verdict::Retry,
        )
        .await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_millis(600));
    }
}
