//! Bounded status polling.
//!
//! The till polls `/api/mpesa/status` while the customer confirms on their
//! phone. The loop stops on the first terminal status or after
//! `max_attempts`, whichever comes first. Errors count as attempts.

use std::future::Future;
use std::time::Duration;

use duka_core::StkStatus;
use tracing::{debug, warn};

use crate::error::MpesaResult;

/// Default number of status checks before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default delay between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Last status observed (`Unknown` if every attempt failed).
    pub status: StkStatus,
    pub attempts: u32,
}

impl PollOutcome {
    /// True when the loop ran out of attempts without a terminal status.
    pub fn gave_up(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Calls `check(attempt)` until it reports a terminal status, sleeping
/// `interval` between calls. `attempt` starts at 1.
pub async fn poll_until_terminal<F, Fut>(max_attempts: u32, interval: Duration, mut check: F) -> PollOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = MpesaResult<StkStatus>>,
{
    let mut status = StkStatus::Unknown;
    let mut attempts = 0;

    while attempts < max_attempts {
        if attempts > 0 {
            tokio::time::sleep(interval).await;
        }
        attempts += 1;

        match check(attempts).await {
            Ok(observed) => {
                status = observed;
                debug!(attempt = attempts, status = ?observed, "Payment status polled");
                if observed.is_terminal() {
                    break;
                }
            }
            Err(e) => warn!(attempt = attempts, error = %e, "Payment status check failed"),
        }
    }

    PollOutcome { status, attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MpesaError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_terminal_status() {
        let started = tokio::time::Instant::now();
        let outcome = poll_until_terminal(10, Duration::from_secs(3), |attempt| async move {
            Ok(if attempt < 3 {
                StkStatus::Pending
            } else {
                StkStatus::Completed
            })
        })
        .await;

        assert_eq!(outcome.status, StkStatus::Completed);
        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.gave_up());
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = poll_until_terminal(4, Duration::from_secs(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(StkStatus::Pending) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.status, StkStatus::Pending);
        assert!(outcome.gave_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_count_as_attempts() {
        let outcome = poll_until_terminal(3, Duration::from_secs(1), |attempt| async move {
            if attempt == 1 {
                Err(MpesaError::Transport("connection reset".into()))
            } else {
                Ok(StkStatus::Cancelled)
            }
        })
        .await;

        assert_eq!(outcome.status, StkStatus::Cancelled);
        assert_eq!(outcome.attempts, 2);
    }
}
