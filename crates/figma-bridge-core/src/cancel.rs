//! Cancellation token with an optional deadline.
//!
//! Every blocking operation in the crate takes a `&CancellationToken`. Clones
//! share one cancellation flag; a child created with [`CancellationToken::with_timeout`]
//! also shares the flag but carries the earlier of its parent's deadline and
//! its own.

use crate::error::BridgeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation token for cooperative cancellation of async operations.
///
/// # Example
///
/// ```
/// use figma_bridge::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    shared: Arc<Shared>,
    deadline: Option<(Instant, Duration)>,
}

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    /// Deadline elapsed; carries the timeout the deadline was derived from.
    DeadlineElapsed(Duration),
}

impl From<CancelReason> for BridgeError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Cancelled => BridgeError::Cancelled,
            CancelReason::DeadlineElapsed(after) => BridgeError::Timeout(after),
        }
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child token sharing this token's flag, bounded by `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = (Instant::now() + timeout, timeout);
        let deadline = match self.deadline {
            Some(existing) if existing.0 <= candidate.0 => existing,
            _ => candidate,
        };
        Self {
            shared: self.shared.clone(),
            deadline: Some(deadline),
        }
    }

    /// Request cancellation. All clones and children observe it.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }

    /// Resolve once the token is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> CancelReason {
        let wait_flag = async {
            loop {
                // Registered before the flag check so a concurrent cancel()
                // cannot slip between the two.
                let notified = self.shared.notify.notified();
                if self.is_cancelled() {
                    return CancelReason::Cancelled;
                }
                notified.await;
            }
        };

        match self.deadline {
            Some((at, after)) => tokio::select! {
                reason = wait_flag => reason,
                _ = tokio::time::sleep_until(at) => CancelReason::DeadlineElapsed(after),
            },
            None => wait_flag.await,
        }
    }

    /// Return an error if the token has already fired.
    pub fn check(&self) -> Result<(), BridgeError> {
        if self.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        match self.deadline {
            Some((at, after)) if Instant::now() >= at => Err(BridgeError::Timeout(after)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.deadline().is_none());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_with_timeout_shares_flag() {
        let parent = CancellationToken::new();
        let child = parent.with_timeout(Duration::from_secs(10));

        child.cancel();
        assert!(parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_keeps_earlier_deadline() {
        let parent = CancellationToken::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let remote = token.clone();

        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::task::yield_now().await;
        remote.cancel();

        assert_eq!(waiter.await.unwrap(), CancelReason::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(token.cancelled().await, CancelReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let token = CancellationToken::new().with_timeout(Duration::from_millis(50));
        let reason = token.cancelled().await;
        assert_eq!(reason, CancelReason::DeadlineElapsed(Duration::from_millis(50)));
        assert!(matches!(token.check(), Err(BridgeError::Timeout(_))));
    }

    #[test]
    fn test_reason_maps_to_error() {
        let err: BridgeError = CancelReason::Cancelled.into();
        assert!(matches!(err, BridgeError::Cancelled));
        let err: BridgeError = CancelReason::DeadlineElapsed(Duration::from_secs(3)).into();
        assert!(matches!(err, BridgeError::Timeout(d) if d == Duration::from_secs(3)));
    }
}
