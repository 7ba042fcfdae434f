//! Operation - a cancellable, optionally time-bounded unit of work
//!
//! Terminal states are sticky: the first of `cancel` / `finish` wins and every
//! later transition is a no-op. A deadline is enforced two ways: a tokio timer
//! (when a runtime is available) and a lazy check on every status read, so a
//! caller polling at a checkpoint always observes an elapsed deadline.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Timeout applied to logins that do not bring their own operation
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Opaque operation identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why an operation stopped before finishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit `cancel` call, with a human-readable message
    Requested(String),
    /// The deadline elapsed
    TimedOut(Duration),
}

impl CancelReason {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CancelReason::TimedOut(_))
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested(message) => write!(f, "{}", message),
            CancelReason::TimedOut(after) => {
                write!(f, "Operation timed out after {}ms", after.as_millis())
            }
        }
    }
}

/// Immutable snapshot returned by [`Operation::status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub id: OperationId,
    pub cancelled: bool,
    pub finished: bool,
    pub reason: Option<CancelReason>,
}

#[derive(Debug, Clone)]
enum Phase {
    Running,
    Cancelled(CancelReason),
    Finished,
}

struct OperationInner {
    id: OperationId,
    phase: Mutex<Phase>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    token: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl OperationInner {
    fn clear_timer(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = timer {
            handle.abort();
        }
    }

    /// Move out of `Running`. Returns false when already terminal.
    fn transition(&self, next: Phase) -> bool {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            if !matches!(*phase, Phase::Running) {
                return false;
            }
            *phase = next.clone();
        }

        self.clear_timer();
        if let Phase::Cancelled(reason) = next {
            debug!("Operation {} cancelled: {}", self.id, reason);
            self.token.cancel();
        } else {
            debug!("Operation {} finished", self.id);
        }
        true
    }

    fn check_deadline(&self) {
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.timeout) {
            if Instant::now() >= deadline {
                self.transition(Phase::Cancelled(CancelReason::TimedOut(timeout)));
            }
        }
    }
}

impl Drop for OperationInner {
    fn drop(&mut self) {
        self.clear_timer();
    }
}

/// Cancellable unit of work shared between a flow and its callers.
///
/// Cloning is cheap and every clone refers to the same state.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

impl Operation {
    /// Create an operation without a deadline
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an operation that cancels itself after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    fn build(timeout: Option<Duration>) -> Self {
        let inner = Arc::new(OperationInner {
            id: OperationId::new(),
            phase: Mutex::new(Phase::Running),
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            token: CancellationToken::new(),
            timer: Mutex::new(None),
        });

        if let (Some(timeout), Ok(handle)) = (timeout, Handle::try_current()) {
            let weak: Weak<OperationInner> = Arc::downgrade(&inner);
            let timer = handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = weak.upgrade() {
                    inner.transition(Phase::Cancelled(CancelReason::TimedOut(timeout)));
                }
            });
            *inner.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer);
        }

        Self { inner }
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    /// Configured timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// Cancel with the default message
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::Requested("Operation cancelled".to_string()))
    }

    /// Cancel with an explicit reason. Returns false if already terminal.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.inner.transition(Phase::Cancelled(reason))
    }

    /// Mark the work as done. Returns false if already terminal.
    pub fn finish(&self) -> bool {
        self.inner.transition(Phase::Finished)
    }

    pub fn status(&self) -> OperationStatus {
        self.inner.check_deadline();
        let phase = self
            .inner
            .phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let (cancelled, finished, reason) = match phase {
            Phase::Running => (false, false, None),
            Phase::Cancelled(reason) => (true, false, Some(reason)),
            Phase::Finished => (false, true, None),
        };

        OperationStatus {
            id: self.inner.id,
            cancelled,
            finished,
            reason,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status().cancelled
    }

    /// Cancellation reason, if cancelled
    pub fn reason(&self) -> Option<CancelReason> {
        self.status().reason
    }

    /// Token fired when this operation is cancelled (never on finish)
    pub fn signal(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Operation {}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let op = Operation::new();
        assert!(op.cancel_with(CancelReason::Requested("first".into())));
        assert!(!op.cancel_with(CancelReason::Requested("second".into())));

        let status = op.status();
        assert!(status.cancelled);
        assert!(!status.finished);
        assert_eq!(status.reason, Some(CancelReason::Requested("first".into())));
    }

    #[test]
    fn test_finish_after_cancel_is_noop() {
        let op = Operation::new();
        op.cancel();
        assert!(!op.finish());

        let status = op.status();
        assert!(status.cancelled);
        assert!(!status.finished);
    }

    #[test]
    fn test_cancel_after_finish_is_noop() {
        let op = Operation::new();
        assert!(op.finish());
        assert!(!op.cancel());
        assert!(!op.signal().is_cancelled());

        let status = op.status();
        assert!(status.finished);
        assert!(!status.cancelled);
        assert!(status.reason.is_none());
    }

    #[test]
    fn test_deadline_checked_without_runtime() {
        let op = Operation::with_timeout(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));

        let status = op.status();
        assert!(status.cancelled);
        assert!(status.reason.as_ref().is_some_and(|r| r.is_timeout()));
    }

    #[tokio::test]
    async fn test_timer_cancels_and_fires_signal() {
        let op = Operation::with_timeout(Duration::from_millis(10));
        let signal = op.signal();

        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("timer should fire");

        assert_eq!(
            op.reason(),
            Some(CancelReason::TimedOut(Duration::from_millis(10)))
        );
    }

    #[tokio::test]
    async fn test_finish_clears_timer() {
        let op = Operation::with_timeout(Duration::from_millis(10));
        assert!(op.finish());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let status = op.status();
        assert!(status.finished);
        assert!(!status.cancelled);
    }

    #[test]
    fn test_clones_share_state() {
        let op = Operation::new();
        let other = op.clone();
        other.cancel();
        assert!(op.is_cancelled());
        assert_eq!(op, other);
        assert_ne!(op, Operation::new());
    }
}
