//! Per-call cancellation and deadlines

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::ScriptError;

/// Cancellation scope for one or more script calls.
///
/// Cloning shares the underlying token, so cancelling any clone cancels them
/// all. A run observes cancellation while waiting for a pooled context and,
/// through the interpreter's interrupt hook, while the guest is executing.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl RunContext {
    /// A context that is never done unless cancelled by hand.
    pub fn background() -> Self {
        Self::default()
    }

    /// Share an existing token, e.g. one owned by a request handler.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::default().timeout(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    /// Add (or tighten) a timeout measured from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        if self.deadline.map_or(true, |d| deadline < d) {
            self.deadline = Some(deadline);
            self.timeout = Some(timeout);
        }
        self
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// The error a call interrupted by this context reports.
    pub fn error(&self) -> ScriptError {
        if self.is_cancelled() {
            return ScriptError::Cancelled;
        }
        match self.timeout {
            Some(timeout) => ScriptError::Timeout {
                ms: timeout.as_millis() as u64,
            },
            None if self.deadline.is_some() => ScriptError::Timeout { ms: 0 },
            None => ScriptError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_never_done() {
        let cx = RunContext::background();
        assert!(!cx.is_done());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let cx = RunContext::background();
        let other = cx.clone();
        other.cancel();
        assert!(cx.is_done());
        assert!(matches!(cx.error(), ScriptError::Cancelled));
    }

    #[test]
    fn expired_timeout_reports_its_duration() {
        let cx = RunContext::with_timeout(Duration::from_millis(0));
        assert!(cx.is_expired());
        assert!(matches!(cx.error(), ScriptError::Timeout { ms: 0 }));

        let cx = RunContext::with_timeout(Duration::from_secs(60));
        assert!(!cx.is_done());
    }

    #[test]
    fn shorter_timeout_wins() {
        let cx = RunContext::with_timeout(Duration::from_secs(60)).timeout(Duration::from_secs(1));
        assert!(matches!(cx.error(), ScriptError::Timeout { ms: 1000 }));
    }
}
