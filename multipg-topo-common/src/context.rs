use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TopoError;

/// Cancellation and deadline scope for a topology operation.
///
/// Every blocking backend call takes a `Context`. Deriving a child with
/// [`Context::with_timeout`] or [`Context::with_cancel`] narrows the scope:
/// cancelling a parent cancels every child, and a child's deadline can only
/// be earlier than its parent's.
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A child context plus the token that cancels it (and any of its own
    /// children).
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let token = self.token.child_token();
        let ctx = Self {
            token: token.clone(),
            deadline: self.deadline,
        };
        (ctx, token)
    }

    /// A child context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => existing.min(candidate),
            None => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Whether the context has been cancelled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve once the context is done. Pending forever on a background
    /// context.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Fail fast when the context is already done.
    pub fn check(&self) -> Result<(), TopoError> {
        if self.is_done() {
            Err(self.error("context is done"))
        } else {
            Ok(())
        }
    }

    /// The error describing why this context is done: `Timeout` for an
    /// expired deadline, `Interrupted` for a cancellation.
    pub fn error(&self, node_path: impl fmt::Display) -> TopoError {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            TopoError::timeout(node_path)
        } else {
            TopoError::interrupted(node_path)
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TopoErrorIntrospect;

    #[tokio::test]
    async fn background_never_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn cancel_propagates_to_children() {
        let ctx = Context::background();
        let (child, token) = ctx.with_cancel();
        let (grandchild, _) = child.with_cancel();
        token.cancel();
        assert!(child.is_done());
        assert!(grandchild.is_done());
        assert!(child.error("some/path").is_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_into_timeout() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        assert!(ctx.check().is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ctx.is_done());
        assert!(ctx.error("some/path").is_timeout());
        assert!(ctx.check().unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_never_extends_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(child.is_done());
    }
}
