//! The reconcile step contract.
//!
//! A reconcile pass runs an ordered list of [`Reconciler`]s against one
//! application. Each step returns a [`ReconcileResult`] telling the driver to
//! continue, to stop and retry later, or to stop with an error.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::BkApp;
use crate::{Error, Result};

/// Outcome of a single reconcile step.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    error: Option<Error>,
    abort: bool,
    requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Step done, later steps may run.
    pub fn proceed() -> Self {
        Self::default()
    }

    /// Step handled, but later steps must not run this pass. Retry later.
    pub fn abort() -> Self {
        Self {
            abort: true,
            ..Self::default()
        }
    }

    /// Step failed. Always stops the pass.
    pub fn with_error(error: Error) -> Self {
        Self {
            error: Some(error),
            abort: true,
            requeue_after: None,
        }
    }

    /// Ask for the next pass after `delay` instead of the driver's default.
    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = Some(delay);
        self
    }

    pub fn should_abort(&self) -> bool {
        self.abort || self.error.is_some()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn requeue_delay(&self) -> Option<Duration> {
        self.requeue_after
    }

    pub fn into_error(self) -> Option<Error> {
        self.error
    }
}

/// Cancellation and deadline of one reconcile pass.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ReconcileContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run a store call, failing fast if the pass is cancelled or its
    /// deadline passes first.
    pub async fn guard<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = deadline => Err(Error::Timeout(op.to_string())),
            res = fut => res,
        }
    }
}

impl Default for ReconcileContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// A step of the reconcile pipeline.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Name used in logs and pass outcomes.
    fn name(&self) -> &'static str;

    /// Reconcile `app`. Mutations the store accepted are reflected in `app`.
    async fn reconcile(&self, ctx: &ReconcileContext, app: &mut BkApp) -> ReconcileResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_abort_semantics() {
        assert!(!ReconcileResult::proceed().should_abort());
        assert!(ReconcileResult::abort().should_abort());
        assert!(ReconcileResult::abort().error().is_none());

        let failed = ReconcileResult::with_error(Error::Store("boom".to_string()));
        assert!(failed.should_abort());
        assert_eq!(
            failed.into_error(),
            Some(Error::Store("boom".to_string()))
        );
    }

    #[test]
    fn test_result_requeue_hint() {
        let result = ReconcileResult::abort().requeue_after(Duration::from_secs(3));
        assert_eq!(result.requeue_delay(), Some(Duration::from_secs(3)));
        assert_eq!(ReconcileResult::abort().requeue_delay(), None);
    }

    #[tokio::test]
    async fn test_guard_passes_through() {
        let ctx = ReconcileContext::default();
        let value = ctx.guard("noop", async { Ok(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_guard_cancelled() {
        let ctx = ReconcileContext::default();
        ctx.token().cancel();
        assert!(ctx.is_cancelled());
        let res: Result<()> = ctx.guard("list pods", std::future::pending()).await;
        assert_eq!(res, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn test_guard_deadline() {
        let ctx = ReconcileContext::default().with_timeout(Duration::from_millis(10));
        let res: Result<()> = ctx.guard("list pods", std::future::pending()).await;
        assert_eq!(res, Err(Error::Timeout("list pods".to_string())));
    }
}
