//! Execution context threaded through every cluster call

use crate::cluster::ClusterError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default deadline for a single cluster call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-reconciliation execution context
///
/// Each cluster call made on behalf of a reconciliation runs through
/// [`ReconcileContext::call`], which bounds it by `call_timeout` and aborts
/// it as soon as the cancellation token fires.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    call_timeout: Duration,
    cancel: CancellationToken,
}

impl Default for ReconcileContext {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl ReconcileContext {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Context cancelled together with `parent`
    pub fn child_of(parent: &CancellationToken, call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            cancel: parent.child_token(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one cluster call under this context's deadline and cancellation
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, ClusterError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ClusterError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClusterError::Cancelled),
            res = tokio::time::timeout(self.call_timeout, fut) => {
                res.unwrap_or(Err(ClusterError::Timeout(self.call_timeout)))
            }
        }
    }
}
