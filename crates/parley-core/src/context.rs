//! Caller-supplied cancellation and deadline for store operations.
//!
//! Every store operation is a future that owns its transaction. Dropping the
//! future before it finishes rolls the transaction back, so racing it
//! against a cancellation token or a deadline can never leave a partial
//! write behind.

use std::future::Future;
use std::time::Duration;

use parley_types::error::StoreError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancelled whenever `token` (or a parent of it) is cancelled.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run `operation` unless the context is already done, abandoning it
    /// (and rolling back whatever it had started) if the context finishes
    /// first.
    pub async fn run<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if self.cancellation.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::DeadlineExceeded);
        }

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                tracing::debug!("Store operation cancelled");
                Err(StoreError::Cancelled)
            }
            _ = deadline => {
                tracing::debug!("Store operation deadline exceeded");
                Err(StoreError::DeadlineExceeded)
            }
            result = operation => result,
        }
    }
}
