//! Cancellation signal shared between a resolver session and its host.

use crate::error::{ResolverError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable handle; cancelling any clone cancels them all.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so wait_for only fails on drop.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` until it completes or the token is cancelled.
    ///
    /// The pending future is dropped on cancellation, which releases any
    /// prompt reply channel or device exchange it was holding.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(ResolverError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ResolverError::Cancelled),
            res = fut => res,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
