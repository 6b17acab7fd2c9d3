//! Cooperative cancellation for multi-statement operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, StorageError};

/// A cloneable cancellation flag.
///
/// Batch operations poll the token between statements and between `BEGIN
/// IMMEDIATE` retry attempts; a cancelled batch rolls back. Single-statement
/// operations are atomic at the engine level and never observe the token
/// mid-flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. All clones observe the flag.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Errors with [`StorageError::Cancelled`] if the token is set.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled {
                operation: operation.to_owned(),
            });
        }
        Ok(())
    }
}
