//! Cooperative build cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BuildError;

/// Shared flag checked by a build between modules and before the output swap.
///
/// Clones observe the same flag. A watcher keeps one clone and cancels it when
/// a newer change arrives; the build holds the other.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self) -> Result<(), BuildError> {
        if self.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let watcher = token.clone();
        assert!(token.check().is_ok());

        watcher.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(BuildError::Cancelled)));
    }
}
