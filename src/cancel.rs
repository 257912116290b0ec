//! Cooperative cancellation.
//!
//! Cancellation is polled once per streamed chunk, never preemptively,
//! so the worst-case latency to honor it is one chunk of io.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{CancelledSnafu, Result};

/// Shared flag checked between chunks of work. Cloning yields a handle
/// to the same flag, so one side can cancel while the other streams.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        snafu::ensure!(!self.is_cancelled(), CancelledSnafu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn fresh_token_passes() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.check().unwrap();
    }

    #[test]
    fn cancel_is_seen_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(Error::Cancelled)));
    }
}
