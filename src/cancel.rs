//! Cooperative cancellation for long-running reads and scans

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{VfsError, VfsResult};

/// How many reads a loop may perform between cancellation checks. Tuned so
/// cancellation latency stays under ~100ms on typical storage.
pub const CHECK_INTERVAL: u64 = 64;

/// Cooperative cancellation token shared between a caller and a long
/// operation. Cloning is cheap; all clones observe the same state.
///
/// An optional deadline turns the token into a timeout: checks past the
/// deadline fail with `TimedOut` instead of `Cancelled`.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that also trips after the given deadline.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Requests cancellation; pending operations fail at their next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fails with `Cancelled` or `TimedOut` if the token has tripped.
    pub fn check(&self) -> VfsResult<()> {
        if self.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(VfsError::TimedOut);
            }
        }
        Ok(())
    }
}

/// Counter wrapper that checks the token every `CHECK_INTERVAL` ticks.
pub struct CancelCounter {
    token: CancelToken,
    ticks: u64,
}

impl CancelCounter {
    pub fn new(token: CancelToken) -> Self {
        Self { token, ticks: 0 }
    }

    pub fn tick(&mut self) -> VfsResult<()> {
        self.ticks += 1;
        if self.ticks % CHECK_INTERVAL == 0 {
            self.token.check()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(VfsError::Cancelled)));
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_counter_interval() {
        let token = CancelToken::new();
        let mut counter = CancelCounter::new(token.clone());
        for _ in 0..CHECK_INTERVAL - 1 {
            counter.tick().unwrap();
        }
        token.cancel();
        // The tick that crosses the interval boundary observes the cancel.
        assert!(counter.tick().is_err());
    }
}
