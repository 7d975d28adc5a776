//! Request-scoped deadline and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{ProfileError, ProfileResult};

/// Checked before every store call of a request; the first trip aborts the request.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

/// Cancels the scope it was taken from, from any thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl RequestScope {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancelled: Arc::default(),
        }
    }

    pub fn from_timeout_ms(timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            Some(ms) => Self::with_timeout(Duration::from_millis(ms)),
            None => Self::unbounded(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn check(&self, op: &'static str) -> ProfileResult<()> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(ProfileError::Cancelled { op });
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(ProfileError::DeadlineExceeded { op });
        }
        Ok(())
    }
}
