//! Single-sender / single-receiver enforcement.

use crate::error::{SerialError, SerialResult};
use std::sync::atomic::{AtomicBool, Ordering};

/// Marks one direction of a stream as busy while a logical operation runs.
///
/// Entering while busy fails immediately with [`SerialError::Conflict`]. This is
/// a usage check, not a lock: nobody ever waits on it.
#[derive(Debug)]
pub struct ConflictDetector {
    busy: AtomicBool,
    message: &'static str,
}

impl ConflictDetector {
    pub const fn new(message: &'static str) -> Self {
        Self {
            busy: AtomicBool::new(false),
            message,
        }
    }

    /// Mark the direction busy until the returned guard is dropped.
    pub fn enter(&self) -> SerialResult<ConflictGuard<'_>> {
        if self.busy.swap(true, Ordering::Acquire) {
            return Err(SerialError::Conflict(self.message));
        }
        Ok(ConflictGuard { detector: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its direction on drop, including when the owning future is cancelled.
#[derive(Debug)]
#[must_use = "the direction is released as soon as the guard is dropped"]
pub struct ConflictGuard<'a> {
    detector: &'a ConflictDetector,
}

impl Drop for ConflictGuard<'_> {
    fn drop(&mut self) {
        self.detector.busy.store(false, Ordering::Release);
    }
}
