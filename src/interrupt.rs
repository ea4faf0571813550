//! Cooperative interruption for long compile phases and textual dumps.
//!
//! Numeric evaluation is uninterruptible once entered; the flag is only
//! polled between nodes during sorting and between lines during printing.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Interrupted;

static FLAG: AtomicBool = AtomicBool::new(false);

/// Process-wide interrupt hook.
///
/// A signal handler (or another thread) calls [`InterruptHandler::trigger`];
/// long-running compile and print loops poll [`InterruptHandler::check`] and
/// bail out with [`Interrupted`].
pub struct InterruptHandler;

impl InterruptHandler {
    /// Raise the interrupt flag.
    pub fn trigger() {
        FLAG.store(true, Ordering::Relaxed);
    }

    /// Clear the interrupt flag.
    pub fn clear() {
        FLAG.store(false, Ordering::Relaxed);
    }

    /// Return `Err(Interrupted)` and clear the flag if it is raised.
    pub fn check() -> Result<(), Interrupted> {
        if FLAG.swap(false, Ordering::Relaxed) {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}
