//! Cancellation shared between a runtime and whoever wants to stop it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A flag that can be raised from any thread or task.
///
/// The runtime polls it between documents and sources; raising it never
/// interrupts a script that is already running.
#[derive(Debug, Default)]
pub struct CancelToken {
    raised: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }
}
