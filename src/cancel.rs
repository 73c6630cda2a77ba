// src/cancel.rs
//
// Cooperative cancellation for the run loop. The loop checks the token once
// per tick, before grabbing the next frame; anything holding a clone (the
// display sink's key handler, a signal handler, an embedding process) can
// request a stop without reaching into the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Clonable stop flag. All clones share one underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_one_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
