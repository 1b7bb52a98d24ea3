//! Per-task cancellation tokens.
//!
//! Each running pipeline gets a `CancelToken`. Calling `cancel()` signals
//! the orchestrator to stop at its next checkpoint (sub-step or retry
//! boundary). In-flight vendor calls are allowed to finish; their results
//! are recorded but not propagated further.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// A cancellation token checked by the pipeline loop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the active cancellation token per task.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new token for a task.
    pub fn register(&self, task_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(task_id, token.clone());
        token
    }

    /// Cancel a running pipeline. Returns true if a token was found.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        match self.tokens.lock().get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when a pipeline finishes.
    pub fn remove(&self, task_id: Uuid) {
        self.tokens.lock().remove(&task_id);
    }

    /// Whether a task has a live pipeline.
    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn map_register_cancel_remove() {
        let map = CancelMap::new();
        let id = Uuid::new_v4();
        let token = map.register(id);
        assert!(map.is_running(id));

        assert!(map.cancel(id));
        assert!(token.is_cancelled());

        map.remove(id);
        assert!(!map.is_running(id));
        assert!(!map.cancel(id));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        let id = Uuid::new_v4();
        map.register(id);
        map.remove(id);
        map.remove(id);
        assert!(!map.is_running(id));
    }
}
