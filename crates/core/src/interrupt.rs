//! Cooperative interruption.
//!
//! [`InterruptFlag`] is a cloneable handle over one shared boolean. A caller
//! in another task (a UI cancel button, a Ctrl-C handler) calls
//! [`InterruptFlag::cancel`]; the agent loop only looks at the flag at its
//! checkpoints, so a tool call that has started always runs to completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the running task.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Reset before a new instruction.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
