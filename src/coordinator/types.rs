//! Engine state types.
//!
//! Defines the state machine for the mirror engine lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Starting
//!    │                              │
//!    │ (never started)              │ (store open, drivers spawned)
//!    ↓                              ↓
//! Stopped                       Running
//!    ↑                              │
//!    │                    shutdown()│
//!    │                              ↓
//!    └────────────────── ShuttingDown
//!
//! Starting ──(store failed to open)──→ Failed
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `MirrorEngine::new()`. Store not opened.
//! - **Starting**: `start()` called, opening the store and spawning drivers.
//! - **Running**: Realtime listener consuming events, poller on its interval.
//! - **ShuttingDown**: `shutdown()` called. In-flight posts are draining.
//! - **Stopped**: Store checkpointed and closed. Safe to drop.
//! - **Failed**: Startup failed. Engine cannot continue.

/// State of the mirror engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    ///
    /// Call [`start()`](super::MirrorEngine::start) to begin mirroring.
    Created,

    /// Opening the store and spawning drivers.
    Starting,

    /// Running and mirroring.
    Running,

    /// Shutting down gracefully.
    ///
    /// Drivers stop taking new posts; posts already claimed finish or are
    /// abandoned at the drain timeout.
    ShuttingDown,

    /// Stopped.
    Stopped,

    /// Failed to start.
    ///
    /// Check logs for error details.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Starting => write!(f, "Starting"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Result of a backfill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Posts sent during this pass.
    pub transferred: usize,
    /// Connection cursor after the pass.
    pub last_scanned: i64,
    /// Posts that failed and were audited.
    pub failed: usize,
    /// History pages fetched.
    pub pages: usize,
}

/// Result of one restricted-poller cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Restricted connections examined.
    pub connections: usize,
    /// Posts sent (at most one per connection).
    pub transferred: usize,
    /// Connections whose scan hit an already-mapped post.
    pub up_to_date: usize,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(EngineState::Created.to_string(), "Created");
        assert_eq!(EngineState::Starting.to_string(), "Starting");
        assert_eq!(EngineState::Running.to_string(), "Running");
        assert_eq!(EngineState::ShuttingDown.to_string(), "ShuttingDown");
        assert_eq!(EngineState::Stopped.to_string(), "Stopped");
        assert_eq!(EngineState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_engine_state_copy() {
        let state = EngineState::Failed;
        let copied: EngineState = state;
        assert_eq!(state, copied);
    }

    #[test]
    fn test_reports_default_to_zero() {
        assert_eq!(BackfillReport::default().transferred, 0);
        assert_eq!(PollStats::default().connections, 0);
    }
}
