// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the mirroring engine.
//!
//! Failures are contained per post and per connection: a driver logs the
//! error, writes an audit entry and moves on. The variants below tell the
//! caller *how* to move on.
//!
//! # Error Categories
//!
//! | Error Type | Handling | Description |
//! |------------|----------|-------------|
//! | `DuplicateKey` | Skip | Mapping already recorded; caller treats it as "skip" |
//! | `RateLimited` | Wait, retry once | Platform asked us to wait |
//! | `PermanentDelivery` | Audit, next post | Bad reference, permission denied, oversized payload, repeated flood wait |
//! | `TransformDegraded` | Send original | Transcode failed; original media is forwarded instead |
//! | `NotFound` | Surface | Connection or rule vanished under the operation |
//! | `Store` | Surface | Local SQLite errors (needs operator attention) |
//! | `Platform` | Audit, next post | Transport failure talking to the messaging platform |
//! | `Config` | Surface | Configuration or operator input invalid |
//! | `InvalidState` | Surface | Engine lifecycle violation |
//! | `Shutdown` | Stop | Engine is shutting down; no new send starts |

use std::time::Duration;
use thiserror::Error;

/// Result type alias for mirroring operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring posts.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// A mapping for this (connection, source post) pair already exists.
    ///
    /// This is the at-most-once guarantee doing its job. Callers treat it
    /// as "already done", never as a failure.
    #[error("Mapping already exists for connection {connection_id}, source post {source_post_id}")]
    DuplicateKey {
        connection_id: i64,
        source_post_id: i64,
    },

    /// The platform signalled a flood wait.
    #[error("Rate limited: retry after {wait:?}")]
    RateLimited { wait: Duration },

    /// Delivery can never succeed for this post in this pass.
    #[error("Permanent delivery failure: {reason}")]
    PermanentDelivery { reason: String },

    /// A media transform failed and the payload fell back to the original.
    #[error("Transform degraded ({kind}): {message}")]
    TransformDegraded { kind: &'static str, message: String },

    /// A connection or rule referenced by an operation no longer exists.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// SQLite error in the configuration / mapping store.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Transport-level failure talking to the messaging platform.
    #[error("Platform error: {0}")]
    Platform(String),

    /// Invalid configuration or operator input.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine lifecycle violation (e.g. `start()` twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,
}

impl MirrorError {
    /// Shorthand for a missing connection.
    pub fn connection_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "connection",
            id,
        }
    }

    /// True for the "already replicated" outcome.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Short label used for metrics and audit entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::RateLimited { .. } => "rate_limited",
            Self::PermanentDelivery { .. } => "permanent_delivery",
            Self::TransformDegraded { .. } => "transform_degraded",
            Self::NotFound { .. } => "not_found",
            Self::Store(_) => "store",
            Self::Platform(_) => "platform",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
        }
    }
}
