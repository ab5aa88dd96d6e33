//! # Channel Mirror
//!
//! A channel mirroring engine: copies posts from source channels to
//! destination channels on a Telegram-like platform, rewriting text and
//! watermarking media on the way.
//!
//! ## Architecture
//!
//! Three drivers discover candidate posts and hand them to one shared
//! replication path:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              channel-mirror                               │
//! │                                                                           │
//! │  ┌──────────────────┐                                                     │
//! │  │ Realtime listener│──┐                                                  │
//! │  │ (pushed events)  │  │   ┌────────────┐   ┌───────────┐   ┌──────────┐  │
//! │  └──────────────────┘  │   │ Replicator │   │ Transform │   │ Delivery │  │
//! │  ┌──────────────────┐  ├──►│ claim+gate │──►│ text/photo│──►│ reply map│  │
//! │  │ Restricted poller│──┤   │            │   │ /video    │   │ retry x1 │  │
//! │  │ (interval)       │  │   └─────┬──────┘   └───────────┘   └────┬─────┘  │
//! │  └──────────────────┘  │         │                               │        │
//! │  ┌──────────────────┐  │         ▼                               ▼        │
//! │  │ Backfill walker  │──┘   ┌──────────────────────────────────────────┐   │
//! │  │ (operator)       │      │ MirrorStore (SQLite): connections, rules,│   │
//! │  └──────────────────┘      │ mappings, cursor, audit                  │   │
//! │                            └──────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## At-most-once
//!
//! A post is sent at most once per connection. The store's unique
//! `(connection, source post)` mapping is the authority; the scan cursor is
//! only a resume hint.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use channel_mirror::{MirrorConfig, MirrorEngine};
//! use std::sync::Arc;
//!
//! let config = MirrorConfig::from_json_file("mirror.json")?;
//! let mut engine = MirrorEngine::new(config, Arc::new(my_platform_client));
//! engine.start().await?;
//!
//! // Feed live channel posts from the platform client's update handler.
//! let events = engine.event_sender();
//! events.send(post).await?;
//!
//! // Operator actions.
//! let admin = engine.admin()?;
//! admin.create_connection("@source", "@mirror", false).await?;
//!
//! engine.shutdown().await;
//! ```

pub mod admin;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod platform;
pub mod replicator;
pub mod resilience;
pub mod store;
pub mod transform;
pub mod wizard;

// Re-exports for convenience
pub use admin::{validate_reference, ConnectionSummary, ConnectionTest, MirrorAdmin, StatusReport};
pub use config::{
    BackfillConfig, DeliveryConfig, MirrorConfig, MirrorSettings, PollerConfig, ShutdownConfig, StoreConfig,
    WatermarkConfig,
};
pub use coordinator::{BackfillReport, EngineState, MirrorEngine, PollStats};
pub use delivery::DeliveryExecutor;
pub use error::{MirrorError, Result};
pub use platform::{ChatHandle, Content, ContentKind, MediaRef, Payload, Platform, PlatformError, Post};
pub use replicator::{Outcome, Replicator};
pub use store::{AuditAction, AuditEntry, Connection, MirrorStore, SubstitutionRule, TransferRecord};
pub use transform::{TransformPipeline, Transformed};
pub use wizard::{Wizard, WizardCommand, WizardState, WizardStep};
