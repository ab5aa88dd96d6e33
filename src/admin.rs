// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operator-facing configuration API.
//!
//! Everything the admin bot (or any other front end) can change goes
//! through [`MirrorAdmin`], so every change leaves an audit entry next to the
//! transfers it affects. The front end itself (menus, buttons, message
//! formatting) is not part of this crate; see [`crate::wizard`] for the
//! conversation state machine that collects the inputs.

use crate::config::MirrorSettings;
use crate::coordinator::{backfill, BackfillOptions, BackfillReport};
use crate::delivery::classify;
use crate::error::{MirrorError, Result};
use crate::platform::{Content, Payload, Platform};
use crate::replicator::{watermark_for, Replicator};
use crate::resilience::{retry_then_give_up, RetryPolicy};
use crate::store::{AuditAction, AuditView, Connection, SubstitutionRule};
use crate::transform::Transformed;
use futures::TryFutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// How long the connection test leaves its posts up before deleting them.
pub const DEFAULT_TEST_HOLD: Duration = Duration::from_secs(5);

const TEST_MARKER: &str = "🧪 Connection test: this post and the one above are removed in a few seconds.";

/// Check an operator-entered channel reference.
///
/// Accepted forms: `@username`, `-100…` channel ids and bare numeric ids.
/// Returns the trimmed reference.
pub fn validate_reference(raw: &str) -> Result<String> {
    let reference = raw.trim();
    let accepted = reference.starts_with('@')
        || reference.starts_with("-100")
        || (!reference.is_empty() && reference.chars().all(|c| c.is_ascii_digit()));

    if accepted {
        Ok(reference.to_string())
    } else {
        Err(MirrorError::Config(format!(
            "invalid channel reference {:?}: use @username or a numeric id",
            reference
        )))
    }
}

/// A connection with its rules and transfer totals.
#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    pub connection: Connection,
    pub rules: Vec<SubstitutionRule>,
    /// Mappings recorded.
    pub transferred: i64,
    /// Scan cursor (0 if never scanned).
    pub last_scanned: i64,
}

/// Snapshot for the status screen.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub connections: usize,
    pub active: usize,
    pub restricted: usize,
    /// Newest first.
    pub recent: Vec<AuditView>,
}

/// Post ids produced by [`MirrorAdmin::test_connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTest {
    pub source_post_id: i64,
    pub copied_post_id: i64,
    pub marker_post_id: i64,
}

/// Configuration operations with audit entries.
pub struct MirrorAdmin<P: Platform> {
    replicator: Arc<Replicator<P>>,
    settings: MirrorSettings,
    shutdown_rx: watch::Receiver<bool>,
    test_hold: Duration,
}

impl<P: Platform> MirrorAdmin<P> {
    pub fn new(replicator: Arc<Replicator<P>>, settings: MirrorSettings, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            replicator,
            settings,
            shutdown_rx,
            test_hold: DEFAULT_TEST_HOLD,
        }
    }

    /// Override how long test posts stay up.
    pub fn with_test_hold(mut self, hold: Duration) -> Self {
        self.test_hold = hold;
        self
    }

    async fn audit(&self, connection_id: i64, action: AuditAction, details: String) {
        self.replicator.audit(connection_id, action, &details).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a connection after validating both references.
    pub async fn create_connection(&self, source: &str, destination: &str, restricted: bool) -> Result<Connection> {
        let source = validate_reference(source)?;
        let destination = validate_reference(destination)?;
        let store = self.replicator.store();

        let id = store.create_connection(&source, &destination, restricted).await?;
        self.audit(
            id,
            AuditAction::AddConnection,
            format!(
                "connection {} → {} registered (restricted: {})",
                source,
                destination,
                if restricted { "yes" } else { "no" }
            ),
        )
        .await;

        store.require_connection(id).await
    }

    /// Delete a connection. Rules, mappings and audit entries go with it.
    pub async fn delete_connection(&self, id: i64) -> Result<Connection> {
        let store = self.replicator.store();
        let connection = store.require_connection(id).await?;
        store.delete_connection(id).await?;
        // A later connection may reuse the reference for a different chat.
        self.replicator.forget_chat(&connection.source);
        self.replicator.forget_chat(&connection.destination);
        info!(
            connection_id = id,
            source = %connection.source,
            destination = %connection.destination,
            "Connection removed by operator"
        );
        Ok(connection)
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let store = self.replicator.store();
        let connection = store.require_connection(id).await?;
        store.set_active(id, active).await?;
        self.audit(
            id,
            AuditAction::Toggle,
            format!(
                "{}: {} → {}",
                if active { "enabled" } else { "disabled" },
                connection.source,
                connection.destination
            ),
        )
        .await;
        Ok(())
    }

    /// Flip the active flag; returns the new value.
    pub async fn toggle(&self, id: i64) -> Result<bool> {
        let connection = self.replicator.store().require_connection(id).await?;
        let active = !connection.active;
        self.set_active(id, active).await?;
        Ok(active)
    }

    pub async fn set_restricted(&self, id: i64, restricted: bool) -> Result<()> {
        let store = self.replicator.store();
        store.set_restricted(id, restricted).await?;
        self.audit(
            id,
            AuditAction::Toggle,
            format!("restricted polling {}", if restricted { "on" } else { "off" }),
        )
        .await;
        Ok(())
    }

    pub async fn set_watermark(&self, id: i64, text: &str) -> Result<()> {
        self.replicator.store().set_watermark(id, Some(text)).await?;
        self.audit(id, AuditAction::SetWatermark, format!("watermark set to {:?}", text.trim()))
            .await;
        Ok(())
    }

    /// Fall back to the destination handle.
    pub async fn clear_watermark(&self, id: i64) -> Result<()> {
        self.replicator.store().set_watermark(id, None).await?;
        self.audit(id, AuditAction::SetWatermark, "watermark cleared".to_string())
            .await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Substitution rules
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn add_rule(&self, connection_id: i64, original: &str, replacement: &str) -> Result<i64> {
        if original.trim().is_empty() {
            return Err(MirrorError::Config("original word must not be blank".into()));
        }
        let store = self.replicator.store();
        let connection = store.require_connection(connection_id).await?;
        let rule_id = store.add_rule(connection_id, original, replacement).await?;
        self.audit(
            connection_id,
            AuditAction::AddRule,
            format!(
                "'{}' → '{}' for {} → {}",
                original, replacement, connection.source, connection.destination
            ),
        )
        .await;
        Ok(rule_id)
    }

    pub async fn remove_rule(&self, rule_id: i64) -> Result<SubstitutionRule> {
        let rule = self.replicator.store().remove_rule(rule_id).await?;
        self.audit(
            rule.connection_id,
            AuditAction::RemoveRule,
            format!("'{}' → '{}' removed", rule.original, rule.replacement),
        )
        .await;
        Ok(rule)
    }

    /// Remove every rule of a connection; returns how many were removed.
    pub async fn clear_rules(&self, connection_id: i64) -> Result<u64> {
        let store = self.replicator.store();
        let connection = store.require_connection(connection_id).await?;
        let removed = store.clear_rules(connection_id).await?;
        self.audit(
            connection_id,
            AuditAction::ClearRules,
            format!(
                "{} rule(s) cleared for {} → {}",
                removed, connection.source, connection.destination
            ),
        )
        .await;
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reports
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn list(&self) -> Result<Vec<ConnectionSummary>> {
        let store = self.replicator.store();
        let mut summaries = Vec::new();
        for connection in store.list_connections().await? {
            let rules = store.list_rules(connection.id).await?;
            let (transferred, last_scanned) = store.count_and_latest(connection.id).await?;
            summaries.push(ConnectionSummary {
                connection,
                rules,
                transferred,
                last_scanned,
            });
        }
        Ok(summaries)
    }

    pub async fn status(&self, recent_limit: i64) -> Result<StatusReport> {
        let store = self.replicator.store();
        let connections = store.list_connections().await?;
        Ok(StatusReport {
            connections: connections.len(),
            active: connections.iter().filter(|c| c.active).count(),
            restricted: connections.iter().filter(|c| c.active && c.restricted).count(),
            recent: store.recent_audit(recent_limit).await?,
        })
    }

    /// Operator-triggered history walk.
    pub async fn backfill(&self, connection_id: i64, from_start: bool) -> Result<BackfillReport> {
        let options = BackfillOptions::from_settings(&self.settings, from_start);
        backfill::backfill(&self.replicator, connection_id, &options, &self.shutdown_rx).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy the newest source post to the destination, then clean up.
    ///
    /// Posts a copy plus a marker, holds them for the test hold, then deletes
    /// both. Mappings and the scan cursor are never touched, so the post is
    /// still mirrored normally later. Only text and photo posts can be used.
    /// If the marker cannot be posted, the copy is deleted before the error
    /// is returned.
    pub async fn test_connection(&self, connection_id: i64) -> Result<ConnectionTest> {
        let connection = self.replicator.store().require_connection(connection_id).await?;
        let platform = self.replicator.platform();
        let source = self.replicator.resolve_chat(&connection.source).await?;
        let destination = self.replicator.resolve_chat(&connection.destination).await?;

        let newest = platform
            .history(source.id, 0, 1)
            .await
            .map_err(classify)?
            .into_iter()
            .next()
            .ok_or_else(|| MirrorError::PermanentDelivery {
                reason: format!("{} has no posts to test with", connection.source),
            })?;

        let payload = match &newest.content {
            Content::Text(text) => Payload::Text { text: text.clone() },
            Content::Photo { media, caption } => Payload::Photo {
                bytes: platform.download(media).await.map_err(classify)?,
                caption: caption.clone(),
            },
            other => {
                return Err(MirrorError::PermanentDelivery {
                    reason: format!("newest source post is {}, test needs text or photo", other.kind()),
                })
            }
        };

        let delivery = self.replicator.delivery();
        let copied_post_id = delivery.send(destination.id, &payload, None).await?;
        let marker = Payload::Text {
            text: TEST_MARKER.to_string(),
        };
        let marker_post_id = match delivery.send(destination.id, &marker, None).await {
            Ok(id) => id,
            Err(e) => {
                self.remove_test_posts(destination.id, vec![copied_post_id]).await?;
                return Err(e);
            }
        };

        tokio::time::sleep(self.test_hold).await;
        self.remove_test_posts(destination.id, vec![copied_post_id, marker_post_id])
            .await?;

        info!(
            connection_id,
            source_post_id = newest.id,
            copied_post_id,
            marker_post_id,
            "Connection test passed"
        );
        Ok(ConnectionTest {
            source_post_id: newest.id,
            copied_post_id,
            marker_post_id,
        })
    }

    /// Delete test posts, waiting out one flood wait.
    async fn remove_test_posts(&self, chat_id: i64, post_ids: Vec<i64>) -> Result<()> {
        let platform = self.replicator.platform();
        let policy = RetryPolicy::delivery(self.settings.delivery.retry_padding_duration());
        let result = retry_then_give_up(&policy, "delete", || {
            platform.delete_posts(chat_id, post_ids.clone()).map_err(classify)
        })
        .await;
        if let Err(e) = &result {
            warn!(chat_id, ?post_ids, error = %e, "Connection test left posts behind");
        }
        result
    }

    /// Watermark a single photo the way this connection would, as one
    /// bottom-left label. Nothing is sent.
    pub async fn preview_watermark(&self, connection_id: i64, photo: Vec<u8>) -> Result<Transformed> {
        let connection = self.replicator.store().require_connection(connection_id).await?;
        let destination = self.replicator.resolve_chat(&connection.destination).await?;
        let label = watermark_for(&connection, &destination);
        Ok(self.replicator.pipeline().label_photo(photo, &label, None).await)
    }
}
