// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The single replication path shared by every driver.
//!
//! ```text
//!  driver ──▶ claim (conn, post) ──▶ mapping exists? ──yes──▶ AlreadyMapped
//!                                         │ no
//!                                         ▼
//!             download media ──▶ transform ──▶ deliver (reply link, retry once)
//!                                                   │ dest id
//!                                                   ▼
//!             put_mapping ──▶ advance cursor ──▶ audit "transfer"
//! ```
//!
//! # At-most-once
//!
//! Two guards keep a post from being sent twice for one connection:
//!
//! 1. An in-process claim on `(connection, post)` held for the whole pass.
//!    A second driver that sees the same post while the first is still
//!    sending backs off with [`Outcome::AlreadyMapped`].
//! 2. The store's `UNIQUE(connection_id, source_message_id)`, which is the
//!    durable authority across restarts.
//!
//! The mapping is written only after the platform returned a destination
//! id. A pass abandoned mid-send leaves no mapping behind.

use crate::config::MirrorSettings;
use crate::delivery::{classify, DeliveryExecutor};
use crate::error::{MirrorError, Result};
use crate::platform::{ChatHandle, Platform, Post};
use crate::resilience::{retry_then_give_up, RetryPolicy};
use crate::store::{AuditAction, Connection, MirrorStore};
use crate::transform::TransformPipeline;
use dashmap::DashMap;
use futures::TryFutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What happened to a candidate post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Sent and recorded.
    Transferred {
        destination_post_id: i64,
        /// Media went out untransformed.
        degraded: bool,
    },
    /// A mapping exists, or another driver is replicating it right now.
    AlreadyMapped,
    /// Content kind that is never mirrored.
    Unsupported,
}

impl Outcome {
    pub fn is_transferred(&self) -> bool {
        matches!(self, Outcome::Transferred { .. })
    }
}

/// Removes the in-flight claim when the pass ends, however it ends.
struct ClaimGuard<'a> {
    claims: &'a DashMap<(i64, i64), &'static str>,
    key: (i64, i64),
    in_flight: &'a AtomicUsize,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.key);
        let now = self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        crate::metrics::set_in_flight(now);
    }
}

/// Watermark for a connection: configured text, else the destination's
/// public handle, else nothing.
pub fn watermark_for(connection: &Connection, destination: &ChatHandle) -> String {
    connection
        .watermark_text
        .clone()
        .filter(|w| !w.trim().is_empty())
        .or_else(|| destination.public_handle())
        .unwrap_or_default()
}

/// Shared replication component.
pub struct Replicator<P: Platform> {
    store: Arc<MirrorStore>,
    platform: Arc<P>,
    pipeline: TransformPipeline,
    delivery: DeliveryExecutor<P>,
    /// (connection, source post) → driver holding the claim.
    claims: DashMap<(i64, i64), &'static str>,
    /// Resolved chat handles keyed by operator reference.
    chats: DashMap<String, ChatHandle>,
    in_flight: AtomicUsize,
    /// Flood-wait discipline for resolve and download calls.
    retry: RetryPolicy,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl<P: Platform> Replicator<P> {
    pub fn new(platform: Arc<P>, store: Arc<MirrorStore>, settings: &MirrorSettings) -> Self {
        let pipeline = TransformPipeline::new(settings.watermark.clone());
        Self::with_pipeline(platform, store, pipeline, settings)
    }

    /// Build with a preconfigured pipeline (custom font, test transcoder).
    pub fn with_pipeline(
        platform: Arc<P>,
        store: Arc<MirrorStore>,
        pipeline: TransformPipeline,
        settings: &MirrorSettings,
    ) -> Self {
        let delivery = DeliveryExecutor::new(Arc::clone(&platform), Arc::clone(&store), &settings.delivery);
        Self {
            store,
            platform,
            pipeline,
            delivery,
            claims: DashMap::new(),
            chats: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            retry: RetryPolicy::delivery(settings.delivery.retry_padding_duration()),
            shutdown_rx: None,
        }
    }

    /// Refuse to start new sends once `shutdown_rx` reads `true`.
    pub fn with_shutdown(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    fn shutting_down(&self) -> bool {
        self.shutdown_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn store(&self) -> &Arc<MirrorStore> {
        &self.store
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn delivery(&self) -> &DeliveryExecutor<P> {
        &self.delivery
    }

    /// Posts currently between claim and completion.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve a chat reference, caching successful lookups.
    pub async fn resolve_chat(&self, reference: &str) -> Result<ChatHandle> {
        if let Some(chat) = self.chats.get(reference) {
            return Ok(chat.clone());
        }
        let chat = retry_then_give_up(&self.retry, "resolve", || {
            self.platform.resolve_chat(reference).map_err(classify)
        })
        .await?;
        debug!(reference, chat_id = chat.id, "Resolved chat");
        self.chats.insert(reference.to_string(), chat.clone());
        Ok(chat)
    }

    /// Drop a cached resolution (e.g. after the operator edits a connection).
    pub fn forget_chat(&self, reference: &str) {
        self.chats.remove(reference);
    }

    /// Replicate one post, auditing any failure against the connection.
    ///
    /// This is what drivers call. Errors are still returned so the caller
    /// can decide whether to continue its pass.
    pub async fn process(&self, driver: &'static str, connection: &Connection, post: &Post) -> Result<Outcome> {
        match self.replicate(driver, connection, post).await {
            Ok(outcome) => {
                match outcome {
                    Outcome::Transferred { .. } => crate::metrics::record_transfer(driver, connection.id),
                    Outcome::AlreadyMapped => crate::metrics::record_duplicate(driver),
                    Outcome::Unsupported => crate::metrics::record_unsupported(post.content.kind().as_str()),
                }
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    driver,
                    connection_id = connection.id,
                    post_id = post.id,
                    error = %e,
                    "Failed to replicate post"
                );
                crate::metrics::record_failure(driver, e.kind());
                self.audit(
                    connection.id,
                    AuditAction::Error,
                    &format!("{}: post {} failed ({}): {}", driver, post.id, e.kind(), e),
                )
                .await;
                Err(e)
            }
        }
    }

    /// The replication pass without failure auditing.
    pub async fn replicate(&self, driver: &'static str, connection: &Connection, post: &Post) -> Result<Outcome> {
        if post.content.kind() == crate::platform::ContentKind::Unsupported {
            debug!(connection_id = connection.id, post_id = post.id, "Unsupported content, skipping");
            return Ok(Outcome::Unsupported);
        }

        let Some(_claim) = self.claim(driver, connection.id, post.id) else {
            return Ok(Outcome::AlreadyMapped);
        };

        if self.store.mapping_exists(connection.id, post.id).await? {
            return Ok(Outcome::AlreadyMapped);
        }

        let destination = self.resolve_chat(&connection.destination).await?;
        let rules = self.store.list_rules(connection.id).await?;
        let watermark = watermark_for(connection, &destination);

        let media = match post.content.media() {
            Some(media) => {
                retry_then_give_up(&self.retry, "download", || self.platform.download(media).map_err(classify))
                    .await?
            }
            None => Vec::new(),
        };

        let Some(transformed) = self
            .pipeline
            .transform(&post.content, media, &rules, &watermark)
            .await
        else {
            return Ok(Outcome::Unsupported);
        };

        if self.shutting_down() {
            debug!(connection_id = connection.id, post_id = post.id, "Shutting down, send not started");
            return Err(MirrorError::Shutdown);
        }

        let destination_post_id = self
            .delivery
            .deliver(connection.id, destination.id, &transformed.payload, post.reply_to)
            .await?;

        match self.store.put_mapping(connection.id, post.id, destination_post_id).await {
            Ok(()) => {}
            Err(e) if e.is_duplicate() => {
                // Only reachable when another process shares the database.
                warn!(
                    connection_id = connection.id,
                    post_id = post.id,
                    destination_post_id,
                    "Mapping appeared while sending; destination now holds a second copy"
                );
                return Ok(Outcome::AlreadyMapped);
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.store.advance_cursor(connection.id, post.id).await {
            warn!(connection_id = connection.id, post_id = post.id, error = %e, "Cursor advance failed");
        }

        self.audit(
            connection.id,
            AuditAction::Transfer,
            &format!(
                "{}: {} → {} | post {} → {}",
                driver, connection.source, connection.destination, post.id, destination_post_id
            ),
        )
        .await;

        let degraded = transformed.degraded.is_some();
        if let Some(reason) = transformed.degraded {
            self.audit(
                connection.id,
                AuditAction::Error,
                &format!("{}: post {} sent untransformed: {}", driver, post.id, reason),
            )
            .await;
        }

        info!(
            driver,
            connection_id = connection.id,
            post_id = post.id,
            destination_post_id,
            kind = %post.content.kind(),
            degraded,
            "Post mirrored"
        );

        Ok(Outcome::Transferred {
            destination_post_id,
            degraded,
        })
    }

    fn claim(&self, driver: &'static str, connection_id: i64, post_id: i64) -> Option<ClaimGuard<'_>> {
        let key = (connection_id, post_id);
        match self.claims.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(holder) => {
                debug!(
                    connection_id,
                    post_id,
                    holder = *holder.get(),
                    driver,
                    "Post already being replicated by another driver"
                );
                None
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(driver);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                crate::metrics::set_in_flight(now);
                Some(ClaimGuard {
                    claims: &self.claims,
                    key,
                    in_flight: &self.in_flight,
                })
            }
        }
    }

    /// Append an audit entry; failures are logged, never propagated.
    pub async fn audit(&self, connection_id: i64, action: AuditAction, details: &str) {
        if let Err(e) = self.store.append_audit(connection_id, action, details).await {
            warn!(connection_id, action = %action, error = %e, "Failed to append audit entry");
        }
    }
}
