// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Realtime listener: mirror live source-channel posts as they arrive.
//!
//! The embedding daemon pushes every post it observes into an mpsc channel
//! (see [`MirrorEngine::event_sender`](super::MirrorEngine::event_sender)).
//! Events are handled one at a time, so posts of a channel are mirrored in
//! arrival order. Within one event, all matching connections run
//! concurrently and independently: a failure for one connection is audited
//! and does not hold up the others.
//!
//! # Graceful Shutdown
//!
//! The listener `select!`s between the next event and the shutdown signal.
//! An event already being processed runs to completion; events still queued
//! are left in the channel.

use crate::error::Result;
use crate::platform::{Platform, Post};
use crate::replicator::{Outcome, Replicator};
use crate::store::{AuditAction, Connection};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn, Instrument};

const DRIVER: &str = "realtime";

/// Run the realtime listener until shutdown or until every sender is dropped.
pub async fn run_listener<P: Platform>(
    replicator: Arc<Replicator<P>>,
    mut events: mpsc::Receiver<Post>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("realtime");

    async move {
        let _ = shutdown_rx.borrow_and_update();
        info!("Starting realtime listener");

        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping realtime listener");
                        break;
                    }
                }

                event = events.recv() => {
                    let Some(post) = event else {
                        info!("Event channel closed, stopping realtime listener");
                        break;
                    };
                    handle_event(&replicator, &post).await;
                }
            }
        }

        info!("Realtime listener stopped");
    }
    .instrument(span)
    .await
}

/// Mirror one source post to every active connection watching its chat.
///
/// Returns the number of connections the post was transferred to.
pub async fn handle_event<P: Platform>(replicator: &Replicator<P>, post: &Post) -> usize {
    let targets = match matching_connections(replicator, post).await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(chat_id = post.chat_id, post_id = post.id, error = %e, "Failed to load connections");
            return 0;
        }
    };
    crate::metrics::record_event_received(targets.len());

    if targets.is_empty() {
        debug!(chat_id = post.chat_id, post_id = post.id, "No active connection for chat");
        return 0;
    }

    let results = join_all(
        targets
            .iter()
            .map(|connection| replicator.process(DRIVER, connection, post)),
    )
    .await;

    results
        .iter()
        .filter(|r| matches!(r, Ok(Outcome::Transferred { .. })))
        .count()
}

/// Active connections whose source reference resolves to the post's chat.
///
/// A connection whose source cannot be resolved (after one flood-wait
/// retry) is skipped. Realtime has no later pass over the post, so the miss
/// is audited against that connection.
pub async fn matching_connections<P: Platform>(replicator: &Replicator<P>, post: &Post) -> Result<Vec<Connection>> {
    let mut matched = Vec::new();
    for connection in replicator.store().active_connections().await? {
        match replicator.resolve_chat(&connection.source).await {
            Ok(source) if source.id == post.chat_id => matched.push(connection),
            Ok(_) => {}
            Err(e) => {
                warn!(
                    connection_id = connection.id,
                    source = %connection.source,
                    post_id = post.id,
                    error = %e,
                    "Cannot resolve connection source"
                );
                crate::metrics::record_failure(DRIVER, e.kind());
                replicator
                    .audit(
                        connection.id,
                        AuditAction::Error,
                        &format!(
                            "{}: post {} from chat {} not checked, source {} unresolved ({}): {}",
                            DRIVER,
                            post.id,
                            post.chat_id,
                            connection.source,
                            e.kind(),
                            e
                        ),
                    )
                    .await;
            }
        }
    }
    Ok(matched)
}
