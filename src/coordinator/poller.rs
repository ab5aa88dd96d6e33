// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Restricted poller: pull recent posts from channels that cannot be watched.
//!
//! Every interval, for each active connection flagged restricted:
//!
//! 1. Fetch the newest `window` posts of the source (newest first)
//! 2. Walk them newest → oldest
//! 3. An already-mapped post ends the scan; everything older is covered
//! 4. The first unmapped, supported post is mirrored and the scan ends
//!
//! At most one post per connection per cycle. A backlog deeper than one
//! post drains one cycle at a time; run a backfill to catch up faster.

use crate::config::PollerConfig;
use crate::delivery::classify;
use crate::error::Result;
use crate::platform::Platform;
use crate::replicator::{Outcome, Replicator};
use crate::store::{AuditAction, Connection};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn, Instrument};

use super::types::PollStats;

const DRIVER: &str = "poller";

/// What one connection's scan ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// This post was mirrored.
    Transferred(i64),
    /// Scan reached a post that is already mapped (or being mapped).
    UpToDate,
    /// The window held nothing mirrorable.
    NothingNew,
}

/// Run the restricted poller until shutdown is signaled.
pub async fn run_poller<P: Platform>(
    replicator: Arc<Replicator<P>>,
    config: PollerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("restricted_poller");

    async move {
        let _ = shutdown_rx.borrow_and_update();

        let interval = config.interval_duration();
        info!(
            interval_secs = interval.as_secs(),
            window = config.window,
            "Starting restricted poller"
        );

        // First cycle runs one full interval after start.
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping poller");
                        break;
                    }
                    continue;
                }

                _ = timer.tick() => {}
            }

            poll_cycle(&replicator, config.window).await;
        }

        info!("Restricted poller stopped");
    }
    .instrument(span)
    .await
}

/// One pass over every restricted connection.
#[instrument(skip(replicator))]
pub async fn poll_cycle<P: Platform>(replicator: &Replicator<P>, window: usize) -> PollStats {
    let started = Instant::now();
    let mut stats = PollStats::default();

    let connections = match replicator.store().restricted_connections().await {
        Ok(connections) => connections,
        Err(e) => {
            warn!(error = %e, "Failed to load restricted connections");
            stats.errors += 1;
            return stats;
        }
    };

    for connection in &connections {
        stats.connections += 1;
        match poll_connection(replicator, connection, window).await {
            Ok(PollResult::Transferred(post_id)) => {
                debug!(connection_id = connection.id, post_id, "Restricted post mirrored");
                stats.transferred += 1;
            }
            Ok(PollResult::UpToDate) => stats.up_to_date += 1,
            Ok(PollResult::NothingNew) => {}
            Err(e) => {
                // Already audited; keep going with the next connection.
                warn!(connection_id = connection.id, error = %e, "Restricted poll failed");
                stats.errors += 1;
            }
        }
    }

    crate::metrics::record_poll_cycle(stats.connections, stats.transferred, started.elapsed());
    if stats.transferred > 0 {
        info!(
            connections = stats.connections,
            transferred = stats.transferred,
            errors = stats.errors,
            "Poll cycle complete with transfers"
        );
    }
    stats
}

/// Scan one connection's newest posts; mirror at most one.
pub async fn poll_connection<P: Platform>(
    replicator: &Replicator<P>,
    connection: &Connection,
    window: usize,
) -> Result<PollResult> {
    let mut posts = match fetch_window(replicator, connection, window).await {
        Ok(posts) => posts,
        Err(e) => {
            replicator
                .audit(
                    connection.id,
                    AuditAction::Error,
                    &format!("{}: fetching {} failed: {}", DRIVER, connection.source, e),
                )
                .await;
            return Err(e);
        }
    };
    posts.sort_by(|a, b| b.id.cmp(&a.id));

    for post in posts.iter().take(window) {
        if replicator.store().mapping_exists(connection.id, post.id).await? {
            return Ok(PollResult::UpToDate);
        }
        match replicator.process(DRIVER, connection, post).await? {
            Outcome::Transferred { .. } => return Ok(PollResult::Transferred(post.id)),
            Outcome::AlreadyMapped => return Ok(PollResult::UpToDate),
            Outcome::Unsupported => continue,
        }
    }

    Ok(PollResult::NothingNew)
}

async fn fetch_window<P: Platform>(
    replicator: &Replicator<P>,
    connection: &Connection,
    window: usize,
) -> Result<Vec<crate::platform::Post>> {
    let source = replicator.resolve_chat(&connection.source).await?;
    replicator
        .platform()
        .history(source.id, 0, window)
        .await
        .map_err(classify)
}
