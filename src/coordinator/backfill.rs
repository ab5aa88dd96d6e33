// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backfill walker: replicate a source channel's history.
//!
//! # Algorithm
//!
//! ```text
//! offset = 0 (newest)
//! loop:
//!   page = history(source, offset, page_size)        newest → oldest
//!   offset = oldest id in page
//!   for post in page sorted oldest → newest:
//!       incremental and post.id <= cursor   → skip
//!       mapped                              → advance cursor, skip
//!       otherwise                           → replicate like realtime
//!   page shorter than page_size             → history exhausted
//!   incremental and oldest id <= cursor     → rest already covered
//! ```
//!
//! `from_start = true` ignores the cursor; the mapping store still keeps
//! every post from going out twice, so a second full walk sends nothing.
//!
//! A post that fails (including a second flood wait after its one retry)
//! is audited and the walk moves on. Only failures to read history end the
//! walk early.

use crate::config::MirrorSettings;
use crate::delivery::classify;
use crate::error::Result;
use crate::platform::Platform;
use crate::replicator::{Outcome, Replicator};
use crate::resilience::{retry_after_flood_wait, RetryPolicy};
use crate::store::AuditAction;
use futures::TryFutureExt;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::types::BackfillReport;

const DRIVER: &str = "backfill";

/// Walk parameters.
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Ignore the scan cursor and re-walk all history.
    pub from_start: bool,
    /// Posts per history page.
    pub page_size: usize,
    /// Flood-wait handling for history fetches.
    pub history_retry: RetryPolicy,
}

impl BackfillOptions {
    pub fn from_settings(settings: &MirrorSettings, from_start: bool) -> Self {
        Self {
            from_start,
            page_size: settings.backfill.page_size,
            history_retry: RetryPolicy::history(settings.delivery.retry_padding_duration()),
        }
    }
}

/// Walk the history of `connection_id`'s source.
///
/// Stops early (with a partial report) when `shutdown_rx` flips to `true`.
pub async fn backfill<P: Platform>(
    replicator: &Replicator<P>,
    connection_id: i64,
    options: &BackfillOptions,
    shutdown_rx: &watch::Receiver<bool>,
) -> Result<BackfillReport> {
    let started = Instant::now();
    let store = replicator.store();
    let connection = store.require_connection(connection_id).await?;
    let page_size = options.page_size.max(1);
    let last_seen = if options.from_start { 0 } else { connection.last_scanned };

    info!(
        connection_id,
        source = %connection.source,
        destination = %connection.destination,
        from_start = options.from_start,
        cursor = last_seen,
        page_size,
        "Starting backfill"
    );

    let source = replicator.resolve_chat(&connection.source).await?;
    let mut report = BackfillReport::default();
    let mut offset = 0i64;

    loop {
        if *shutdown_rx.borrow() {
            warn!(connection_id, "Shutdown requested, stopping backfill early");
            break;
        }

        let fetched = retry_after_flood_wait(&options.history_retry, "history", || {
            replicator
                .platform()
                .history(source.id, offset, page_size)
                .map_err(classify)
        })
        .await;

        let mut page = match fetched {
            Ok(page) => page,
            Err(e) => {
                replicator
                    .audit(
                        connection_id,
                        AuditAction::Error,
                        &format!("{}: history page before {} failed: {}", DRIVER, offset, e),
                    )
                    .await;
                return Err(e);
            }
        };

        if page.is_empty() {
            break;
        }
        report.pages += 1;
        crate::metrics::record_backfill_page(connection_id, page.len());

        let fetched_len = page.len();
        page.sort_by_key(|p| p.id);
        let oldest = page[0].id;
        offset = oldest;

        for post in &page {
            if last_seen > 0 && post.id <= last_seen {
                continue;
            }

            if *shutdown_rx.borrow() {
                break;
            }

            if store.mapping_exists(connection_id, post.id).await? {
                if let Err(e) = store.advance_cursor(connection_id, post.id).await {
                    warn!(connection_id, post_id = post.id, error = %e, "Cursor advance failed");
                }
                continue;
            }

            match replicator.process(DRIVER, &connection, post).await {
                Ok(Outcome::Transferred { .. }) => report.transferred += 1,
                Ok(Outcome::AlreadyMapped) | Ok(Outcome::Unsupported) => {}
                Err(_) => report.failed += 1,
            }
        }

        debug!(
            connection_id,
            page = report.pages,
            fetched = fetched_len,
            oldest,
            transferred = report.transferred,
            "Backfill page done"
        );

        if fetched_len < page_size {
            break;
        }
        if last_seen > 0 && oldest <= last_seen {
            break;
        }
    }

    report.last_scanned = store.cursor(connection_id).await?;
    crate::metrics::record_backfill_complete(connection_id, report.transferred, started.elapsed());
    info!(
        connection_id,
        transferred = report.transferred,
        failed = report.failed,
        pages = report.pages,
        last_scanned = report.last_scanned,
        duration_ms = started.elapsed().as_millis() as u64,
        "Backfill complete"
    );

    Ok(report)
}
