// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delivery executor: send a payload, link replies, classify the outcome.
//!
//! # Reply linkage
//!
//! A source post replying to another source post is sent as a reply to the
//! destination copy of the parent, looked up in the mapping store. If the
//! parent was never replicated the post goes out unlinked. Delivery never
//! waits for a parent to show up.
//!
//! # Outcome classification
//!
//! | Platform signal | Result |
//! |-----------------|--------|
//! | new post id | `Ok(id)` |
//! | flood wait | sleep wait + padding, retry once |
//! | flood wait on the retry | `PermanentDelivery` |
//! | bad reference / forbidden / too large | `PermanentDelivery` |
//! | transport failure | `Platform` |

use crate::config::DeliveryConfig;
use crate::error::{MirrorError, Result};
use crate::platform::{Payload, Platform, PlatformError};
use crate::resilience::{retry_then_give_up, RateLimiter, RetryPolicy};
use crate::store::MirrorStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Map a platform failure onto the engine's error taxonomy.
pub fn classify(err: PlatformError) -> MirrorError {
    match err {
        PlatformError::RateLimited(wait) => MirrorError::RateLimited { wait },
        PlatformError::InvalidReference(_) | PlatformError::PermissionDenied(_) | PlatformError::TooLarge(_) => {
            MirrorError::PermanentDelivery {
                reason: err.to_string(),
            }
        }
        PlatformError::Transport(msg) => MirrorError::Platform(msg),
    }
}

impl From<PlatformError> for MirrorError {
    fn from(err: PlatformError) -> Self {
        classify(err)
    }
}

/// Sends transformed payloads to destination chats.
pub struct DeliveryExecutor<P: Platform> {
    platform: Arc<P>,
    store: Arc<MirrorStore>,
    retry: RetryPolicy,
    limiter: Option<RateLimiter>,
}

impl<P: Platform> DeliveryExecutor<P> {
    pub fn new(platform: Arc<P>, store: Arc<MirrorStore>, config: &DeliveryConfig) -> Self {
        Self {
            platform,
            store,
            retry: RetryPolicy::delivery(config.retry_padding_duration()),
            limiter: config.rate_limit_config().map(RateLimiter::new),
        }
    }

    /// Destination post id for the parent of a reply, if the parent was mirrored.
    pub async fn resolve_reply(&self, connection_id: i64, reply_to_source: Option<i64>) -> Result<Option<i64>> {
        let Some(parent) = reply_to_source else {
            return Ok(None);
        };
        let mapped = self.store.get_mapping(connection_id, parent).await?;
        if mapped.is_none() {
            debug!(connection_id, parent, "Reply parent not mirrored, sending unlinked");
        }
        Ok(mapped)
    }

    /// Deliver `payload` for a connection, linking it under the mirrored parent.
    ///
    /// Returns the new destination post id.
    pub async fn deliver(
        &self,
        connection_id: i64,
        dest_chat: i64,
        payload: &Payload,
        reply_to_source: Option<i64>,
    ) -> Result<i64> {
        let reply_to = self.resolve_reply(connection_id, reply_to_source).await?;
        self.send(dest_chat, payload, reply_to).await
    }

    /// Send with the one-retry flood-wait discipline.
    ///
    /// `reply_to` is already a destination post id.
    pub async fn send(&self, dest_chat: i64, payload: &Payload, reply_to: Option<i64>) -> Result<i64> {
        retry_then_give_up(&self.retry, "send", || self.send_once(dest_chat, payload, reply_to)).await
    }

    async fn send_once(&self, dest_chat: i64, payload: &Payload, reply_to: Option<i64>) -> Result<i64> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let started = Instant::now();
        let id = self
            .platform
            .send(dest_chat, payload, reply_to)
            .await
            .map_err(classify)?;
        crate::metrics::record_delivery_latency(payload.kind().as_str(), started.elapsed());
        Ok(id)
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }
}
