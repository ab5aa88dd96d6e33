// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirror engine coordinator.
//!
//! The main orchestrator that ties together:
//! - The mapping store via [`crate::store::MirrorStore`]
//! - The shared replication path via [`crate::replicator::Replicator`]
//! - Three drivers feeding it: [`realtime`], [`poller`] and [`backfill`]
//!
//! # Architecture
//!
//! ```text
//!   daemon ──Post──▶ event_sender() ──▶ realtime listener ─┐
//!                                                          │
//!   interval ──────────────────────────▶ restricted poller ─┼──▶ Replicator ──▶ Platform
//!                                                          │         │
//!   operator ──────────────────────────▶ backfill walker ───┘         ▼
//!                                                               MirrorStore
//! ```
//!
//! The engine never talks to the platform's update stream itself. The
//! embedding daemon owns the client and pushes observed posts in.
//!
//! # Graceful Shutdown
//!
//! [`shutdown()`](MirrorEngine::shutdown) flips the shutdown watch channel.
//! Drivers stop picking up new posts and no new send starts; a post already
//! being sent finishes or its driver is aborted at the drain deadline. A mapping is only ever written after the
//! platform returned a destination id, so an abandoned send leaves nothing
//! half-recorded. The store is checkpointed and closed last.

mod types;
pub mod backfill;
pub mod poller;
pub mod realtime;

pub use backfill::BackfillOptions;
pub use poller::PollResult;
pub use types::{BackfillReport, EngineState, PollStats};

use crate::admin::MirrorAdmin;
use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::metrics;
use crate::platform::{Platform, Post};
use crate::replicator::Replicator;
use crate::store::MirrorStore;
use crate::transform::TransformPipeline;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

/// Realtime events buffered before the daemon's sends start waiting.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// The main mirror engine.
///
/// Generic over the platform client the daemon passes in.
pub struct MirrorEngine<P: Platform> {
    config: MirrorConfig,

    platform: Arc<P>,

    /// Custom pipeline to use instead of one built from config.
    pipeline: Option<TransformPipeline>,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    /// Present from `start()` until `shutdown()`.
    replicator: Option<Arc<Replicator<P>>>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Daemon side of the realtime queue.
    event_tx: mpsc::Sender<Post>,
    /// Handed to the realtime listener on start.
    event_rx: Option<mpsc::Receiver<Post>>,

    /// Driver task handles
    handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,
}

impl<P: Platform> MirrorEngine<P> {
    /// Create a new engine.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to open the store and begin mirroring.
    pub fn new(config: MirrorConfig, platform: Arc<P>) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        Self {
            config,
            platform,
            pipeline: None,
            state_tx,
            state_rx,
            replicator: None,
            shutdown_tx,
            shutdown_rx,
            event_tx,
            event_rx: Some(event_rx),
            handles: RwLock::new(Vec::new()),
        }
    }

    /// Create an engine with a preconfigured transform pipeline.
    pub fn with_pipeline(config: MirrorConfig, platform: Arc<P>, pipeline: TransformPipeline) -> Self {
        let mut engine = Self::new(config, platform);
        engine.pipeline = Some(pipeline);
        engine
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if engine is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Sender the daemon pushes observed source posts into.
    ///
    /// Posts sent before `start()` are queued and handled once the realtime
    /// listener runs.
    pub fn event_sender(&self) -> mpsc::Sender<Post> {
        self.event_tx.clone()
    }

    /// The shared replicator, once started.
    pub fn replicator(&self) -> Option<&Arc<Replicator<P>>> {
        self.replicator.as_ref()
    }

    /// The mapping store, once started.
    pub fn store(&self) -> Option<&Arc<MirrorStore>> {
        self.replicator.as_ref().map(|r| r.store())
    }

    fn running_replicator(&self) -> Result<&Arc<Replicator<P>>> {
        match (&self.replicator, self.state()) {
            (Some(replicator), EngineState::Running) => Ok(replicator),
            (_, EngineState::ShuttingDown) | (_, EngineState::Stopped) => Err(MirrorError::Shutdown),
            (_, state) => Err(MirrorError::InvalidState {
                expected: "Running".to_string(),
                actual: state.to_string(),
            }),
        }
    }

    /// Start the engine.
    ///
    /// 1. Opens the mapping store (SQLite) and bootstraps the schema
    /// 2. Builds the shared replicator
    /// 3. Spawns the realtime listener
    /// 4. Spawns the restricted poller (if enabled)
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(MirrorError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        self.config.validate()?;

        info!(
            store = %self.config.store.sqlite_path,
            poller_enabled = self.config.settings.poller.enabled,
            "Starting mirror engine"
        );
        let _ = self.state_tx.send(EngineState::Starting);
        metrics::set_engine_state("Starting");

        let store = match MirrorStore::open(&self.config.store).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "Failed to open mirror store");
                let _ = self.state_tx.send(EngineState::Failed);
                metrics::set_engine_state("Failed");
                return Err(e);
            }
        };
        info!(path = %self.config.store.sqlite_path, "Mirror store initialized");

        let platform = Arc::clone(&self.platform);
        let replicator = Arc::new(match self.pipeline.take() {
            Some(pipeline) => Replicator::with_pipeline(platform, store, pipeline, &self.config.settings),
            None => Replicator::new(platform, store, &self.config.settings),
        }
        .with_shutdown(self.shutdown_rx.clone()));
        if !replicator.pipeline().has_font() {
            warn!(
                font_path = %self.config.settings.watermark.font_path,
                "Watermark font unavailable, photos will be sent without a watermark"
            );
        }
        self.replicator = Some(Arc::clone(&replicator));

        self.spawn_realtime_task(&replicator).await;

        if self.config.settings.poller.enabled {
            self.spawn_poller_task(&replicator).await;
        }

        let _ = self.state_tx.send(EngineState::Running);
        metrics::set_engine_state("Running");
        info!("Mirror engine running");

        Ok(())
    }

    async fn spawn_realtime_task(&mut self, replicator: &Arc<Replicator<P>>) {
        let Some(events) = self.event_rx.take() else {
            warn!("Realtime event queue already consumed, listener not started");
            return;
        };
        let replicator = Arc::clone(replicator);
        let shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            realtime::run_listener(replicator, events, shutdown_rx).await;
        });

        info!("Spawned realtime listener");
        self.handles.write().await.push(handle);
    }

    async fn spawn_poller_task(&self, replicator: &Arc<Replicator<P>>) {
        let replicator = Arc::clone(replicator);
        let shutdown_rx = self.shutdown_rx.clone();
        let config = self.config.settings.poller.clone();

        let handle = tokio::spawn(async move {
            poller::run_poller(replicator, config, shutdown_rx).await;
        });

        info!("Spawned restricted poller");
        self.handles.write().await.push(handle);
    }

    /// Walk a connection's source history and mirror what is missing.
    ///
    /// `from_start = true` ignores the stored cursor; mappings still keep
    /// anything already mirrored from going out again.
    pub async fn backfill(&self, connection_id: i64, from_start: bool) -> Result<BackfillReport> {
        let replicator = self.running_replicator()?;
        let options = BackfillOptions::from_settings(&self.config.settings, from_start);
        backfill::backfill(replicator, connection_id, &options, &self.shutdown_rx).await
    }

    /// Configuration API bound to this engine's store and shutdown signal.
    pub fn admin(&self) -> Result<MirrorAdmin<P>> {
        let replicator = self.running_replicator()?;
        Ok(MirrorAdmin::new(
            Arc::clone(replicator),
            self.config.settings.clone(),
            self.shutdown_rx.clone(),
        ))
    }

    /// Run one restricted-poller cycle now, outside the interval.
    pub async fn poll_now(&self) -> Result<PollStats> {
        let replicator = self.running_replicator()?;
        Ok(poller::poll_cycle(replicator, self.config.settings.poller.window).await)
    }

    /// Shutdown the engine gracefully.
    ///
    /// Shutdown sequence:
    /// 1. Signal all drivers to stop
    /// 2. Wait for them to finish their current post, up to one shared
    ///    deadline; abort whatever is still running
    /// 3. Checkpoint and close the store
    pub async fn shutdown(&mut self) {
        info!("Shutting down mirror engine");
        let _ = self.state_tx.send(EngineState::ShuttingDown);
        metrics::set_engine_state("ShuttingDown");

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for drivers to drain");
        }

        // One deadline for all drivers; stragglers are aborted before the
        // store closes under them.
        let deadline = tokio::time::Instant::now() + self.config.settings.shutdown.drain_timeout_duration();
        for (i, mut handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {
                    debug!(task = i + 1, "Driver completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(task = i + 1, error = %e, "Driver panicked during shutdown");
                }
                Err(_) => {
                    warn!(task = i + 1, "Driver timed out during shutdown, aborting (in-flight post abandoned)");
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        if let Some(replicator) = self.replicator.take() {
            let in_flight = replicator.in_flight();
            if in_flight > 0 {
                warn!(in_flight, "Closing store with replications still in flight");
            }
            replicator.store().close().await;
        }

        let _ = self.state_tx.send(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
        info!("Mirror engine stopped");
    }
}
