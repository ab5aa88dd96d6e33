//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Mock Platform recording sends and deletes
//! - Post builders
//! - A harness wiring a tempdir store, the mock and a replicator

#![allow(dead_code)]

pub mod mock_platform;

pub use mock_platform::*;

use channel_mirror::{
    admin::MirrorAdmin, MirrorConfig, MirrorSettings, MirrorStore, Replicator, TransformPipeline,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;

pub const SRC: i64 = -1001;
pub const DST: i64 = -2001;

/// Settings with no real font or ffmpeg so media transforms degrade
/// deterministically, and no retry padding so rate-limit tests run fast.
pub fn test_config(dir: &TempDir) -> MirrorConfig {
    let mut config = MirrorConfig::for_testing(dir.path().join("mirror.db"));
    config.settings.watermark.font_path = "/nonexistent/font.ttf".into();
    config.settings.watermark.ffmpeg_path = "/nonexistent/ffmpeg".into();
    config.settings.backfill.page_size = 200;
    config
}

/// Store + mock platform + replicator over a tempdir database.
pub struct Harness {
    pub dir: TempDir,
    pub settings: MirrorSettings,
    pub platform: Arc<MockPlatform>,
    pub store: Arc<MirrorStore>,
    pub replicator: Arc<Replicator<MockPlatform>>,
    pub shutdown_tx: watch::Sender<bool>,
}

impl Harness {
    /// `@src` → `@dst` chats registered, no connections yet.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let platform = Arc::new(MockPlatform::new());
        platform.add_chat("@src", SRC, Some("src")).await;
        platform.add_chat("@dst", DST, Some("dst")).await;

        let store = Arc::new(MirrorStore::open(&config.store).await.unwrap());
        let pipeline = TransformPipeline::new(config.settings.watermark.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let replicator = Arc::new(
            Replicator::with_pipeline(Arc::clone(&platform), Arc::clone(&store), pipeline, &config.settings)
                .with_shutdown(shutdown_rx),
        );

        Self {
            dir,
            settings: config.settings,
            platform,
            store,
            replicator,
            shutdown_tx,
        }
    }

    pub fn admin(&self) -> MirrorAdmin<MockPlatform> {
        MirrorAdmin::new(
            Arc::clone(&self.replicator),
            self.settings.clone(),
            self.shutdown_tx.subscribe(),
        )
    }

    /// Register `@src` → `@dst`.
    pub async fn connect(&self, restricted: bool) -> i64 {
        self.admin()
            .create_connection("@src", "@dst", restricted)
            .await
            .unwrap()
            .id
    }

    /// Publish text posts `ids` in the source chat.
    pub async fn publish_texts(&self, ids: impl IntoIterator<Item = i64>) {
        for id in ids {
            self.platform
                .publish(text_post(SRC, id, &format!("post {}", id)))
                .await;
        }
    }

    /// Audit details of `action` for a connection, oldest first.
    pub async fn audit_details(&self, connection_id: i64, action: &str) -> Vec<String> {
        let mut entries = self.store.list_audit(connection_id, 1000).await.unwrap();
        entries.sort_by_key(|e| e.id);
        entries
            .into_iter()
            .filter(|e| e.action == action)
            .map(|e| e.details)
            .collect()
    }
}

/// Route engine logs to the test output (`RUST_LOG=channel_mirror=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A small decodable PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(32, 24, image::Rgb([200, 40, 40]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
