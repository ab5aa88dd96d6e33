// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the mirroring engine.
//!
//! Configuration is passed to [`MirrorEngine::new()`](crate::MirrorEngine::new)
//! and can be constructed programmatically or deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use channel_mirror::config::MirrorConfig;
//!
//! let mut config = MirrorConfig::default();
//! config.settings.poller.interval = "30s".into();
//! assert_eq!(config.settings.poller.interval_duration().as_secs(), 30);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! MirrorConfig
//! ├── settings: MirrorSettings
//! │   ├── poller: PollerConfig       # restricted-channel polling
//! │   ├── backfill: BackfillConfig   # history walker paging
//! │   ├── delivery: DeliveryConfig   # retry padding, send pacing
//! │   ├── watermark: WatermarkConfig # image/video watermark parameters
//! │   └── shutdown: ShutdownConfig   # drain timeout
//! └── store: StoreConfig             # SQLite persistence
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "settings": {
//!     "poller": { "enabled": true, "interval": "60s", "window": 15 },
//!     "backfill": { "page_size": 200 },
//!     "watermark": { "font_path": "/usr/share/fonts/Impact.ttf" }
//!   },
//!   "store": { "sqlite_path": "/var/lib/mirror/transfer_bot.db" }
//! }
//! ```

use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `MirrorEngine::new()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Tunables for the drivers, delivery and transforms.
    #[serde(default)]
    pub settings: MirrorSettings,

    /// Persistence settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl MirrorConfig {
    /// Create a config for tests backed by the given SQLite file.
    ///
    /// The poller is disabled and retry padding removed so tests run fast.
    pub fn for_testing(sqlite_path: impl AsRef<Path>) -> Self {
        let mut config = Self {
            settings: MirrorSettings::default(),
            store: StoreConfig {
                sqlite_path: sqlite_path.as_ref().to_string_lossy().to_string(),
                wal_mode: false,
            },
        };
        config.settings.poller.enabled = false;
        config.settings.delivery.retry_padding = "0s".to_string();
        config.settings.shutdown.drain_timeout = "2s".to_string();
        config
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MirrorError::Config(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| MirrorError::Config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a driver spin or stall.
    pub fn validate(&self) -> Result<()> {
        if self.settings.poller.window == 0 {
            return Err(MirrorError::Config("poller.window must be > 0".into()));
        }
        if self.settings.backfill.page_size == 0 {
            return Err(MirrorError::Config("backfill.page_size must be > 0".into()));
        }
        if self.settings.watermark.glyph_size == 0 {
            return Err(MirrorError::Config("watermark.glyph_size must be > 0".into()));
        }
        if self.settings.watermark.jpeg_quality == 0 || self.settings.watermark.jpeg_quality > 100 {
            return Err(MirrorError::Config(
                "watermark.jpeg_quality must be within 1..=100".into(),
            ));
        }
        if self.store.sqlite_path.is_empty() {
            return Err(MirrorError::Config("store.sqlite_path is empty".into()));
        }
        Ok(())
    }
}

/// Driver, delivery and transform settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorSettings {
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub watermark: WatermarkConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn parse_duration_or(raw: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(raw).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PollerConfig: restricted-channel polling
// ═══════════════════════════════════════════════════════════════════════════════

/// Restricted poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Whether the restricted poller runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sleep between poll cycles as a duration string (e.g. "60s").
    #[serde(default = "default_poll_interval")]
    pub interval: String,

    /// Number of most recent posts inspected per connection per cycle.
    #[serde(default = "default_poll_window")]
    pub window: usize,
}

fn default_poll_interval() -> String {
    "60s".to_string()
}

fn default_poll_window() -> usize {
    15
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_poll_interval(),
            window: default_poll_window(),
        }
    }
}

impl PollerConfig {
    /// Parse the interval string to a Duration.
    pub fn interval_duration(&self) -> Duration {
        parse_duration_or(&self.interval, Duration::from_secs(60))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BackfillConfig: history walker
// ═══════════════════════════════════════════════════════════════════════════════

/// Backfill walker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Posts requested per history page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    200
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DeliveryConfig: retry padding and outbound pacing
// ═══════════════════════════════════════════════════════════════════════════════

/// Delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Extra time slept on top of a signalled flood wait before the retry.
    #[serde(default = "default_retry_padding")]
    pub retry_padding: String,

    /// Pace outbound sends with a token bucket.
    #[serde(default = "default_false")]
    pub rate_limit_enabled: bool,

    /// Sustained sends per second.
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    /// Burst allowance above the sustained rate.
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_retry_padding() -> String {
    "1s".to_string()
}

fn default_rate_limit_per_sec() -> u32 {
    20
}

fn default_rate_limit_burst() -> u32 {
    5
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_padding: default_retry_padding(),
            rate_limit_enabled: false,
            rate_limit_per_sec: default_rate_limit_per_sec(),
            rate_limit_burst: default_rate_limit_burst(),
        }
    }
}

impl DeliveryConfig {
    /// Parse the retry padding string to a Duration.
    pub fn retry_padding_duration(&self) -> Duration {
        parse_duration_or(&self.retry_padding, Duration::from_secs(1))
    }

    /// Create rate limit configuration from delivery settings.
    ///
    /// Returns `None` if send pacing is disabled.
    pub fn rate_limit_config(&self) -> Option<crate::resilience::RateLimitConfig> {
        if self.rate_limit_enabled {
            Some(crate::resilience::RateLimitConfig {
                burst_size: self.rate_limit_burst,
                refill_rate: self.rate_limit_per_sec,
            })
        } else {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WatermarkConfig: media transform parameters
// ═══════════════════════════════════════════════════════════════════════════════

/// Watermark parameters shared by the image and video transforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// TrueType font used for both image and video watermarks.
    #[serde(default = "default_font_path")]
    pub font_path: String,

    /// Glyph height in pixels.
    #[serde(default = "default_glyph_size")]
    pub glyph_size: u32,

    /// Tile spacing is `glyph_size * tile_factor` on both axes.
    #[serde(default = "default_tile_factor")]
    pub tile_factor: u32,

    /// Alpha of the watermark text (0-255).
    #[serde(default = "default_opacity")]
    pub opacity: u8,

    /// Gaussian blur sigma applied to the tiled layer.
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    /// Margin of the single bottom-left label.
    #[serde(default = "default_label_margin")]
    pub label_margin: u32,

    /// JPEG quality for re-encoded photos.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Path or name of the ffmpeg executable.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Video/animation payloads smaller than this skip the transcoder.
    #[serde(default = "default_min_media_bytes")]
    pub min_media_bytes: usize,
}

fn default_font_path() -> String {
    "Impact.ttf".to_string()
}

fn default_glyph_size() -> u32 {
    70
}

fn default_tile_factor() -> u32 {
    4
}

fn default_opacity() -> u8 {
    128
}

fn default_blur_sigma() -> f32 {
    1.5
}

fn default_label_margin() -> u32 {
    20
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_min_media_bytes() -> usize {
    100
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            font_path: default_font_path(),
            glyph_size: default_glyph_size(),
            tile_factor: default_tile_factor(),
            opacity: default_opacity(),
            blur_sigma: default_blur_sigma(),
            label_margin: default_label_margin(),
            jpeg_quality: default_jpeg_quality(),
            ffmpeg_path: default_ffmpeg_path(),
            min_media_bytes: default_min_media_bytes(),
        }
    }
}

impl WatermarkConfig {
    /// Distance between watermark tiles in pixels.
    pub fn tile_spacing(&self) -> u32 {
        self.glyph_size.saturating_mul(self.tile_factor).max(1)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ShutdownConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Shutdown behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight deliveries before abandoning them.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,
}

fn default_drain_timeout() -> String {
    "10s".to_string()
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl ShutdownConfig {
    /// Parse the drain timeout string to a Duration.
    pub fn drain_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.drain_timeout, Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: SQLite persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// Store persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "transfer_bot.db".to_string(),
            wal_mode: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::default();
        assert!(config.settings.poller.enabled);
        assert_eq!(config.settings.poller.window, 15);
        assert_eq!(config.settings.poller.interval_duration(), Duration::from_secs(60));
        assert_eq!(config.settings.backfill.page_size, 200);
        assert_eq!(config.settings.watermark.glyph_size, 70);
        assert_eq!(config.settings.watermark.tile_spacing(), 280);
        assert_eq!(config.store.sqlite_path, "transfer_bot.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_for_testing_disables_poller() {
        let config = MirrorConfig::for_testing("/tmp/x.db");
        assert!(!config.settings.poller.enabled);
        assert_eq!(config.settings.delivery.retry_padding_duration(), Duration::ZERO);
        assert!(!config.store.wal_mode);
    }

    #[test]
    fn test_invalid_duration_falls_back() {
        let poller = PollerConfig {
            interval: "soon".into(),
            ..Default::default()
        };
        assert_eq!(poller.interval_duration(), Duration::from_secs(60));

        let shutdown = ShutdownConfig {
            drain_timeout: "later".into(),
        };
        assert_eq!(shutdown.drain_timeout_duration(), Duration::from_secs(10));
    }

    #[test]
    fn test_rate_limit_config_disabled_by_default() {
        assert!(DeliveryConfig::default().rate_limit_config().is_none());

        let delivery = DeliveryConfig {
            rate_limit_enabled: true,
            rate_limit_per_sec: 3,
            rate_limit_burst: 1,
            ..Default::default()
        };
        let rl = delivery.rate_limit_config().unwrap();
        assert_eq!(rl.refill_rate, 3);
        assert_eq!(rl.burst_size, 1);
    }

    #[test]
    fn test_from_json_partial() {
        let raw = r#"{
            "settings": { "poller": { "window": 5 }, "backfill": { "page_size": 50 } },
            "store": { "sqlite_path": "/tmp/mirror.db" }
        }"#;
        let config = MirrorConfig::from_json_str(raw).unwrap();
        assert_eq!(config.settings.poller.window, 5);
        assert_eq!(config.settings.poller.interval, "60s");
        assert_eq!(config.settings.backfill.page_size, 50);
        assert!(config.store.wal_mode);
    }

    #[test]
    fn test_from_json_rejects_zero_window() {
        let raw = r#"{ "settings": { "poller": { "window": 0 } } }"#;
        let err = MirrorConfig::from_json_str(raw).unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(MirrorConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_validate_jpeg_quality() {
        let mut config = MirrorConfig::default();
        config.settings.watermark.jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.settings.watermark.jpeg_quality = 100;
        assert!(config.validate().is_ok());
    }
}
