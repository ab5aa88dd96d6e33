// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transform pipeline: source content + per-connection rules → outbound payload.
//!
//! | Kind | Text | Media |
//! |------|------|-------|
//! | text | substitution | n/a |
//! | photo | caption substitution | tiled watermark, JPEG |
//! | video | caption substitution | ffmpeg moving watermark, H.264 |
//! | animation | caption substitution | ffmpeg moving watermark, GIF, no audio |
//! | voice | caption substitution | passthrough |
//! | sticker | n/a | passthrough |
//!
//! The pipeline always produces a payload for supported content. When a
//! media step fails, the original bytes are forwarded and the failure is
//! returned alongside as [`Transformed::degraded`].

pub mod photo;
pub mod text;
pub mod video;

use crate::config::WatermarkConfig;
use crate::error::MirrorError;
use crate::platform::{Content, Payload};
use crate::store::SubstitutionRule;
use ab_glyph::FontArc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use video::Transcoder;

/// Pipeline output.
#[derive(Debug)]
pub struct Transformed {
    /// Always deliverable.
    pub payload: Payload,
    /// Set when a media step fell back to the original bytes.
    pub degraded: Option<MirrorError>,
}

impl Transformed {
    fn clean(payload: Payload) -> Self {
        Self {
            payload,
            degraded: None,
        }
    }
}

/// Applies substitutions and watermarks.
pub struct TransformPipeline {
    config: WatermarkConfig,
    font: Option<FontArc>,
    transcoder: Transcoder,
}

impl TransformPipeline {
    /// Build a pipeline, loading the watermark font from `config.font_path`.
    ///
    /// A missing or unreadable font is not fatal: photos are still
    /// re-encoded and each one reports a degraded transform.
    pub fn new(config: WatermarkConfig) -> Self {
        let font = match std::fs::read(&config.font_path) {
            Ok(bytes) => match FontArc::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(e) => {
                    warn!(path = %config.font_path, error = %e, "Watermark font is not a valid font");
                    None
                }
            },
            Err(e) => {
                warn!(path = %config.font_path, error = %e, "Watermark font not readable");
                None
            }
        };
        Self::with_font(config, font)
    }

    /// Build a pipeline with an already-loaded font.
    pub fn with_font(config: WatermarkConfig, font: Option<FontArc>) -> Self {
        let transcoder = Transcoder::new(&config);
        info!(font_loaded = font.is_some(), ffmpeg = %config.ffmpeg_path, "Transform pipeline ready");
        Self {
            config,
            font,
            transcoder,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Transform one post.
    ///
    /// `media` holds the downloaded bytes for media kinds and is ignored
    /// otherwise. Returns `None` for content that is never mirrored.
    pub async fn transform(
        &self,
        content: &Content,
        media: Vec<u8>,
        rules: &[SubstitutionRule],
        watermark: &str,
    ) -> Option<Transformed> {
        let started = Instant::now();
        let kind = content.kind();

        let out = match content {
            Content::Text(body) => Transformed::clean(Payload::Text {
                text: text::substitute(body, rules),
            }),
            Content::Photo { caption, .. } => {
                let caption = text::substitute_caption(caption.as_deref(), rules);
                self.photo(media, watermark, caption, false).await
            }
            Content::Video { caption, .. } => {
                let caption = text::substitute_caption(caption.as_deref(), rules);
                let (bytes, degraded) = self.moving(media, watermark, false).await;
                Transformed {
                    payload: Payload::Video { bytes, caption },
                    degraded,
                }
            }
            Content::Animation { caption, .. } => {
                let caption = text::substitute_caption(caption.as_deref(), rules);
                let (bytes, degraded) = self.moving(media, watermark, true).await;
                Transformed {
                    payload: Payload::Animation { bytes, caption },
                    degraded,
                }
            }
            Content::Voice { caption, .. } => Transformed::clean(Payload::Voice {
                bytes: media,
                caption: text::substitute_caption(caption.as_deref(), rules),
            }),
            Content::Sticker { file_id } => Transformed::clean(Payload::Sticker {
                file_id: file_id.clone(),
            }),
            Content::Unsupported => return None,
        };

        if let Some(err) = &out.degraded {
            warn!(kind = %kind, error = %err, "Transform degraded, forwarding original media");
            crate::metrics::record_transform_degraded(kind.as_str());
        }
        crate::metrics::record_transform_latency(kind.as_str(), started.elapsed());
        Some(out)
    }

    /// One-off photo watermark: single bottom-left label.
    pub async fn label_photo(&self, bytes: Vec<u8>, label: &str, caption: Option<String>) -> Transformed {
        self.photo(bytes, label, caption, true).await
    }

    async fn photo(&self, bytes: Vec<u8>, watermark: &str, caption: Option<String>, single_label: bool) -> Transformed {
        let original = Arc::new(bytes);
        let shared = Arc::clone(&original);
        let font = self.font.clone();
        let config = self.config.clone();
        let text = watermark.to_string();

        let result = tokio::task::spawn_blocking(move || {
            if single_label {
                photo::labelled(&shared, &text, font.as_ref(), &config)
            } else {
                photo::tiled(&shared, &text, font.as_ref(), &config)
            }
        })
        .await
        .unwrap_or_else(|e| {
            Err(MirrorError::TransformDegraded {
                kind: "photo",
                message: format!("watermark task failed: {}", e),
            })
        });

        let wants_text = !watermark.trim().is_empty();
        match result {
            Ok(bytes) if wants_text && self.font.is_none() => Transformed {
                payload: Payload::Photo { bytes, caption },
                degraded: Some(MirrorError::TransformDegraded {
                    kind: "photo",
                    message: format!("font {} unavailable, watermark not drawn", self.config.font_path),
                }),
            },
            Ok(bytes) => Transformed::clean(Payload::Photo { bytes, caption }),
            Err(err) => Transformed {
                payload: Payload::Photo {
                    bytes: Arc::try_unwrap(original).unwrap_or_else(|arc| (*arc).clone()),
                    caption,
                },
                degraded: Some(err),
            },
        }
    }

    async fn moving(&self, bytes: Vec<u8>, watermark: &str, animation: bool) -> (Vec<u8>, Option<MirrorError>) {
        if watermark.trim().is_empty() {
            return (bytes, None);
        }
        match self.transcoder.watermark(&bytes, watermark, animation).await {
            Ok(out) => (out, None),
            Err(err) => (bytes, Some(err)),
        }
    }
}
