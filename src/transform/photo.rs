// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Photo watermarking.
//!
//! Two layouts, both drawn on a transparent layer that is alpha-composited
//! over the decoded photo and re-encoded as JPEG:
//!
//! ```text
//!   Tiled                          Label
//!  ┌──────────────────────┐       ┌──────────────────────┐
//!  │@dst     @dst     @dst│       │                      │
//!  │                      │       │                      │
//!  │@dst     @dst     @dst│       │                      │
//!  │                      │       │@dst                  │
//!  └──────────────────────┘       └──────────────────────┘
//!   spacing = glyph * factor       margin from bottom-left
//!   gaussian blur on layer
//! ```
//!
//! These functions are CPU-bound; the pipeline runs them on the blocking pool.

use crate::config::WatermarkConfig;
use crate::error::{MirrorError, Result};
use ab_glyph::{FontArc, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};

fn degraded(message: impl Into<String>) -> MirrorError {
    MirrorError::TransformDegraded {
        kind: "photo",
        message: message.into(),
    }
}

/// Tile `text` across the whole photo.
pub fn tiled(bytes: &[u8], text: &str, font: Option<&FontArc>, config: &WatermarkConfig) -> Result<Vec<u8>> {
    compose(bytes, text, config, |layer| {
        let Some(font) = font else { return };
        let (width, height) = layer.dimensions();
        let spacing = config.tile_spacing() as usize;
        let color = Rgba([255, 255, 255, config.opacity]);
        let scale = PxScale::from(config.glyph_size as f32);

        for x in (0..width).step_by(spacing) {
            for y in (0..height).step_by(spacing) {
                draw_text_mut(layer, color, x as i32, y as i32, scale, font, text);
            }
        }

        if config.blur_sigma > 0.0 {
            *layer = imageproc::filter::gaussian_blur_f32(layer, config.blur_sigma);
        }
    })
}

/// Draw `text` once, anchored bottom-left with the configured margin.
pub fn labelled(bytes: &[u8], text: &str, font: Option<&FontArc>, config: &WatermarkConfig) -> Result<Vec<u8>> {
    compose(bytes, text, config, |layer| {
        let Some(font) = font else { return };
        let scale = PxScale::from(config.glyph_size as f32);
        let (_, text_height) = text_size(scale, font, text);
        let margin = config.label_margin as i32;
        let y = layer.height() as i32 - text_height as i32 - margin;

        draw_text_mut(
            layer,
            Rgba([255, 255, 255, config.opacity]),
            margin,
            y.max(0),
            scale,
            font,
            text,
        );
    })
}

/// Decode, draw on a transparent layer, composite, encode.
///
/// Blank `text` skips drawing but still re-encodes, so every photo leaves
/// in the same format.
fn compose<F>(bytes: &[u8], text: &str, config: &WatermarkConfig, draw: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut RgbaImage),
{
    let decoded = image::load_from_memory(bytes).map_err(|e| degraded(format!("decode failed: {}", e)))?;
    let mut base = decoded.to_rgba8();

    if !text.trim().is_empty() {
        let mut layer = RgbaImage::from_pixel(base.width(), base.height(), Rgba([255, 255, 255, 0]));
        draw(&mut layer);
        imageops::overlay(&mut base, &layer, 0, 0);
    }

    encode_jpeg(&base, config.jpeg_quality)
}

fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>> {
    // JPEG has no alpha channel.
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| degraded(format!("encode failed: {}", e)))?;
    Ok(out)
}
