// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Moving watermark for videos and animations via ffmpeg.
//!
//! The media makes a temporary-file round trip: bytes are written into a
//! scratch directory, ffmpeg overlays a `drawtext` that sweeps across the
//! frame once every six seconds, and the output file is read back. The
//! directory is removed when the [`TempDir`](tempfile::TempDir) guard drops,
//! whether ffmpeg succeeded or not.
//!
//! The watermark itself is passed through `textfile=` with expansion
//! disabled, so quotes, colons and `%` in operator-supplied text never reach
//! the filtergraph parser.

use crate::config::WatermarkConfig;
use crate::error::{MirrorError, Result};
use crate::resilience::Bulkhead;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs the external transcoder with bounded concurrency.
pub struct Transcoder {
    ffmpeg_path: String,
    font_path: String,
    glyph_size: u32,
    min_media_bytes: usize,
    bulkhead: Bulkhead,
}

impl Transcoder {
    pub fn new(config: &WatermarkConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            font_path: config.font_path.clone(),
            glyph_size: config.glyph_size,
            min_media_bytes: config.min_media_bytes,
            bulkhead: Bulkhead::for_transcodes(),
        }
    }

    /// Overlay `text` on a video (`animation == false`) or animation.
    ///
    /// Any failure is reported as [`MirrorError::TransformDegraded`]; the
    /// caller forwards the original bytes in that case.
    pub async fn watermark(&self, bytes: &[u8], text: &str, animation: bool) -> Result<Vec<u8>> {
        let kind = if animation { "animation" } else { "video" };
        let degraded = |message: String| MirrorError::TransformDegraded { kind, message };

        if bytes.len() < self.min_media_bytes {
            return Err(degraded(format!(
                "media too small to transcode ({} bytes)",
                bytes.len()
            )));
        }

        let _permit = self
            .bulkhead
            .acquire()
            .await
            .map_err(|e| degraded(e.to_string()))?;

        let scratch = tempfile::tempdir().map_err(|e| degraded(format!("scratch dir: {}", e)))?;
        let suffix = if animation { "gif" } else { "mp4" };
        let input = scratch.path().join(format!("input.{}", suffix));
        let output = scratch.path().join(format!("output.{}", suffix));
        let text_file = scratch.path().join("watermark.txt");

        tokio::fs::write(&input, bytes)
            .await
            .map_err(|e| degraded(format!("write input: {}", e)))?;
        tokio::fs::write(&text_file, text)
            .await
            .map_err(|e| degraded(format!("write watermark: {}", e)))?;

        let filter = drawtext_filter(&self.font_path, &text_file, self.glyph_size);
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-y")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(&input)
            .arg("-vf")
            .arg(&filter);
        if animation {
            cmd.args(["-c:v", "gif", "-an"]);
        } else {
            cmd.args(["-c:v", "libx264", "-c:a", "copy"]);
        }
        cmd.arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(kind, input_bytes = bytes.len(), "Running ffmpeg");
        let result = cmd
            .output()
            .await
            .map_err(|e| degraded(format!("spawn {}: {}", self.ffmpeg_path, e)))?;

        if !result.status.success() {
            return Err(degraded(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr_tail(&result.stderr)
            )));
        }

        let out = tokio::fs::read(&output)
            .await
            .map_err(|e| degraded(format!("read output: {}", e)))?;
        if out.is_empty() {
            return Err(degraded("ffmpeg produced an empty file".to_string()));
        }
        Ok(out)
    }
}

/// Build the `drawtext` filter: white at 40% on a 30% black box, sweeping
/// diagonally in six steps per six seconds.
pub fn drawtext_filter(font_path: &str, text_file: &Path, glyph_size: u32) -> String {
    format!(
        "drawtext=fontfile={}:textfile={}:expansion=none:\
         fontcolor=white@0.4:fontsize={}:box=1:boxcolor=black@0.3:\
         x=mod((w/6)*mod(t\\,6)\\,w):y=mod((h/6)*mod(t\\,6)\\,h)",
        escape_filter_value(font_path),
        escape_filter_value(&text_file.to_string_lossy()),
        glyph_size
    )
}

/// Backslash-escape characters that delimit filter options.
pub fn escape_filter_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | ':' | '\'' | ',' | ';' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(299)
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[start..].to_string()
}
