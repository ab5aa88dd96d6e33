// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Messaging-platform capability interface.
//!
//! The engine never speaks the messaging protocol itself. The embedding
//! daemon hands it an implementation of [`Platform`] that can resolve chats,
//! page through history, download media and send posts. Failures are
//! reported as [`PlatformError`] so the delivery layer can tell a flood wait
//! apart from a permission problem.
//!
//! # Example
//!
//! ```rust,no_run
//! use channel_mirror::platform::{BoxFuture, ChatHandle, MediaRef, Payload, Platform, Post};
//!
//! struct Offline;
//!
//! impl Platform for Offline {
//!     fn resolve_chat(&self, reference: &str) -> BoxFuture<'_, ChatHandle> {
//!         let reference = reference.to_string();
//!         Box::pin(async move { Ok(ChatHandle { id: -100, username: Some(reference), title: None }) })
//!     }
//!     fn history(&self, _chat_id: i64, _offset_id: i64, _limit: usize) -> BoxFuture<'_, Vec<Post>> {
//!         Box::pin(async { Ok(Vec::new()) })
//!     }
//!     fn download<'a>(&'a self, _media: &'a MediaRef) -> BoxFuture<'a, Vec<u8>> {
//!         Box::pin(async { Ok(Vec::new()) })
//!     }
//!     fn send<'a>(&'a self, _chat_id: i64, _payload: &'a Payload, _reply_to: Option<i64>) -> BoxFuture<'a, i64> {
//!         Box::pin(async { Ok(1) })
//!     }
//!     fn delete_posts(&self, _chat_id: i64, _post_ids: Vec<i64>) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Result type for platform operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Type alias for boxed async futures (keeps trait signatures readable).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = PlatformResult<T>> + Send + 'a>>;

/// Failures signalled by the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// Flood wait: the call may be repeated after `0`.
    #[error("rate limited, wait {0:?}")]
    RateLimited(Duration),

    /// The chat reference could not be resolved or is malformed.
    #[error("invalid chat reference: {0}")]
    InvalidReference(String),

    /// The account may not read from or write to the chat.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The payload exceeds platform limits.
    #[error("payload too large: {0}")]
    TooLarge(String),

    /// Anything else (network, protocol, unexpected response).
    #[error("transport error: {0}")]
    Transport(String),
}

/// A resolved chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatHandle {
    /// Numeric chat id (channels are `-100...`).
    pub id: i64,
    /// Public username without the leading `@`, if the chat has one.
    pub username: Option<String>,
    /// Display title.
    pub title: Option<String>,
}

impl ChatHandle {
    /// The public `@handle`, if any.
    pub fn public_handle(&self) -> Option<String> {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|u| format!("@{}", u.trim_start_matches('@')))
    }
}

/// Opaque reference to downloadable media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
}

impl MediaRef {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
        }
    }
}

/// Kind tag of a post's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Photo,
    Video,
    Animation,
    Sticker,
    Voice,
    Unsupported,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Photo => "photo",
            ContentKind::Video => "video",
            ContentKind::Animation => "animation",
            ContentKind::Sticker => "sticker",
            ContentKind::Voice => "voice",
            ContentKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a source post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Photo { media: MediaRef, caption: Option<String> },
    Video { media: MediaRef, caption: Option<String> },
    Animation { media: MediaRef, caption: Option<String> },
    Sticker { file_id: String },
    Voice { media: MediaRef, caption: Option<String> },
    /// Service messages, polls, documents and anything else we do not mirror.
    Unsupported,
}

impl Content {
    pub fn kind(&self) -> ContentKind {
        match self {
            Content::Text(_) => ContentKind::Text,
            Content::Photo { .. } => ContentKind::Photo,
            Content::Video { .. } => ContentKind::Video,
            Content::Animation { .. } => ContentKind::Animation,
            Content::Sticker { .. } => ContentKind::Sticker,
            Content::Voice { .. } => ContentKind::Voice,
            Content::Unsupported => ContentKind::Unsupported,
        }
    }

    /// Media that must be downloaded before the post can be transformed.
    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            Content::Photo { media, .. }
            | Content::Video { media, .. }
            | Content::Animation { media, .. }
            | Content::Voice { media, .. } => Some(media),
            _ => None,
        }
    }
}

/// A post observed in a source channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Post id, monotonically increasing within a chat.
    pub id: i64,
    /// Chat the post lives in.
    pub chat_id: i64,
    /// Source post id this post replies to.
    pub reply_to: Option<i64>,
    pub content: Content,
}

/// Outbound payload produced by the transform pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text { text: String },
    Photo { bytes: Vec<u8>, caption: Option<String> },
    Video { bytes: Vec<u8>, caption: Option<String> },
    Animation { bytes: Vec<u8>, caption: Option<String> },
    Sticker { file_id: String },
    Voice { bytes: Vec<u8>, caption: Option<String> },
}

impl Payload {
    pub fn kind(&self) -> ContentKind {
        match self {
            Payload::Text { .. } => ContentKind::Text,
            Payload::Photo { .. } => ContentKind::Photo,
            Payload::Video { .. } => ContentKind::Video,
            Payload::Animation { .. } => ContentKind::Animation,
            Payload::Sticker { .. } => ContentKind::Sticker,
            Payload::Voice { .. } => ContentKind::Voice,
        }
    }

    pub fn caption(&self) -> Option<&str> {
        match self {
            Payload::Text { text } => Some(text),
            Payload::Photo { caption, .. }
            | Payload::Video { caption, .. }
            | Payload::Animation { caption, .. }
            | Payload::Voice { caption, .. } => caption.as_deref(),
            Payload::Sticker { .. } => None,
        }
    }

    pub fn media_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Photo { bytes, .. }
            | Payload::Video { bytes, .. }
            | Payload::Animation { bytes, .. }
            | Payload::Voice { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

/// What the engine needs from the messaging platform.
///
/// Implementations must be cheap to share; the engine holds one behind an
/// `Arc` and calls it from every driver.
pub trait Platform: Send + Sync + 'static {
    /// Resolve `@username`, `-100...` or a bare numeric id to a chat.
    fn resolve_chat(&self, reference: &str) -> BoxFuture<'_, ChatHandle>;

    /// Fetch up to `limit` posts older than `offset_id`, newest first.
    ///
    /// `offset_id == 0` starts from the newest post in the chat.
    fn history(&self, chat_id: i64, offset_id: i64, limit: usize) -> BoxFuture<'_, Vec<Post>>;

    /// Download the media behind `media`.
    fn download<'a>(&'a self, media: &'a MediaRef) -> BoxFuture<'a, Vec<u8>>;

    /// Send a payload, optionally as a reply to a destination post.
    ///
    /// Returns the new destination post id.
    fn send<'a>(
        &'a self,
        chat_id: i64,
        payload: &'a Payload,
        reply_to: Option<i64>,
    ) -> BoxFuture<'a, i64>;

    /// Delete posts from a chat (used by the connection test only).
    fn delete_posts(&self, chat_id: i64, post_ids: Vec<i64>) -> BoxFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_handle() {
        let chat = ChatHandle {
            id: -1001,
            username: Some("mirror_dest".into()),
            title: None,
        };
        assert_eq!(chat.public_handle().as_deref(), Some("@mirror_dest"));

        let private = ChatHandle {
            id: -1002,
            username: None,
            title: Some("Private".into()),
        };
        assert_eq!(private.public_handle(), None);

        let empty = ChatHandle {
            id: -1003,
            username: Some(String::new()),
            title: None,
        };
        assert_eq!(empty.public_handle(), None);
    }

    #[test]
    fn test_content_media() {
        let photo = Content::Photo {
            media: MediaRef::new("f1"),
            caption: None,
        };
        assert_eq!(photo.kind(), ContentKind::Photo);
        assert_eq!(photo.media().unwrap().file_id, "f1");

        let sticker = Content::Sticker {
            file_id: "s1".into(),
        };
        assert!(sticker.media().is_none());
        assert_eq!(Content::Text("hi".into()).kind().to_string(), "text");
    }

    #[test]
    fn test_payload_accessors() {
        let voice = Payload::Voice {
            bytes: vec![1, 2, 3],
            caption: Some("listen".into()),
        };
        assert_eq!(voice.kind(), ContentKind::Voice);
        assert_eq!(voice.caption(), Some("listen"));
        assert_eq!(voice.media_bytes(), Some(&[1u8, 2, 3][..]));

        let sticker = Payload::Sticker {
            file_id: "s".into(),
        };
        assert_eq!(sticker.caption(), None);
        assert!(sticker.media_bytes().is_none());
    }
}
