//! Mock Platform for testing.
//!
//! Holds chats and their posts in memory and records every send and delete
//! for assertions. Resolve, history, download and send failures can be
//! scripted per call.

use channel_mirror::platform::{
    BoxFuture, ChatHandle, Content, MediaRef, Payload, Platform, PlatformError, Post,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// A recorded send() call.
#[derive(Debug, Clone, PartialEq)]
pub struct SentPost {
    pub chat_id: i64,
    pub post_id: i64,
    pub payload: Payload,
    pub reply_to: Option<i64>,
}

/// A recorded delete_posts() call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCall {
    pub chat_id: i64,
    pub post_ids: Vec<i64>,
}

/// In-memory implementation of Platform that records all calls.
///
/// # Example
/// ```rust,ignore
/// let mock = MockPlatform::new();
/// mock.add_chat("@src", SRC, None).await;
/// mock.add_chat("@dst", DST, Some("dst")).await;
/// mock.publish(text_post(SRC, 1, "hello")).await;
///
/// // Use in tests...
///
/// let sent = mock.sent().await;
/// assert_eq!(sent.len(), 1);
/// ```
pub struct MockPlatform {
    /// reference → chat
    chats: RwLock<HashMap<String, ChatHandle>>,
    /// chat id → posts, ascending by id
    posts: RwLock<HashMap<i64, Vec<Post>>>,
    /// file id → bytes returned by download()
    media: RwLock<HashMap<String, Vec<u8>>>,
    /// Outcomes of the next send() calls, in order (`None` = succeed)
    send_script: RwLock<VecDeque<Option<PlatformError>>>,
    /// Errors returned by the next history() calls, in order
    history_script: RwLock<VecDeque<PlatformError>>,
    /// Errors returned by the next download() calls, in order
    download_script: RwLock<VecDeque<PlatformError>>,
    /// Errors returned by the next resolve_chat() calls, in order
    resolve_script: RwLock<VecDeque<PlatformError>>,
    sent: RwLock<Vec<SentPost>>,
    deleted: RwLock<Vec<DeleteCall>>,
    /// Held inside every send() (widens race windows).
    send_delay: RwLock<Duration>,
    next_post_id: AtomicI64,
    send_attempts: AtomicUsize,
    history_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            chats: RwLock::new(HashMap::new()),
            posts: RwLock::new(HashMap::new()),
            media: RwLock::new(HashMap::new()),
            send_script: RwLock::new(VecDeque::new()),
            history_script: RwLock::new(VecDeque::new()),
            download_script: RwLock::new(VecDeque::new()),
            resolve_script: RwLock::new(VecDeque::new()),
            sent: RwLock::new(Vec::new()),
            deleted: RwLock::new(Vec::new()),
            send_delay: RwLock::new(Duration::ZERO),
            next_post_id: AtomicI64::new(10_000),
            send_attempts: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub async fn add_chat(&self, reference: &str, id: i64, username: Option<&str>) {
        self.chats.write().await.insert(
            reference.to_string(),
            ChatHandle {
                id,
                username: username.map(str::to_string),
                title: None,
            },
        );
    }

    /// Add a post to its chat's history.
    pub async fn publish(&self, post: Post) {
        let mut posts = self.posts.write().await;
        let chat = posts.entry(post.chat_id).or_default();
        chat.push(post);
        chat.sort_by_key(|p| p.id);
    }

    pub async fn set_media(&self, file_id: &str, bytes: Vec<u8>) {
        self.media.write().await.insert(file_id.to_string(), bytes);
    }

    /// Fail the next send() with `err`. Calls queue up.
    pub async fn fail_next_send(&self, err: PlatformError) {
        self.send_script.write().await.push_back(Some(err));
    }

    /// Let the next send() through; queues with `fail_next_send`.
    pub async fn pass_next_send(&self) {
        self.send_script.write().await.push_back(None);
    }

    /// Fail the next download() with `err`. Calls queue up.
    pub async fn fail_next_download(&self, err: PlatformError) {
        self.download_script.write().await.push_back(err);
    }

    /// Fail the next resolve_chat() with `err`. Calls queue up.
    pub async fn fail_next_resolve(&self, err: PlatformError) {
        self.resolve_script.write().await.push_back(err);
    }

    /// Fail the next history() with `err`. Calls queue up.
    pub async fn fail_next_history(&self, err: PlatformError) {
        self.history_script.write().await.push_back(err);
    }

    pub async fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.write().await = delay;
    }

    // =========================================================================
    // Assertions
    // =========================================================================

    pub async fn sent(&self) -> Vec<SentPost> {
        self.sent.read().await.clone()
    }

    pub async fn sent_to(&self, chat_id: i64) -> Vec<SentPost> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub async fn deleted(&self) -> Vec<DeleteCall> {
        self.deleted.read().await.clone()
    }

    /// send() calls including failed ones.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` posts were sent, or give up after 5s.
    pub async fn wait_for_sends(&self, count: usize) -> Vec<SentPost> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let sent = self.sent().await;
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    fn resolve_chat(&self, reference: &str) -> BoxFuture<'_, ChatHandle> {
        let reference = reference.to_string();
        Box::pin(async move {
            if let Some(err) = self.resolve_script.write().await.pop_front() {
                return Err(err);
            }
            self.chats
                .read()
                .await
                .get(&reference)
                .cloned()
                .ok_or(PlatformError::InvalidReference(reference))
        })
    }

    fn history(&self, chat_id: i64, offset_id: i64, limit: usize) -> BoxFuture<'_, Vec<Post>> {
        Box::pin(async move {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.history_script.write().await.pop_front() {
                return Err(err);
            }

            let posts = self.posts.read().await;
            let page = posts
                .get(&chat_id)
                .map(|chat| {
                    chat.iter()
                        .rev()
                        .filter(|p| offset_id == 0 || p.id < offset_id)
                        .take(limit)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(page)
        })
    }

    fn download<'a>(&'a self, media: &'a MediaRef) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.download_script.write().await.pop_front() {
                return Err(err);
            }
            Ok(self
                .media
                .read()
                .await
                .get(&media.file_id)
                .cloned()
                .unwrap_or_else(|| media.file_id.as_bytes().to_vec()))
        })
    }

    fn send<'a>(&'a self, chat_id: i64, payload: &'a Payload, reply_to: Option<i64>) -> BoxFuture<'a, i64> {
        Box::pin(async move {
            self.send_attempts.fetch_add(1, Ordering::SeqCst);

            let delay = *self.send_delay.read().await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Some(Some(err)) = self.send_script.write().await.pop_front() {
                return Err(err);
            }

            let post_id = self.next_post_id.fetch_add(1, Ordering::SeqCst);
            self.sent.write().await.push(SentPost {
                chat_id,
                post_id,
                payload: payload.clone(),
                reply_to,
            });
            Ok(post_id)
        })
    }

    fn delete_posts(&self, chat_id: i64, post_ids: Vec<i64>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.deleted.write().await.push(DeleteCall { chat_id, post_ids });
            Ok(())
        })
    }
}

// =============================================================================
// Post builders
// =============================================================================

pub fn text_post(chat_id: i64, id: i64, text: &str) -> Post {
    Post {
        id,
        chat_id,
        reply_to: None,
        content: Content::Text(text.to_string()),
    }
}

pub fn reply_post(chat_id: i64, id: i64, parent: i64, text: &str) -> Post {
    Post {
        reply_to: Some(parent),
        ..text_post(chat_id, id, text)
    }
}

pub fn photo_post(chat_id: i64, id: i64, file_id: &str, caption: Option<&str>) -> Post {
    Post {
        id,
        chat_id,
        reply_to: None,
        content: Content::Photo {
            media: MediaRef::new(file_id),
            caption: caption.map(str::to_string),
        },
    }
}

pub fn video_post(chat_id: i64, id: i64, file_id: &str, caption: Option<&str>) -> Post {
    Post {
        id,
        chat_id,
        reply_to: None,
        content: Content::Video {
            media: MediaRef::new(file_id),
            caption: caption.map(str::to_string),
        },
    }
}

pub fn unsupported_post(chat_id: i64, id: i64) -> Post {
    Post {
        id,
        chat_id,
        reply_to: None,
        content: Content::Unsupported,
    }
}
