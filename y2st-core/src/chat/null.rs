//! Test doubles for `ChatClient`.

use std::sync::{atomic::{AtomicU64, Ordering}, Arc};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChatClient, ChatIdentity, MessageContent};
use crate::error::ChatError;

/// Always succeeds, minting sequential message ids. Useful where a test only
/// needs *a* `ChatClient`, not one it can assert against.
pub struct NullChatClient {
    seq: AtomicU64,
}

impl NullChatClient {
    pub fn new() -> Self {
        Self { seq: AtomicU64::new(0) }
    }

    fn next_id(&self) -> String {
        format!("null-{}", self.seq.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for NullChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for NullChatClient {
    async fn open_thread(&self, channel: &str, _header: MessageContent) -> Result<(String, String), ChatError> {
        let id = self.next_id();
        Ok((format!("{channel}:{id}"), id))
    }

    async fn post_in_thread(&self, _thread_id: &str, _content: MessageContent) -> Result<String, ChatError> {
        Ok(self.next_id())
    }

    async fn edit(&self, _msg_id: &str, _content: MessageContent) -> Result<(), ChatError> {
        Ok(())
    }

    async fn resolve_channel(&self, name: &str) -> Result<String, ChatError> {
        Ok(name.to_string())
    }

    fn whoami(&self) -> ChatIdentity {
        ChatIdentity {
            team_id: "_default_".to_string(),
            bot_user_id: "U_NULL".to_string(),
        }
    }
}

/// Records every `post_in_thread` call in arrival order, and can fail the
/// next N posts or delay each call, for ordering/backoff tests.
pub struct RecordingChatClient {
    pub posted: Arc<Mutex<Vec<(String, MessageContent)>>>,
    pub edited: Arc<Mutex<Vec<(String, MessageContent)>>>,
    delay: Duration,
    fail_next: Arc<Mutex<u32>>,
    seq: AtomicU64,
}

impl RecordingChatClient {
    pub fn new() -> Self {
        Self {
            posted: Arc::new(Mutex::new(Vec::new())),
            edited: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            fail_next: Arc::new(Mutex::new(0)),
            seq: AtomicU64::new(0),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// The next `n` calls to `post_in_thread` return a transient error.
    pub fn fail_next_n(&self, n: u32) {
        *self.fail_next.lock() = n;
    }
}

impl Default for RecordingChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn open_thread(&self, channel: &str, _header: MessageContent) -> Result<(String, String), ChatError> {
        let id = self.seq.fetch_add(1, Ordering::SeqCst).to_string();
        Ok((format!("{channel}:{id}"), id))
    }

    async fn post_in_thread(&self, thread_id: &str, content: MessageContent) -> Result<String, ChatError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        {
            let mut remaining = self.fail_next.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChatError::Transient("injected failure".into()));
            }
        }
        self.posted.lock().push((thread_id.to_string(), content));
        Ok(self.seq.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn edit(&self, msg_id: &str, content: MessageContent) -> Result<(), ChatError> {
        self.edited.lock().push((msg_id.to_string(), content));
        Ok(())
    }

    async fn resolve_channel(&self, name: &str) -> Result<String, ChatError> {
        Ok(name.to_string())
    }

    fn whoami(&self) -> ChatIdentity {
        ChatIdentity {
            team_id: "_default_".to_string(),
            bot_user_id: "U_REC".to_string(),
        }
    }
}
