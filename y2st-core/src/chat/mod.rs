//! `ChatClient` — thin abstraction over the chat platform. One implementation
//! is registered per workspace in `WorkspaceRegistry` (§4.5); `StreamController`
//! only ever sees the trait object.

mod null;
mod serializing;
mod slack;

pub use null::{NullChatClient, RecordingChatClient};
pub use serializing::SerializingChatClient;
pub use slack::SlackChatClient;

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

use crate::error::ChatError;

/// A message body: either plain text (sentences) or a platform-native block
/// payload (header messages, which carry title/url/status formatting).
#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    Blocks(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct ChatIdentity {
    pub team_id: String,
    pub bot_user_id: String,
}

/// Contract for posting into a chat platform. Implementations must be safe
/// to call concurrently; `post_in_thread` SHOULD preserve arrival order
/// within a single `thread_id` (see [`SerializingChatClient`], which adds
/// that guarantee on top of any inner client).
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn open_thread(
        &self,
        channel: &str,
        header: MessageContent,
    ) -> Result<(String, String), ChatError>;

    async fn post_in_thread(&self, thread_id: &str, content: MessageContent) -> Result<String, ChatError>;

    async fn edit(&self, msg_id: &str, content: MessageContent) -> Result<(), ChatError>;

    async fn resolve_channel(&self, name: &str) -> Result<String, ChatError>;

    fn whoami(&self) -> ChatIdentity;
}

/// Exponential backoff with full jitter, schedule: base, base*2, base*4, ...
/// capped at `cap`. Attempt is 1-indexed.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let exp = base.saturating_mul(1u32 << shift);
    let bounded = exp.min(cap);
    let jittered_millis = rand::thread_rng().gen_range(0..=bounded.as_millis().max(1) as u64);
    Duration::from_millis(jittered_millis)
}

/// Retry an operation against the schedule ChatClient failures use: up to
/// `max_attempts` tries, 250ms base / 8s cap full jitter between attempts,
/// stopping immediately on a non-retryable error.
pub async fn retry_chat<F, Fut, T>(max_attempts: u32, mut op: F) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChatError>>,
{
    const BASE: Duration = Duration::from_millis(250);
    const CAP: Duration = Duration::from_secs(8);

    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = if let ChatError::RateLimited { retry_after_secs } = &e {
                    Duration::from_secs(*retry_after_secs)
                } else {
                    backoff_delay(attempt, BASE, CAP)
                };
                tracing::warn!(attempt, max_attempts, error = %e, delay_ms = delay.as_millis() as u64, "chat post failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_delay_never_exceeds_cap() {
        for attempt in 1..20 {
            let d = backoff_delay(attempt, Duration::from_millis(250), Duration::from_secs(8));
            assert!(d <= Duration::from_secs(8));
        }
    }

    #[tokio::test]
    async fn retry_chat_stops_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result: Result<(), ChatError> = retry_chat(5, || {
            calls2.fetch_add(1, Ordering::SeqCst);
            async { Err(ChatError::Permanent("nope".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_chat_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result = retry_chat(5, move || {
            let n = calls2.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ChatError::Transient("blip".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
