//! Per-thread post ordering without a global lock (§9 design note): each
//! `thread_id` gets its own unbounded queue and a dedicated drain task, so a
//! slow post to one thread never blocks posts to another.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::{retry_chat, ChatClient, ChatIdentity, MessageContent};
use crate::error::ChatError;

type PostReply = oneshot::Sender<Result<String, ChatError>>;

struct PostJob {
    content: MessageContent,
    reply: PostReply,
}

/// Wraps any [`ChatClient`] and serializes `post_in_thread` calls per
/// `thread_id`. `open_thread`/`edit`/`resolve_channel`/`whoami` pass straight
/// through (with the same retry schedule), since only in-thread ordering is
/// a correctness requirement.
pub struct SerializingChatClient<C: ChatClient + 'static> {
    inner: Arc<C>,
    queues: DashMap<String, mpsc::UnboundedSender<PostJob>>,
    max_attempts: u32,
}

impl<C: ChatClient + 'static> SerializingChatClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner: Arc::new(inner),
            queues: DashMap::new(),
            max_attempts: 5,
        }
    }

    fn queue_for(&self, thread_id: &str) -> mpsc::UnboundedSender<PostJob> {
        if let Some(tx) = self.queues.get(thread_id) {
            return tx.clone();
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<PostJob>();
        let inner = Arc::clone(&self.inner);
        let thread_id_owned = thread_id.to_string();
        let max_attempts = self.max_attempts;
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = retry_chat(max_attempts, || {
                    inner.post_in_thread(&thread_id_owned, job.content.clone())
                })
                .await;
                let _ = job.reply.send(result);
            }
        });
        self.queues.insert(thread_id.to_string(), tx.clone());
        tx
    }
}

impl Clone for MessageContent {
    fn clone(&self) -> Self {
        match self {
            MessageContent::Text(s) => MessageContent::Text(s.clone()),
            MessageContent::Blocks(v) => MessageContent::Blocks(v.clone()),
        }
    }
}

#[async_trait]
impl<C: ChatClient + 'static> ChatClient for SerializingChatClient<C> {
    async fn open_thread(
        &self,
        channel: &str,
        header: MessageContent,
    ) -> Result<(String, String), ChatError> {
        let inner = Arc::clone(&self.inner);
        retry_chat(self.max_attempts, || inner.open_thread(channel, header.clone())).await
    }

    async fn post_in_thread(&self, thread_id: &str, content: MessageContent) -> Result<String, ChatError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queue = self.queue_for(thread_id);
        queue
            .send(PostJob { content, reply: reply_tx })
            .map_err(|_| ChatError::Permanent("post queue closed".into()))?;
        reply_rx
            .await
            .map_err(|_| ChatError::Permanent("post worker dropped reply".into()))?
    }

    async fn edit(&self, msg_id: &str, content: MessageContent) -> Result<(), ChatError> {
        let inner = Arc::clone(&self.inner);
        let msg_id = msg_id.to_string();
        retry_chat(self.max_attempts, move || {
            let inner = Arc::clone(&inner);
            let msg_id = msg_id.clone();
            let content = content.clone();
            async move { inner.edit(&msg_id, content).await }
        })
        .await
    }

    async fn resolve_channel(&self, name: &str) -> Result<String, ChatError> {
        let inner = Arc::clone(&self.inner);
        retry_chat(self.max_attempts, || inner.resolve_channel(name)).await
    }

    fn whoami(&self) -> ChatIdentity {
        self.inner.whoami()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::RecordingChatClient;
    use std::time::Duration;

    #[tokio::test]
    async fn posts_to_same_thread_land_in_order() {
        let recorder = RecordingChatClient::new();
        let posted = recorder.posted.clone();
        let client = SerializingChatClient::new(recorder);

        let mut handles = Vec::new();
        for i in 0..10 {
            let content = MessageContent::Text(format!("sentence-{i}"));
            handles.push(client.post_in_thread("C1:100.0", content));
        }
        for h in handles {
            h.await.unwrap();
        }

        let log = posted.lock();
        let texts: Vec<String> = log
            .iter()
            .map(|(_, c)| match c {
                MessageContent::Text(t) => t.clone(),
                _ => unreachable!(),
            })
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("sentence-{i}")).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn different_threads_do_not_block_each_other() {
        let recorder = RecordingChatClient::with_delay(Duration::from_millis(50));
        let client = SerializingChatClient::new(recorder);

        let start = std::time::Instant::now();
        let a = client.post_in_thread("C1:1.0", MessageContent::Text("a".into()));
        let b = client.post_in_thread("C2:2.0", MessageContent::Text("b".into()));
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();
        assert!(start.elapsed() < Duration::from_millis(150));
    }
}
