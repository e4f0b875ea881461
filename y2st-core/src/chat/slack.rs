//! Slack Web API implementation of [`ChatClient`].

use async_trait::async_trait;
use serde_json::json;

use super::{ChatClient, ChatIdentity, MessageContent};
use crate::error::ChatError;

const API_BASE: &str = "https://slack.com/api";

pub struct SlackChatClient {
    http: reqwest::Client,
    bot_token: String,
    identity: ChatIdentity,
}

impl SlackChatClient {
    pub fn new(bot_token: String, team_id: String, bot_user_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            identity: ChatIdentity { team_id, bot_user_id },
        }
    }

    fn content_fields(content: &MessageContent) -> (String, Option<serde_json::Value>) {
        match content {
            MessageContent::Text(text) => (text.clone(), None),
            MessageContent::Blocks(blocks) => (String::new(), Some(blocks.clone())),
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value, ChatError> {
        let resp = self
            .http
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Transient(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(ChatError::RateLimited { retry_after_secs });
        }
        if resp.status().is_server_error() {
            return Err(ChatError::Transient(format!("http {}", resp.status())));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChatError::Transient(e.to_string()))?;

        if payload.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let err = payload
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error")
                .to_string();
            return Err(classify_slack_error(&err));
        }
        Ok(payload)
    }
}

fn classify_slack_error(code: &str) -> ChatError {
    match code {
        "invalid_auth" | "account_inactive" | "token_revoked" | "not_authed" => ChatError::Auth,
        "ratelimited" => ChatError::RateLimited { retry_after_secs: 1 },
        "channel_not_found" | "is_archived" | "msg_too_long" | "no_permission" => {
            ChatError::Permanent(code.to_string())
        }
        _ => ChatError::Transient(code.to_string()),
    }
}

#[async_trait]
impl ChatClient for SlackChatClient {
    async fn open_thread(
        &self,
        channel: &str,
        header: MessageContent,
    ) -> Result<(String, String), ChatError> {
        let (text, blocks) = Self::content_fields(&header);
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(blocks) = blocks {
            body["blocks"] = blocks;
        }
        let payload = self.call("chat.postMessage", body).await?;
        let ts = payload
            .get("ts")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChatError::Transient("missing ts in response".into()))?
            .to_string();
        let thread_id = format!("{channel}:{ts}");
        Ok((thread_id, ts))
    }

    async fn post_in_thread(&self, thread_id: &str, content: MessageContent) -> Result<String, ChatError> {
        let (text, blocks) = Self::content_fields(&content);
        let channel = thread_channel(thread_id);
        let mut body = json!({ "channel": channel, "text": text, "thread_ts": thread_ts(thread_id) });
        if let Some(blocks) = blocks {
            body["blocks"] = blocks;
        }
        let payload = self.call("chat.postMessage", body).await?;
        payload
            .get("ts")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ChatError::Transient("missing ts in response".into()))
    }

    async fn edit(&self, msg_id: &str, content: MessageContent) -> Result<(), ChatError> {
        let (text, blocks) = Self::content_fields(&content);
        let channel = thread_channel(msg_id);
        let mut body = json!({ "channel": channel, "ts": thread_ts(msg_id), "text": text });
        if let Some(blocks) = blocks {
            body["blocks"] = blocks;
        }
        self.call("chat.update", body).await?;
        Ok(())
    }

    async fn resolve_channel(&self, name: &str) -> Result<String, ChatError> {
        let payload = self
            .call("conversations.info", json!({ "channel": name }))
            .await?;
        payload
            .get("channel")
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ChatError::Permanent(format!("channel not found: {name}")))
    }

    fn whoami(&self) -> ChatIdentity {
        self.identity.clone()
    }
}

/// `thread_id` encodes `channel:ts` so `post_in_thread`/`edit` can recover
/// the channel without a separate lookup. `open_thread`'s caller supplies a
/// bare channel id; everything downstream uses the composite form.
fn thread_channel(thread_id: &str) -> &str {
    thread_id.split(':').next().unwrap_or(thread_id)
}

fn thread_ts(thread_id: &str) -> &str {
    thread_id.split(':').nth(1).unwrap_or(thread_id)
}
