//! `CommandRouter` — translates already-parsed inbound [`Command`]s into
//! `StreamRegistry`/`StreamController` actions. No transport dependency: the
//! HMAC/slash-parsing/socket-mode machinery that produces a `Command` lives
//! outside this crate's scope, the same separation the sibling repo's
//! `dispatch_method` draws between frame decoding and method routing.

use std::sync::Arc;

use tracing::info;

use crate::assembler::AssemblerConfig;
use crate::chat::ChatClient;
use crate::config::VadConfig;
use crate::error::CommandError;
use crate::registry::StreamRegistry;
use crate::segmenter::SegmenterConfig;
use crate::store::UserSecretStore;
use crate::stream::{StreamController, StreamSpec};
use crate::transcription::TranscriptionWorkerPool;
use crate::types::StreamState;
use crate::workspace_registry::WorkspaceRegistry;

/// Case-insensitive, trimmed synonyms recognized in a thread message.
const STOP_SYNONYMS: &[&str] = &["stop", "halt", "停止", "ストップ"];
const RETRY_SYNONYMS: &[&str] = &["retry", "restart", "再開", "リトライ"];

/// An inbound request, already decoded from whatever transport carried it.
#[derive(Debug, Clone)]
pub enum Command {
    /// `/youtube2thread <url>` slash command, issued in a channel — no
    /// thread exists yet, so the channel itself is the only addressable
    /// handle until the header message mints one.
    Start {
        team_id: String,
        user_id: String,
        channel: String,
        url: String,
    },
    /// `/youtube2thread-status` slash command.
    Status { team_id: String },
    /// A plain message posted into an existing thread; may or may not match
    /// a stop/retry synonym once trimmed and lowercased.
    ThreadMessage {
        team_id: String,
        thread_id: String,
        text: String,
        from_bot: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    StreamStarted { stream_id: String },
    StreamStopping { stream_id: String },
    StreamRetried { old_stream_id: String, new_stream_id: String },
    Status(StatusReport),
    /// The message didn't match any recognized synonym, or came from the
    /// bot itself; not an error, just nothing to do.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub active_stream_count: usize,
    pub streams: Vec<StreamBrief>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamBrief {
    pub stream_id: String,
    pub url: String,
    pub state: StreamState,
}

pub struct CommandRouter {
    registry: Arc<StreamRegistry>,
    workspaces: Arc<WorkspaceRegistry>,
    secrets: Arc<UserSecretStore>,
    pool: Arc<TranscriptionWorkerPool>,
    vad: VadConfig,
    downloader_path: String,
}

impl CommandRouter {
    pub fn new(
        registry: Arc<StreamRegistry>,
        workspaces: Arc<WorkspaceRegistry>,
        secrets: Arc<UserSecretStore>,
        pool: Arc<TranscriptionWorkerPool>,
        vad: VadConfig,
        downloader_path: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            workspaces,
            secrets,
            pool,
            vad,
            downloader_path: downloader_path.into(),
        }
    }

    pub async fn dispatch(&self, command: Command) -> Result<CommandOutcome, CommandError> {
        match command {
            Command::Start {
                team_id,
                user_id,
                channel,
                url,
            } => self.start(team_id, user_id, channel, url).await,
            Command::Status { team_id } => Ok(CommandOutcome::Status(self.status(&team_id))),
            Command::ThreadMessage {
                team_id,
                thread_id,
                text,
                from_bot,
            } => self.thread_message(team_id, thread_id, text, from_bot).await,
        }
    }

    async fn start(
        &self,
        team_id: String,
        user_id: String,
        channel: String,
        url: String,
    ) -> Result<CommandOutcome, CommandError> {
        if url.trim().is_empty() {
            return Err(CommandError::MissingUrl);
        }
        let chat = self
            .workspaces
            .get(&team_id)
            .ok_or_else(|| CommandError::WorkspaceInactive(team_id.clone()))?;

        if self.registry.has_active_stream(&team_id, &user_id) {
            return Err(CommandError::DuplicateStream);
        }

        self.registry.reserve_slot(&team_id, &user_id)?;
        let result = self.spawn_stream(&team_id, &user_id, &channel, &url, chat).await;
        self.registry.release_slot(&team_id, &user_id);
        result
    }

    /// `thread_id` is the registry's addressing key: the channel name for a
    /// brand-new stream, or the existing composite `channel:ts` on `retry`.
    async fn spawn_stream(
        &self,
        team_id: &str,
        user_id: &str,
        thread_id: &str,
        url: &str,
        chat: Arc<dyn ChatClient>,
    ) -> Result<CommandOutcome, CommandError> {
        let cookies = self.secrets.get_cookies(team_id, user_id)?.map(|c| c.cookies);
        let settings = self.secrets.get_settings(team_id, user_id)?;
        let language_hint = (settings.preferred_language != "auto").then_some(settings.preferred_language);

        let stream_id = uuid::Uuid::new_v4().to_string();
        let spec = StreamSpec {
            stream_id: stream_id.clone(),
            team_id: team_id.to_string(),
            user_id: user_id.to_string(),
            url: url.to_string(),
            thread_id: thread_id.to_string(),
            language_hint,
            segmenter: segmenter_config(&self.vad),
            assembler: assembler_config(&self.vad),
            aggressiveness: self.vad.aggressiveness,
        };

        let media: Arc<dyn crate::media::MediaSource> = Arc::new(crate::media::ProcessMediaSource::new(&self.downloader_path));
        let controller = StreamController::new(spec, chat, media, Arc::clone(&self.pool));
        self.registry.register(thread_id, Arc::clone(&controller));

        controller.start(cookies).await?;
        info!(stream_id, team_id, user_id, "stream started");
        Ok(CommandOutcome::StreamStarted { stream_id })
    }

    async fn thread_message(
        &self,
        team_id: String,
        thread_id: String,
        text: String,
        from_bot: bool,
    ) -> Result<CommandOutcome, CommandError> {
        if from_bot {
            return Ok(CommandOutcome::Ignored);
        }
        let normalized = text.trim().to_lowercase();

        if STOP_SYNONYMS.contains(&normalized.as_str()) {
            let controller = self
                .registry
                .get(&team_id, &thread_id)
                .ok_or(CommandError::NoActiveStream)?;
            controller.stop();
            return Ok(CommandOutcome::StreamStopping {
                stream_id: controller.stream_id().to_string(),
            });
        }

        if RETRY_SYNONYMS.contains(&normalized.as_str()) {
            return self.retry(&team_id, &thread_id).await;
        }

        Ok(CommandOutcome::Ignored)
    }

    async fn retry(&self, team_id: &str, thread_id: &str) -> Result<CommandOutcome, CommandError> {
        let old = self.registry.get(team_id, thread_id).ok_or(CommandError::NoActiveStream)?;
        if !old.status().is_terminal() {
            return Err(CommandError::StreamNotRetryable);
        }
        let chat = self
            .workspaces
            .get(team_id)
            .ok_or_else(|| CommandError::WorkspaceInactive(team_id.to_string()))?;

        self.registry.reserve_slot(team_id, old.user_id())?;
        let result = self.spawn_stream(team_id, old.user_id(), thread_id, old.url(), chat).await;
        self.registry.release_slot(team_id, old.user_id());

        if let Ok(CommandOutcome::StreamStarted { ref stream_id }) = result {
            old.mark_superseded(stream_id).await;
            return Ok(CommandOutcome::StreamRetried {
                old_stream_id: old.stream_id().to_string(),
                new_stream_id: stream_id.clone(),
            });
        }
        result
    }

    fn status(&self, team_id: &str) -> StatusReport {
        let streams = self.registry.streams_for_workspace(team_id);
        StatusReport {
            active_stream_count: streams.iter().filter(|s| s.status().is_active()).count(),
            streams: streams
                .iter()
                .map(|s| StreamBrief {
                    stream_id: s.stream_id().to_string(),
                    url: s.url().to_string(),
                    state: s.status(),
                })
                .collect(),
        }
    }
}

fn segmenter_config(vad: &VadConfig) -> SegmenterConfig {
    SegmenterConfig {
        frame_ms: vad.frame_ms,
        ..SegmenterConfig::default()
    }
}

fn assembler_config(vad: &VadConfig) -> AssemblerConfig {
    AssemblerConfig {
        soft_len: vad.soft_len,
        hard_len: vad.hard_len,
        flush_silence_ms: vad.flush_silence_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretBox;
    use crate::store::WorkspaceStore;
    use crate::transcription::{EchoModel, ModelHandle};
    use crate::types::Workspace;

    fn router() -> (CommandRouter, Arc<WorkspaceStore>) {
        let secret_box = SecretBox::new([7u8; 32]);
        let ws_store = Arc::new(WorkspaceStore::open_in_memory(secret_box.clone()).unwrap());
        ws_store
            .put(&Workspace {
                team_id: "T1".to_string(),
                team_name: "Acme".to_string(),
                bot_token: "xoxb-1".to_string(),
                signing_secret: "sig".to_string(),
                app_token: None,
                active: true,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                updated_at: "2026-01-01T00:00:00Z".to_string(),
            })
            .unwrap();
        let workspaces = Arc::new(WorkspaceRegistry::build(Arc::clone(&ws_store), None).unwrap());
        let secrets = Arc::new(UserSecretStore::open_in_memory(secret_box).unwrap());
        let pool = Arc::new(TranscriptionWorkerPool::new(ModelHandle::new(EchoModel::new()), 1, 8));
        let registry = StreamRegistry::new();

        (
            CommandRouter::new(registry, workspaces, secrets, pool, VadConfig::default(), "yt-dlp"),
            ws_store,
        )
    }

    #[tokio::test]
    async fn start_rejects_an_empty_url() {
        let (router, _store) = router();
        let err = router
            .dispatch(Command::Start {
                team_id: "T1".to_string(),
                user_id: "U1".to_string(),
                channel: "C1".to_string(),
                url: "  ".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::MissingUrl));
    }

    #[tokio::test]
    async fn start_rejects_unknown_workspace() {
        let (router, _store) = router();
        let err = router
            .dispatch(Command::Start {
                team_id: "UNKNOWN".to_string(),
                user_id: "U1".to_string(),
                channel: "C1".to_string(),
                url: "https://youtube.com/watch?v=x".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::WorkspaceInactive(_)));
    }

    #[tokio::test]
    async fn stop_synonym_with_no_active_stream_is_rejected() {
        let (router, _store) = router();
        let err = router
            .dispatch(Command::ThreadMessage {
                team_id: "T1".to_string(),
                thread_id: "C1:100.0".to_string(),
                text: "  STOP  ".to_string(),
                from_bot: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NoActiveStream));
    }

    #[tokio::test]
    async fn bot_messages_are_always_ignored() {
        let (router, _store) = router();
        let outcome = router
            .dispatch(Command::ThreadMessage {
                team_id: "T1".to_string(),
                thread_id: "C1:100.0".to_string(),
                text: "stop".to_string(),
                from_bot: true,
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Ignored);
    }

    #[tokio::test]
    async fn unrecognized_thread_text_is_ignored_not_an_error() {
        let (router, _store) = router();
        let outcome = router
            .dispatch(Command::ThreadMessage {
                team_id: "T1".to_string(),
                thread_id: "C1:100.0".to_string(),
                text: "just chatting".to_string(),
                from_bot: false,
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Ignored);
    }

    #[tokio::test]
    async fn a_second_start_for_the_same_user_is_rejected_while_the_first_is_active() {
        use crate::assembler::AssemblerConfig;
        use crate::chat::RecordingChatClient;
        use crate::media::FakeMediaSource;
        use crate::segmenter::SegmenterConfig;
        use crate::stream::{StreamController, StreamSpec};

        let (router, _store) = router();

        // Seed the registry with an already-RUNNING stream for U1 the same
        // way spawn_stream would, but against test doubles, so dispatch()'s
        // has_active_stream check is exercised without an outbound call.
        let chat = Arc::new(RecordingChatClient::new());
        let media = Arc::new(FakeMediaSource::new(vec![]));
        let pool = Arc::new(TranscriptionWorkerPool::new(ModelHandle::new(EchoModel::new()), 1, 8));
        let spec = StreamSpec {
            stream_id: "existing".to_string(),
            team_id: "T1".to_string(),
            user_id: "U1".to_string(),
            url: "https://youtube.com/watch?v=existing".to_string(),
            thread_id: "C1:existing".to_string(),
            language_hint: None,
            segmenter: SegmenterConfig::default(),
            assembler: AssemblerConfig::default(),
            aggressiveness: 2,
        };
        let controller = StreamController::new(spec, chat, media, pool);
        router.registry.register("C1:existing", Arc::clone(&controller));
        controller.start(None).await.unwrap();

        let err = router
            .dispatch(Command::Start {
                team_id: "T1".to_string(),
                user_id: "U1".to_string(),
                channel: "C2".to_string(),
                url: "https://youtube.com/watch?v=new".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::DuplicateStream));
    }

    #[tokio::test]
    async fn status_on_an_empty_workspace_reports_zero_streams() {
        let (router, _store) = router();
        let outcome = router.dispatch(Command::Status { team_id: "T1".to_string() }).await.unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Status(StatusReport {
                active_stream_count: 0,
                streams: vec![],
            })
        );
    }
}
