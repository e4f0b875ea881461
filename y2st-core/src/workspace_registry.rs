//! `WorkspaceRegistry` — runtime cache mapping `team_id → ChatClient`,
//! rebuilt from `WorkspaceStore` on boot and on admin mutations.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::chat::{ChatClient, SerializingChatClient, SlackChatClient};
use crate::config::EnvWorkspaceFallback;
use crate::error::StoreError;
use crate::store::WorkspaceStore;
use crate::types::DEFAULT_TEAM_ID;

pub struct WorkspaceRegistry {
    store: Arc<WorkspaceStore>,
    clients: RwLock<std::collections::HashMap<String, Arc<dyn ChatClient>>>,
    env_fallback: Option<Arc<dyn ChatClient>>,
}

impl WorkspaceRegistry {
    /// Build the registry from every active workspace in `store`, plus the
    /// single-workspace environment fallback client if one was configured.
    pub fn build(
        store: Arc<WorkspaceStore>,
        env_workspace: Option<EnvWorkspaceFallback>,
    ) -> Result<Self, StoreError> {
        let env_fallback = env_workspace.map(|env| {
            let client: Arc<dyn ChatClient> = Arc::new(SerializingChatClient::new(
                SlackChatClient::new(env.bot_token, DEFAULT_TEAM_ID.to_string(), "unknown".to_string()),
            ));
            client
        });

        let registry = Self {
            store,
            clients: RwLock::new(std::collections::HashMap::new()),
            env_fallback,
        };
        registry.rebuild()?;
        Ok(registry)
    }

    /// Reload every active workspace from the store, replacing the in-memory
    /// client map wholesale. Called at startup and after any admin mutation.
    pub fn rebuild(&self) -> Result<(), StoreError> {
        let workspaces = self.store.list(true)?;
        let mut clients = std::collections::HashMap::new();
        for ws in workspaces {
            let client: Arc<dyn ChatClient> = Arc::new(SerializingChatClient::new(SlackChatClient::new(
                ws.bot_token,
                ws.team_id.clone(),
                "unknown".to_string(),
            )));
            clients.insert(ws.team_id, client);
        }
        *self.clients.write() = clients;
        Ok(())
    }

    /// Look up the `ChatClient` for `team_id`. Falls back to the
    /// environment-configured client when no workspaces are registered at
    /// all (single-workspace mode), and otherwise returns `None`.
    pub fn get(&self, team_id: &str) -> Option<Arc<dyn ChatClient>> {
        if let Some(client) = self.clients.read().get(team_id).cloned() {
            return Some(client);
        }
        if self.clients.read().is_empty() {
            return self.env_fallback.clone();
        }
        None
    }

    pub fn registered_team_ids(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretBox;
    use crate::types::Workspace;

    fn sample(team_id: &str) -> Workspace {
        Workspace {
            team_id: team_id.to_string(),
            team_name: "Acme".to_string(),
            bot_token: "xoxb-1".to_string(),
            signing_secret: "sig".to_string(),
            app_token: None,
            active: true,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn falls_back_to_env_client_when_no_workspaces_registered() {
        let store = Arc::new(WorkspaceStore::open_in_memory(SecretBox::new([1u8; 32])).unwrap());
        let registry = WorkspaceRegistry::build(
            store,
            Some(EnvWorkspaceFallback {
                bot_token: "env-token".to_string(),
                signing_secret: "env-sign".to_string(),
                app_token: None,
            }),
        )
        .unwrap();

        assert!(registry.get("anything").is_some());
    }

    #[test]
    fn prefers_registered_workspace_over_env_fallback() {
        let store = Arc::new(WorkspaceStore::open_in_memory(SecretBox::new([1u8; 32])).unwrap());
        store.put(&sample("T1")).unwrap();
        let registry = WorkspaceRegistry::build(store, None).unwrap();

        assert!(registry.get("T1").is_some());
        assert!(registry.get("unknown-team").is_none());
    }

    #[test]
    fn rebuild_picks_up_new_rows() {
        let store = Arc::new(WorkspaceStore::open_in_memory(SecretBox::new([1u8; 32])).unwrap());
        let registry = WorkspaceRegistry::build(Arc::clone(&store), None).unwrap();
        assert!(registry.get("T2").is_none());

        store.put(&sample("T2")).unwrap();
        registry.rebuild().unwrap();
        assert!(registry.get("T2").is_some());
    }
}
