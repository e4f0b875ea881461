//! `StreamRegistry` — enforces the at-most-one-active-stream-per-user
//! invariant and tracks live [`StreamController`]s by `(team_id, thread_id)`.
//!
//! Grounded on the sibling repo's `active_operations` DashMap idiom
//! (`skynet-gateway/src/stop.rs`: a flat map of cancellable handles, swept
//! and cleared wholesale on `/stop`), adapted here from a single global
//! sweep to per-entry terminal-state linger.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::error::CommandError;
use crate::stream::{StreamController, StreamEvent};

/// How long a StreamController stays discoverable after reaching a
/// terminal state, so a late `retry` command still finds it.
const TERMINAL_LINGER: Duration = Duration::from_secs(60);

pub struct StreamRegistry {
    streams: DashMap<(String, String), Arc<StreamController>>,
    user_slots: DashMap<(String, String), ()>,
    linger: Duration,
}

impl StreamRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_linger(TERMINAL_LINGER)
    }

    pub fn with_linger(linger: Duration) -> Arc<Self> {
        Arc::new(Self {
            streams: DashMap::new(),
            user_slots: DashMap::new(),
            linger,
        })
    }

    /// Claim the at-most-one-per-user slot for `(team_id, user_id)`. Held
    /// from command acceptance (before cookie resolution, which can race)
    /// until the StreamController is constructed; release with
    /// [`Self::release_slot`] either way.
    pub fn reserve_slot(&self, team_id: &str, user_id: &str) -> Result<(), CommandError> {
        let key = (team_id.to_string(), user_id.to_string());
        match self.user_slots.entry(key) {
            Entry::Occupied(_) => Err(CommandError::DuplicateStream),
            Entry::Vacant(v) => {
                v.insert(());
                Ok(())
            }
        }
    }

    pub fn release_slot(&self, team_id: &str, user_id: &str) {
        self.user_slots.remove(&(team_id.to_string(), user_id.to_string()));
    }

    /// Register a freshly constructed stream and arrange for it to drop out
    /// of the registry `linger` after it reaches a terminal state.
    pub fn register(self: &Arc<Self>, thread_id: &str, controller: Arc<StreamController>) {
        let key = (controller.team_id().to_string(), thread_id.to_string());
        self.streams.insert(key.clone(), Arc::clone(&controller));

        let registry = Arc::clone(self);
        let mut events = controller.subscribe_events();
        let linger = self.linger;
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(StreamEvent::StateChanged { state, .. }) if state.is_terminal() => break,
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
            tokio::time::sleep(linger).await;
            let still_terminal = registry
                .streams
                .get(&key)
                .map(|entry| entry.status().is_terminal())
                .unwrap_or(false);
            if still_terminal {
                registry.streams.remove(&key);
                info!(team_id = %key.0, thread_id = %key.1, "stream removed from registry after terminal linger");
            }
        });
    }

    pub fn get(&self, team_id: &str, thread_id: &str) -> Option<Arc<StreamController>> {
        self.streams
            .get(&(team_id.to_string(), thread_id.to_string()))
            .map(|e| Arc::clone(e.value()))
    }

    pub fn remove(&self, team_id: &str, thread_id: &str) -> Option<Arc<StreamController>> {
        self.streams.remove(&(team_id.to_string(), thread_id.to_string())).map(|(_, v)| v)
    }

    /// Snapshot of every stream currently registered for `team_id`.
    pub fn streams_for_workspace(&self, team_id: &str) -> Vec<Arc<StreamController>> {
        self.streams
            .iter()
            .filter(|entry| entry.key().0 == team_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.streams.iter().filter(|e| e.value().status().is_active()).count()
    }

    /// Whether `user_id` already has a non-terminal stream registered under
    /// `team_id`. Checked in addition to the transient `reserve_slot` window,
    /// since that slot is released as soon as a stream is constructed — long
    /// before the stream itself reaches a terminal state.
    pub fn has_active_stream(&self, team_id: &str, user_id: &str) -> bool {
        self.streams
            .iter()
            .filter(|entry| entry.key().0 == team_id)
            .any(|entry| entry.value().user_id() == user_id && entry.value().status().is_active())
    }

    /// Snapshot of every stream currently registered, across all workspaces.
    /// Used by the service binary's shutdown sweep.
    pub fn all_streams(&self) -> Vec<Arc<StreamController>> {
        self.streams.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}
