//! crates/humonix_core/src/mood.rs
//!
//! The mood store: the latest selected mood plus a bounded cache of recent entries.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::domain::{IdentityId, Intensity, MoodEntry, MoodState};
use crate::gateway::Gateway;
use crate::ports::PortResult;

/// Most recent entries kept in memory and requested from the backend.
pub const MOOD_HISTORY_LIMIT: usize = 30;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoodSnapshot {
    pub current: Option<MoodState>,
    /// Newest first, never longer than `MOOD_HISTORY_LIMIT`.
    pub history: Vec<MoodEntry>,
    pub is_loading: bool,
}

pub struct MoodStore {
    gateway: Arc<Gateway>,
    state: watch::Sender<MoodSnapshot>,
}

impl MoodStore {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let (state, _) = watch::channel(MoodSnapshot::default());
        Self { gateway, state }
    }

    pub fn subscribe(&self) -> watch::Receiver<MoodSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> MoodSnapshot {
        self.state.borrow().clone()
    }

    pub fn history(&self) -> Vec<MoodEntry> {
        self.state.borrow().history.clone()
    }

    pub fn current_mood(&self) -> Option<MoodState> {
        self.state.borrow().current.clone()
    }

    /// Stores a mood for `owner`, then records it locally.
    ///
    /// Local state only changes after the backend accepted the entry, and takes
    /// the timestamp the gateway stamped on it.
    pub async fn set_mood(&self, mood: MoodState, owner: &IdentityId) -> PortResult<MoodEntry> {
        let intensity = Intensity::new(mood.intensity)?;
        self.set_loading(true);

        let entry = MoodEntry {
            id: None,
            user_id: owner.clone(),
            mood: mood.mood,
            intensity,
            tags: mood.tags.clone(),
            timestamp: mood.timestamp,
            notes: mood.notes.clone(),
        };

        match self.gateway.append_mood_entry(&entry).await {
            Ok(stored) => {
                debug!("Saved mood entry {:?} for {}", stored.id, owner);
                let current = MoodState {
                    timestamp: stored.timestamp,
                    ..mood
                };
                self.state.send_modify(|s| {
                    s.current = Some(current);
                    s.history.insert(0, stored.clone());
                    s.history.truncate(MOOD_HISTORY_LIMIT);
                    s.is_loading = false;
                });
                Ok(stored)
            }
            Err(e) => {
                error!("Error saving mood: {}", e);
                self.set_loading(false);
                Err(e)
            }
        }
    }

    /// Replaces the cached history with the backend's newest entries.
    pub async fn load_mood_history(&self, owner: &IdentityId) -> PortResult<Vec<MoodEntry>> {
        self.set_loading(true);
        match self
            .gateway
            .fetch_mood_history(owner, MOOD_HISTORY_LIMIT)
            .await
        {
            Ok(history) => {
                self.state.send_modify(|s| {
                    s.history = history.clone();
                    s.is_loading = false;
                });
                Ok(history)
            }
            Err(e) => {
                error!("Error loading mood history: {}", e);
                self.set_loading(false);
                Err(e)
            }
        }
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_modify(|s| s.is_loading = loading);
    }
}
