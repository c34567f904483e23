use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::recording::{Recording, RecordingId};

pub type Entries = HashMap<RecordingId, Recording>;

/// Every recording that has not reached a terminal state, keyed by id.
///
/// One lock guards insertion, every state change and enumeration. It is only
/// held across in-memory mutation, never across a capture launcher call.
#[derive(Clone, Default)]
pub struct Registry {
    map: Arc<RwLock<Entries>>,
}

impl Registry {
    /// Inserts a Pending recording unless its id is already live. Returns the
    /// live entry and whether this call created it; the first writer wins.
    pub async fn insert_if_absent(&self, recording: Recording) -> (Recording, bool) {
        let mut map = self.map.write().await;
        if let Some(existing) = map.get(&recording.id) {
            return (existing.clone(), false);
        }
        map.insert(recording.id.clone(), recording.clone());
        (recording, true)
    }

    pub async fn contains(&self, id: &RecordingId) -> bool {
        self.map.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &RecordingId) -> Option<Recording> {
        self.map.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }

    /// Consistent copy of the live entries ordered by start.
    pub async fn snapshot(&self) -> Vec<Recording> {
        let map = self.map.read().await;
        let mut recordings: Vec<Recording> = map.values().cloned().collect();
        drop(map);
        recordings.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        recordings
    }

    pub(crate) async fn lock(&self) -> RwLockWriteGuard<'_, Entries> {
        self.map.write().await
    }
}
