use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use api::recorder::HistoryRecord;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::launcher::CaptureLauncher;
use crate::registry::Registry;

/// Append-only, id-keyed record of completed captures.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Inserts unless a record with the same id exists; returns whether it did.
    async fn insert(&self, record: HistoryRecord) -> Result<bool>;

    async fn contains(&self, id: &str) -> bool;

    /// All records ordered by actual start.
    async fn list(&self) -> Vec<HistoryRecord>;
}

pub struct HistoryIndex {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, HistoryRecord>>,
    write_lock: Mutex<()>,
}

impl HistoryIndex {
    pub fn memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn load(path: PathBuf) -> Result<Self> {
        let mut entries = HashMap::new();
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            if !content.trim().is_empty() {
                let parsed: Vec<HistoryRecord> = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse history file: {}", path.display()))?;
                for record in parsed {
                    entries.entry(record.id.clone()).or_insert(record);
                }
            }
        }
        debug!("[history] loaded {} records", entries.len());

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        })
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let records = self.list().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = tmp_path_for(path);
        let json = serde_json::to_string_pretty(&records)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Failed to replace history file {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for HistoryIndex {
    async fn insert(&self, record: HistoryRecord) -> Result<bool> {
        {
            let mut map = self.entries.write().await;
            if map.contains_key(&record.id) {
                return Ok(false);
            }
            map.insert(record.id.clone(), record);
        }
        self.persist().await?;
        Ok(true)
    }

    async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    async fn list(&self) -> Vec<HistoryRecord> {
        let mut records: Vec<HistoryRecord> = self.entries.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.actual_start.cmp(&b.actual_start).then(a.id.cmp(&b.id)));
        records
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    if let Some(ext) = path.extension() {
        let mut ext = ext.to_os_string();
        ext.push(".tmp");
        tmp.set_extension(ext);
    } else {
        tmp.set_extension("tmp");
    }
    tmp
}

/// Backfills history from artifacts of completed recordings the store does
/// not know about. Artifacts of recordings still in the registry are left to the
/// scheduler. Returns the number of records added.
pub async fn reconcile(
    launcher: &dyn CaptureLauncher,
    history: &dyn HistoryStore,
    registry: &Registry,
) -> Result<usize> {
    let artifacts = launcher.artifacts().await?;
    let mut added = 0;
    for artifact in artifacts {
        if !artifact.completed() {
            continue;
        }
        if registry.contains(&artifact.recording).await
            || history.contains(artifact.recording.as_str()).await
        {
            continue;
        }
        let record = HistoryRecord {
            id: artifact.recording.to_string(),
            channel: artifact.channel,
            title: artifact.title,
            actual_start: artifact.started_at,
            actual_stop: artifact.finished_at,
            output: Some(artifact.output),
        };
        match history.insert(record).await {
            Ok(true) => {
                info!("[history] backfilled {}", artifact.recording);
                added += 1;
            }
            Ok(false) => {}
            Err(e) => warn!("[history] backfill {} failed: {}", artifact.recording, e),
        }
    }
    Ok(added)
}
