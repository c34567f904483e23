use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{GuideError, GuideProvider, ProgramWindow};

/// Guide backed by a JSON array of program windows. The file is re-read on
/// every lookup so an external fetcher can replace it at any time.
#[derive(Debug, Clone)]
pub struct JsonGuide {
    path: PathBuf,
}

impl JsonGuide {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl GuideProvider for JsonGuide {
    async fn programs(&self, channel: &str) -> Result<Vec<ProgramWindow>, GuideError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| GuideError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        let windows: Vec<ProgramWindow> = serde_json::from_str(&content)
            .map_err(|e| GuideError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        Ok(windows
            .into_iter()
            .filter(|w| w.channel == channel && w.is_valid())
            .collect())
    }
}

/// In-memory guide whose windows can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticGuide {
    windows: RwLock<Vec<ProgramWindow>>,
}

impl StaticGuide {
    pub fn new(windows: Vec<ProgramWindow>) -> Self {
        Self {
            windows: RwLock::new(windows),
        }
    }

    pub fn replace(&self, windows: Vec<ProgramWindow>) {
        *self.windows.write().unwrap_or_else(|e| e.into_inner()) = windows;
    }
}

#[async_trait]
impl GuideProvider for StaticGuide {
    async fn programs(&self, channel: &str) -> Result<Vec<ProgramWindow>, GuideError> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        Ok(windows
            .iter()
            .filter(|w| w.channel == channel && w.is_valid())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_json_guide_filters_channel_and_invalid() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("guide.json");
        std::fs::write(
            &path,
            r#"[
              {"channel": "bbc1", "start": "2026-10-19T10:00:00Z", "stop": "2026-10-19T10:30:00Z", "title": "News"},
              {"channel": "bbc1", "start": "2026-10-19T11:00:00Z", "stop": "2026-10-19T10:30:00Z", "title": "Broken"},
              {"channel": "itv", "start": "2026-10-19T10:00:00Z", "stop": "2026-10-19T11:00:00Z", "title": "Quiz", "description": "q"}
            ]"#,
        )
        .unwrap();

        let guide = JsonGuide::new(&path);
        let windows = guide.programs("bbc1").await.unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].title, "News");
        assert_eq!(
            windows[0].start,
            Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap()
        );
        assert!(guide.programs("c4").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_guide_missing_file_is_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let guide = JsonGuide::new(dir.path().join("none.json"));
        assert!(matches!(
            guide.programs("bbc1").await,
            Err(GuideError::Unavailable(_))
        ));
    }
}
