use std::fmt;
use std::time::Duration;

use api::recorder::RecordingState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recording::RecordingId;

mod ffmpeg;
mod scripted;

pub use ffmpeg::FfmpegLauncher;
pub use scripted::ScriptedLauncher;

/// Opaque reference to a running capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureHandle {
    pub id: String,
    /// Where the capture writes its output
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub recording: RecordingId,
    pub channel: String,
    pub title: String,
    pub description: String,
    pub stream: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// Remaining length of the window at launch
    pub duration: Duration,
}

/// Terminal outcome of a capture process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureExit {
    Success,
    Error(String),
    /// Did not exit within the grace period
    Killed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchError(pub String);

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture launch failed: {}", self.0)
    }
}

impl std::error::Error for LaunchError {}

/// A capture artifact found on the launcher's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureArtifact {
    pub recording: RecordingId,
    pub channel: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: String,
    /// How the owning recording ended, if the launcher was told
    pub outcome: Option<RecordingState>,
}

impl CaptureArtifact {
    pub fn completed(&self) -> bool {
        self.outcome == Some(RecordingState::Completed)
    }
}

#[async_trait]
pub trait CaptureLauncher: Send + Sync {
    async fn launch(&self, request: CaptureRequest) -> Result<CaptureHandle, LaunchError>;

    /// Resolves when the capture exits on its own or after `stop`.
    async fn wait(&self, handle: &CaptureHandle) -> CaptureExit;

    /// Asks the capture to finish, killing it if it outlives `grace`.
    async fn stop(&self, handle: &CaptureHandle, grace: Duration) -> CaptureExit;

    /// Drops whatever the launcher keeps for a capture whose recording ended
    /// in `outcome`.
    async fn release(&self, _handle: &CaptureHandle, _outcome: RecordingState) {}

    async fn artifacts(&self) -> anyhow::Result<Vec<CaptureArtifact>>;
}
