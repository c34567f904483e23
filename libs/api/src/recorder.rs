use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordingState {
    /// Waiting for its start instant
    Pending,
    /// Capture launch requested, not yet confirmed
    Starting,
    /// Capture running
    Active,
    /// Stop requested, waiting for the capture to exit
    Stopping,
    /// Capture finished cleanly
    Completed,
    /// Stopped on operator request
    Canceled,
    /// Launch error, error exit, forced kill or stuck transition
    Failed,
}

impl RecordingState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordingState::Completed | RecordingState::Canceled | RecordingState::Failed
        )
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Pending => write!(f, "Pending"),
            RecordingState::Starting => write!(f, "Starting"),
            RecordingState::Active => write!(f, "Active"),
            RecordingState::Stopping => write!(f, "Stopping"),
            RecordingState::Completed => write!(f, "Completed"),
            RecordingState::Canceled => write!(f, "Canceled"),
            RecordingState::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for RecordingState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(RecordingState::Pending),
            "Starting" => Ok(RecordingState::Starting),
            "Active" => Ok(RecordingState::Active),
            "Stopping" => Ok(RecordingState::Stopping),
            "Completed" => Ok(RecordingState::Completed),
            "Canceled" => Ok(RecordingState::Canceled),
            "Failed" => Ok(RecordingState::Failed),
            _ => Err(()),
        }
    }
}

/// Persisted record of a completed capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Recording id, unique within the history
    pub id: String,
    pub channel: String,
    pub title: String,
    pub actual_start: DateTime<Utc>,
    /// None when the capture never ran (window elapsed before launch)
    pub actual_stop: Option<DateTime<Utc>>,
    /// Output file of the capture
    pub output: Option<String>,
}
