use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod file;

pub use file::{JsonGuide, StaticGuide};

/// One program of the guide, `[start, stop)` on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramWindow {
    pub channel: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl ProgramWindow {
    pub fn is_valid(&self) -> bool {
        self.stop > self.start
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.stop
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuideError {
    /// The feed could not be read
    Unavailable(String),
    /// The feed holds nothing at or after the requested instant for the channel
    NoProgram(String),
}

impl fmt::Display for GuideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuideError::Unavailable(e) => write!(f, "guide unavailable: {}", e),
            GuideError::NoProgram(channel) => write!(f, "no program in guide for {}", channel),
        }
    }
}

impl std::error::Error for GuideError {}

#[async_trait]
pub trait GuideProvider: Send + Sync {
    /// Program windows known for a channel, in any order.
    async fn programs(&self, channel: &str) -> Result<Vec<ProgramWindow>, GuideError>;
}

/// Picks the window covering `at`, or the next one after it when `at` falls
/// in a gap. A gap never belongs to the program before it.
pub fn resolve(windows: &[ProgramWindow], at: DateTime<Utc>) -> Option<&ProgramWindow> {
    let mut sorted: Vec<&ProgramWindow> = windows.iter().filter(|w| w.is_valid()).collect();
    sorted.sort_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));

    sorted
        .iter()
        .rev()
        .find(|w| w.contains(at))
        .or_else(|| sorted.iter().find(|w| w.start > at))
        .copied()
}

/// Resolves `(channel, at)` against the provider, `at` defaulting to `now`.
pub async fn resolve_program(
    provider: &dyn GuideProvider,
    channel: &str,
    at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<ProgramWindow, GuideError> {
    let windows = provider.programs(channel).await?;
    let at = at.unwrap_or(now);
    resolve(&windows, at)
        .cloned()
        .ok_or_else(|| GuideError::NoProgram(channel.to_string()))
}
