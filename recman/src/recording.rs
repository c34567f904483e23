use std::fmt;

use api::recorder::RecordingState;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::launcher::CaptureHandle;

/// Identity of a recording: channel id plus its start instant truncated to
/// whole seconds. Deriving it twice from the same inputs yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordingId(String);

impl RecordingId {
    pub fn derive(channel: &str, start: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}",
            channel,
            normalize(start).format("%Y%m%dT%H%M%SZ")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordingId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

pub fn normalize(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(0)
}

/// Whether the lifecycle allows `from -> to`.
///
/// Pending may end directly in Completed or Failed when its window elapsed
/// before launch; any non-terminal state may be canceled.
pub fn can_transition(from: RecordingState, to: RecordingState) -> bool {
    use RecordingState::*;
    match (from, to) {
        (Pending, Starting) | (Pending, Completed) | (Pending, Failed) => true,
        (Starting, Active) | (Starting, Failed) => true,
        (Active, Stopping) => true,
        (Stopping, Completed) | (Stopping, Failed) => true,
        (from, Canceled) => !from.is_terminal(),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub id: RecordingId,
    pub from: RecordingState,
    pub to: RecordingState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recording {} cannot move from {} to {}",
            self.id, self.from, self.to
        )
    }
}

impl std::error::Error for IllegalTransition {}

/// Why a recording ended in Failed, or why the sweep forced a canceled one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: String,
    /// Forced by the sweep rather than reported by the capture
    pub stuck: bool,
}

/// One applied state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: RecordingId,
    pub channel: String,
    pub from: RecordingState,
    pub to: RecordingState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Recording {
    pub id: RecordingId,
    pub channel: String,
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// Stream locator captured at creation
    pub stream: String,
    pub state: RecordingState,
    pub handle: Option<CaptureHandle>,
    pub created_at: DateTime<Utc>,
    pub state_since: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    /// Was due while every capture slot was taken
    pub waited_for_slot: bool,
    pub failure: Option<Failure>,
}

/// Canonical creation input: every request shape is reduced to this.
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub channel: String,
    pub stream: String,
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl Recording {
    /// Builds a Pending recording, or `None` when the window is empty.
    pub fn pending(new: NewRecording, now: DateTime<Utc>) -> Option<Self> {
        let start = normalize(new.start);
        if new.stop <= start {
            return None;
        }
        Some(Self {
            id: RecordingId::derive(&new.channel, start),
            channel: new.channel,
            title: new.title,
            description: new.description,
            start,
            stop: new.stop,
            stream: new.stream,
            state: RecordingState::Pending,
            handle: None,
            created_at: now,
            state_since: now,
            started_at: None,
            stopped_at: None,
            cancel_requested: false,
            waited_for_slot: false,
            failure: None,
        })
    }

    pub fn transition(
        &mut self,
        to: RecordingState,
        now: DateTime<Utc>,
    ) -> Result<Transition, IllegalTransition> {
        let from = self.state;
        if !can_transition(from, to) {
            return Err(IllegalTransition {
                id: self.id.clone(),
                from,
                to,
            });
        }
        self.state = to;
        self.state_since = now;
        match to {
            RecordingState::Active => self.started_at = Some(now),
            RecordingState::Completed | RecordingState::Canceled | RecordingState::Failed
                if self.started_at.is_some() =>
            {
                self.stopped_at = Some(now)
            }
            _ => {}
        }
        Ok(Transition {
            id: self.id.clone(),
            channel: self.channel.clone(),
            from,
            to,
            at: now,
        })
    }

    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        stuck: bool,
        now: DateTime<Utc>,
    ) -> Result<Transition, IllegalTransition> {
        let transition = self.transition(RecordingState::Failed, now)?;
        self.failure = Some(Failure {
            reason: reason.into(),
            stuck,
        });
        Ok(transition)
    }

    /// Whether the recording holds a capture slot.
    pub fn is_capturing(&self) -> bool {
        matches!(
            self.state,
            RecordingState::Starting | RecordingState::Active | RecordingState::Stopping
        )
    }
}

impl From<&Recording> for api::response::Recording {
    fn from(r: &Recording) -> Self {
        Self {
            id: r.id.to_string(),
            channel: r.channel.clone(),
            title: r.title.clone(),
            description: r.description.clone(),
            start: r.start,
            stop: r.stop,
            state: r.state,
            created_at: r.created_at,
            started_at: r.started_at,
            output: r.handle.as_ref().map(|h| h.output.clone()),
            cancel_requested: r.cancel_requested,
        }
    }
}
