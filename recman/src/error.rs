use std::fmt;

use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::guide::GuideError;
use crate::recording::RecordingId;

/// Why a schedule request produced no recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    InvalidChannel(String),
    InvalidWindow(String),
    GuideUnavailable(GuideError),
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::InvalidChannel(channel) => write!(f, "invalid channel: {}", channel),
            ScheduleError::InvalidWindow(reason) => write!(f, "invalid window: {}", reason),
            ScheduleError::GuideUnavailable(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ScheduleError {}

impl From<GuideError> for ScheduleError {
    fn from(e: GuideError) -> Self {
        ScheduleError::GuideUnavailable(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelError {
    NotFound(RecordingId),
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelError::NotFound(id) => write!(f, "recording not found: {}", id),
        }
    }
}

impl std::error::Error for CancelError {}

#[derive(Debug)]
pub enum AppError {
    InvalidChannel(String),
    InvalidWindow(String),
    GuideUnavailable(String),
    RecordingNotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::InvalidChannel(err) => (StatusCode::BAD_REQUEST, err).into_response(),
            AppError::InvalidWindow(err) => (StatusCode::BAD_REQUEST, err).into_response(),
            AppError::GuideUnavailable(err) => {
                (StatusCode::SERVICE_UNAVAILABLE, err).into_response()
            }
            AppError::RecordingNotFound(err) => (StatusCode::NOT_FOUND, err).into_response(),
            AppError::InternalServerError(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        let msg = err.to_string();
        match err {
            ScheduleError::InvalidChannel(_) => AppError::InvalidChannel(msg),
            ScheduleError::InvalidWindow(_) => AppError::InvalidWindow(msg),
            ScheduleError::GuideUnavailable(_) => AppError::GuideUnavailable(msg),
        }
    }
}

impl From<CancelError> for AppError {
    fn from(err: CancelError) -> Self {
        AppError::RecordingNotFound(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}
