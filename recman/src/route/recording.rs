use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use http::StatusCode;

use crate::error::AppError;
use crate::recording::RecordingId;
use crate::result::Result;
use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(
            api::path::RECORDINGS,
            get(list_active).post(schedule_recording),
        )
        .route(api::path::RECORDINGS_SCHEDULED, get(list_scheduled))
        .route(api::path::RECORDINGS_HISTORY, get(list_history))
        .route(
            &api::path::recording("{id}"),
            get(show_recording).delete(cancel_recording),
        )
}

async fn schedule_recording(
    State(state): State<AppState>,
    Json(body): Json<api::request::ScheduleRecording>,
) -> Result<Json<api::response::Recording>> {
    let recording = state.scheduler.schedule(body).await?;
    Ok(Json((&recording).into()))
}

async fn cancel_recording(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.scheduler.cancel(&RecordingId::from(id)).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn show_recording(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<api::response::Recording>> {
    match state.scheduler.get(&RecordingId::from(id.as_str())).await {
        Some(recording) => Ok(Json((&recording).into())),
        None => Err(AppError::RecordingNotFound(format!(
            "recording not found: {}",
            id
        ))),
    }
}

async fn list_active(State(state): State<AppState>) -> Result<Json<Vec<api::response::Recording>>> {
    Ok(Json(
        state
            .scheduler
            .list_active()
            .await
            .iter()
            .map(api::response::Recording::from)
            .collect(),
    ))
}

async fn list_scheduled(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::response::Recording>>> {
    Ok(Json(
        state
            .scheduler
            .list_scheduled()
            .await
            .iter()
            .map(api::response::Recording::from)
            .collect(),
    ))
}

async fn list_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::recorder::HistoryRecord>>> {
    Ok(Json(state.scheduler.list_history().await))
}
