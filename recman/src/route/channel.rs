use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::result::Result;
use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::CHANNELS, get(channels))
}

async fn channels(State(state): State<AppState>) -> Result<Json<Vec<api::response::Channel>>> {
    Ok(Json(
        state
            .scheduler
            .catalog()
            .channels()
            .iter()
            .map(api::response::Channel::from)
            .collect(),
    ))
}
