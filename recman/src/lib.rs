use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use http::{header, StatusCode};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Level};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::guide::JsonGuide;
use crate::history::HistoryIndex;
use crate::launcher::FfmpegLauncher;
use crate::route::AppState;
use crate::scheduler::Scheduler;

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod guide;
pub mod history;
pub mod hook;
pub mod launcher;
pub mod recording;
pub mod registry;
pub mod scheduler;

mod r#macro;
mod metrics;
mod result;
mod route;

/// Builds the production collaborators from `cfg` and serves until `signal`.
pub async fn server_up<F>(cfg: Config, listener: TcpListener, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let catalog = Catalog::load(&cfg.catalog.path).await?;
    info!(
        "[catalog] {} channels from {}",
        catalog.channels().len(),
        cfg.catalog.path
    );
    let guide = JsonGuide::new(&cfg.guide.path);
    let launcher = FfmpegLauncher::new(cfg.recorder.ffmpeg.clone(), &cfg.recorder.output_dir);
    let history = if cfg.recorder.history_path.is_empty() {
        HistoryIndex::memory()
    } else {
        HistoryIndex::load(PathBuf::from(&cfg.recorder.history_path)).await?
    };

    let scheduler = Scheduler::builder(
        Arc::new(catalog),
        Arc::new(guide),
        Arc::new(launcher),
        Arc::new(history),
    )
    .config(cfg.scheduler.clone())
    .rules(cfg.auto.clone())
    .build();

    serve(cfg, scheduler, listener, signal).await;
    Ok(())
}

/// Serves the HTTP API over an already assembled scheduler, running its
/// reconciliation loop and history backfill until `signal` resolves.
pub async fn serve<F>(cfg: Config, scheduler: Scheduler, listener: TcpListener, signal: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics_register();
    let app_state = AppState {
        scheduler: scheduler.clone(),
    };
    let reconciler = scheduler.spawn();
    let backfill = scheduler.spawn_history_reconcile();

    let app = Router::new()
        .merge(route::recording::route().merge(route::channel::route()))
        .route(api::path::METRICS, get(metrics))
        .with_state(app_state)
        .layer(if cfg.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let span = info_span!(
                        "http_request",
                        uri = ?request.uri(),
                        method = ?request.method(),
                        span_id = tracing::field::Empty,
                    );
                    span.record(
                        "span_id",
                        span.id().unwrap_or(tracing::Id::from_u64(42)).into_u64(),
                    );
                    span
                })
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO))
                .on_failure(tower_http::trace::DefaultOnFailure::new().level(Level::INFO)),
        );

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("Application error: {e}"));

    reconciler.abort();
    backfill.abort();
    scheduler.shutdown().await;
}

pub fn metrics_register() {
    metrics::register();
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
