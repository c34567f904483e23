use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use api::recorder::{HistoryRecord, RecordingState};
use api::response::{Channel, Recording};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;

use recman::config::Config;
use recman::recording::RecordingId;

mod common;
use common::{at, eventually, fixture, shutdown_signal, DownGuide, Fixture};

async fn start(f: &Fixture) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await?;
    let addr = listener.local_addr()?;
    let (stop, signal) = shutdown_signal();
    tokio::spawn(recman::serve(
        Config::default(),
        f.scheduler.clone(),
        listener,
        signal,
    ));
    Ok((addr, stop))
}

#[tokio::test]
async fn test_recording_api() -> anyhow::Result<()> {
    let f = fixture().now(at(10, 15, 0)).build();
    let (addr, stop) = start(&f).await?;
    let client = Client::new();
    let url = |path: &str| format!("http://{addr}{path}");

    let channels: Vec<Channel> = client
        .get(url(api::path::CHANNELS))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].id, "bbc1");
    assert_eq!(channels[1].number, 103);

    let first: Recording = client
        .post(url(api::path::RECORDINGS))
        .json(&json!({ "channel": "bbc1" }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(first.id, "bbc1-20261019T100000Z");
    assert_eq!(first.title, "News");
    assert_eq!(first.stop, at(10, 30, 0));

    let again: Recording = client
        .post(url(api::path::RECORDINGS))
        .json(&json!({ "channel": "101" }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(again.id, first.id);

    let later: Recording = client
        .post(url(api::path::RECORDINGS))
        .json(&json!({
            "channel": "itv",
            "start": "2026-10-19T12:00:00Z",
            "stop": "2026-10-19T13:00:00Z",
            "title": "Match"
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(later.state, RecordingState::Pending);

    let active_url = url(api::path::RECORDINGS);
    let active = eventually(Duration::from_secs(3), || {
        let client = client.clone();
        let active_url = active_url.clone();
        async move {
            match client.get(&active_url).send().await {
                Ok(res) => res
                    .json::<Vec<Recording>>()
                    .await
                    .map(|r| r.len() == 1 && r[0].state == RecordingState::Active)
                    .unwrap_or(false),
                Err(_) => false,
            }
        }
    })
    .await;
    assert!(active);

    let scheduled: Vec<Recording> = client
        .get(url(api::path::RECORDINGS_SCHEDULED))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].id, later.id);

    let res = client
        .delete(url(&api::path::recording(&first.id)))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let gone_url = url(&api::path::recording(&first.id));
    let gone = eventually(Duration::from_secs(4), || {
        let client = client.clone();
        let gone_url = gone_url.clone();
        async move {
            matches!(
                client.get(&gone_url).send().await.map(|r| r.status()),
                Ok(StatusCode::NOT_FOUND)
            )
        }
    })
    .await;
    assert!(gone);
    assert_eq!(f.launcher.stop_count(&RecordingId::from(first.id.as_str())), 1);

    let res = client
        .delete(url(&api::path::recording("bbc1-19700101T000000Z")))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let history: Vec<HistoryRecord> = client
        .get(url(api::path::RECORDINGS_HISTORY))
        .send()
        .await?
        .json()
        .await?;
    assert!(history.is_empty());

    let metrics = client
        .get(url(api::path::METRICS))
        .send()
        .await?
        .text()
        .await?;
    assert!(metrics.contains("liverec_recordings_finished"));

    let _ = stop.send(());
    Ok(())
}

#[tokio::test]
async fn test_rejected_requests() -> anyhow::Result<()> {
    let f = fixture().now(at(10, 15, 0)).build();
    let (addr, stop) = start(&f).await?;
    let client = Client::new();
    let url = format!("http://{addr}{}", api::path::RECORDINGS);

    let res = client
        .post(&url)
        .json(&json!({ "channel": "cnn" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(&url)
        .json(&json!({
            "channel": "bbc1",
            "start": "2026-10-19T12:00:00Z",
            "stop": "2026-10-19T11:00:00Z"
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(&url)
        .json(&json!({ "channel": "bbc1", "stop": "2026-10-19T09:00:00Z" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    assert!(f.scheduler.registry().is_empty().await);
    let _ = stop.send(());
    Ok(())
}

#[tokio::test]
async fn test_guide_outage_maps_to_unavailable() -> anyhow::Result<()> {
    let f = fixture()
        .guide(Arc::new(DownGuide))
        .now(at(10, 15, 0))
        .build();
    let (addr, stop) = start(&f).await?;
    let client = Client::new();
    let url = format!("http://{addr}{}", api::path::RECORDINGS);

    let res = client
        .post(&url)
        .json(&json!({ "channel": "bbc1" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    let res = client
        .post(&url)
        .json(&json!({
            "channel": "bbc1",
            "start": "2026-10-19T10:15:00Z",
            "stop": "2026-10-19T10:45:00Z"
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let _ = stop.send(());
    Ok(())
}

#[tokio::test]
async fn test_local_times_read_in_configured_zone() -> anyhow::Result<()> {
    let f = fixture().now(at(10, 15, 0)).build();
    let (addr, stop) = start(&f).await?;
    let client = Client::new();

    let rec: Recording = client
        .post(format!("http://{addr}{}", api::path::RECORDINGS))
        .json(&json!({
            "channel": "itv",
            "start": "2026-10-19T13:00:00",
            "stop": "2026-10-19T14:00:00"
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(rec.start, at(12, 0, 0));
    assert_eq!(rec.stop, at(13, 0, 0));
    assert_eq!(rec.id, "itv-20261019T120000Z");
    let _ = stop.send(());
    Ok(())
}
