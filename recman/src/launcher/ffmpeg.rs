use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use api::recorder::RecordingState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use super::{CaptureArtifact, CaptureExit, CaptureHandle, CaptureLauncher, CaptureRequest, LaunchError};
use crate::recording::RecordingId;

const SIDECAR_EXT: &str = "json";

/// Metadata written next to each capture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    recording: RecordingId,
    channel: String,
    title: String,
    description: String,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    exit: Option<CaptureExit>,
    /// Terminal state of the recording, written on release
    #[serde(default)]
    outcome: Option<RecordingState>,
}

struct Running {
    sidecar: PathBuf,
    stop_tx: mpsc::Sender<Duration>,
    exit_rx: watch::Receiver<Option<CaptureExit>>,
}

/// Captures a stream by remuxing it with an ffmpeg child process.
pub struct FfmpegLauncher {
    ffmpeg: String,
    output_dir: PathBuf,
    running: Mutex<HashMap<String, Running>>,
}

impl FfmpegLauncher {
    pub fn new(ffmpeg: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            output_dir: output_dir.into(),
            running: Mutex::new(HashMap::new()),
        }
    }

    fn output_path(&self, request: &CaptureRequest) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}_{}.mp4",
            request.recording,
            safe_filename(&request.channel),
            safe_filename(&request.title)
        ))
    }

    async fn exit_receiver(&self, handle: &CaptureHandle) -> Option<watch::Receiver<Option<CaptureExit>>> {
        self.running
            .lock()
            .await
            .get(&handle.id)
            .map(|r| r.exit_rx.clone())
    }
}

/// Replaces anything outside `[A-Za-z0-9_-. ]` with `_`.
pub(crate) fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sidecar_path(output: &Path) -> PathBuf {
    let mut path = output.as_os_str().to_os_string();
    path.push(".");
    path.push(SIDECAR_EXT);
    PathBuf::from(path)
}

async fn read_sidecar(path: &Path) -> anyhow::Result<Sidecar> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read capture metadata {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

async fn write_sidecar(path: &Path, sidecar: &Sidecar) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(sidecar)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write capture metadata {}", path.display()))
}

fn exit_of(status: std::io::Result<std::process::ExitStatus>) -> CaptureExit {
    match status {
        Ok(status) if status.success() => CaptureExit::Success,
        Ok(status) => CaptureExit::Error(format!("ffmpeg exited with {}", status)),
        Err(e) => CaptureExit::Error(format!("ffmpeg wait failed: {}", e)),
    }
}

async fn supervise(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut stop_rx: mpsc::Receiver<Duration>,
    exit_tx: watch::Sender<Option<CaptureExit>>,
    sidecar_path: PathBuf,
    mut sidecar: Sidecar,
) {
    let exit = tokio::select! {
        status = child.wait() => exit_of(status),
        Some(grace) = stop_rx.recv() => {
            // ffmpeg finalizes the mp4 and exits when it reads `q`
            if let Some(mut stdin) = stdin.take() {
                if let Err(e) = stdin.write_all(b"q").await {
                    debug!("[ffmpeg] {} stdin closed: {}", sidecar.recording, e);
                }
                let _ = stdin.flush().await;
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => exit_of(status),
                Err(_) => {
                    warn!("[ffmpeg] {} ignored stop for {:?}, killing", sidecar.recording, grace);
                    let _ = child.kill().await;
                    CaptureExit::Killed
                }
            }
        }
    };

    info!("[ffmpeg] {} exited: {:?}", sidecar.recording, exit);
    sidecar.finished_at = Some(Utc::now());
    sidecar.exit = Some(exit.clone());
    if let Err(e) = write_sidecar(&sidecar_path, &sidecar).await {
        warn!("[ffmpeg] {}", e);
    }
    let _ = exit_tx.send(Some(exit));
}

#[async_trait]
impl CaptureLauncher for FfmpegLauncher {
    async fn launch(&self, request: CaptureRequest) -> Result<CaptureHandle, LaunchError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| LaunchError(format!("{}: {}", self.output_dir.display(), e)))?;

        let output = self.output_path(&request);
        let sidecar_path = sidecar_path(&output);
        let sidecar = Sidecar {
            recording: request.recording.clone(),
            channel: request.channel.clone(),
            title: request.title.clone(),
            description: request.description.clone(),
            start: request.start,
            stop: request.stop,
            started_at: Utc::now(),
            finished_at: None,
            exit: None,
            outcome: None,
        };
        write_sidecar(&sidecar_path, &sidecar)
            .await
            .map_err(|e| LaunchError(e.to_string()))?;

        let spawned = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(&request.stream)
            .arg("-t")
            .arg(request.duration.as_secs().max(1).to_string())
            .args(["-c", "copy", "-f", "mp4"])
            .arg(&output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = tokio::fs::remove_file(&sidecar_path).await;
                return Err(LaunchError(format!("spawn {}: {}", self.ffmpeg, e)));
            }
        };

        // `Child::wait` closes a stdin it still owns, which would swallow the `q`
        let stdin = child.stdin.take();
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(
            child,
            stdin,
            stop_rx,
            exit_tx,
            sidecar_path.clone(),
            sidecar,
        ));

        let handle = CaptureHandle {
            id: request.recording.to_string(),
            output: output.to_string_lossy().into_owned(),
        };
        self.running
            .lock()
            .await
            .insert(
                handle.id.clone(),
                Running {
                    sidecar: sidecar_path,
                    stop_tx,
                    exit_rx,
                },
            );
        info!(
            "[ffmpeg] started capture {} -> {} for {}s",
            request.recording,
            handle.output,
            request.duration.as_secs()
        );
        Ok(handle)
    }

    async fn wait(&self, handle: &CaptureHandle) -> CaptureExit {
        let Some(mut rx) = self.exit_receiver(handle).await else {
            return CaptureExit::Error(format!("unknown capture {}", handle.id));
        };
        let exit = match rx.wait_for(|e| e.is_some()).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        };
        exit.unwrap_or_else(|| CaptureExit::Error("capture supervisor vanished".to_string()))
    }

    async fn stop(&self, handle: &CaptureHandle, grace: Duration) -> CaptureExit {
        let control = self
            .running
            .lock()
            .await
            .get(&handle.id)
            .map(|r| (r.stop_tx.clone(), r.exit_rx.clone()));
        let Some((stop_tx, mut exit_rx)) = control else {
            return CaptureExit::Error(format!("unknown capture {}", handle.id));
        };
        // a capture that already exited keeps its recorded outcome
        let _ = stop_tx.try_send(grace);
        let exit = match exit_rx.wait_for(|e| e.is_some()).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        };
        exit.unwrap_or_else(|| CaptureExit::Error("capture supervisor vanished".to_string()))
    }

    async fn release(&self, handle: &CaptureHandle, outcome: RecordingState) {
        let Some(running) = self.running.lock().await.remove(&handle.id) else {
            return;
        };
        let updated = match read_sidecar(&running.sidecar).await {
            Ok(mut sidecar) => {
                sidecar.outcome = Some(outcome);
                write_sidecar(&running.sidecar, &sidecar).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = updated {
            warn!("[ffmpeg] {} outcome not saved: {}", handle.id, e);
        }
    }

    async fn artifacts(&self) -> anyhow::Result<Vec<CaptureArtifact>> {
        let mut artifacts = vec![];
        let mut dir = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(artifacts),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SIDECAR_EXT) {
                continue;
            }
            let Some(output) = path.file_stem().map(|s| path.with_file_name(s)) else {
                continue;
            };
            let sidecar = match read_sidecar(&path).await {
                Ok(sidecar) => sidecar,
                Err(e) => {
                    debug!("[ffmpeg] skip {}: {}", path.display(), e);
                    continue;
                }
            };
            artifacts.push(CaptureArtifact {
                recording: sidecar.recording,
                channel: sidecar.channel,
                title: sidecar.title,
                started_at: sidecar.started_at,
                finished_at: sidecar.finished_at,
                output: output.to_string_lossy().into_owned(),
                outcome: sidecar.outcome,
            });
        }
        Ok(artifacts)
    }
}
