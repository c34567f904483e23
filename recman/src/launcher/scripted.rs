use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use api::recorder::RecordingState;
use async_trait::async_trait;
use tokio::sync::watch;

use super::{CaptureArtifact, CaptureExit, CaptureHandle, CaptureLauncher, CaptureRequest, LaunchError};
use crate::recording::RecordingId;

#[derive(Default)]
struct Script {
    fail_launch: Option<String>,
    stop_exit: Option<CaptureExit>,
    hang_on_stop: bool,
    launches: Vec<RecordingId>,
    stops: Vec<String>,
    releases: Vec<(String, RecordingState)>,
    exits: HashMap<String, watch::Sender<Option<CaptureExit>>>,
    artifacts: Vec<CaptureArtifact>,
}

/// In-memory launcher whose captures run until stopped or finished by hand.
/// Every call is recorded so callers can assert on launch and stop counts.
#[derive(Default)]
pub struct ScriptedLauncher {
    launch_delay: Duration,
    script: Mutex<Script>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes every following launch fail with `reason`, or succeed again on `None`.
    pub fn fail_launches(&self, reason: Option<&str>) {
        self.script().fail_launch = reason.map(str::to_string);
    }

    /// Outcome reported by `stop`, `Success` when unset.
    pub fn set_stop_exit(&self, exit: CaptureExit) {
        self.script().stop_exit = Some(exit);
    }

    /// Makes `stop` never return.
    pub fn hang_on_stop(&self, hang: bool) {
        self.script().hang_on_stop = hang;
    }

    /// Ends a running capture as if the process exited by itself.
    pub fn finish(&self, id: &RecordingId, exit: CaptureExit) {
        if let Some(tx) = self.script().exits.get(id.as_str()) {
            tx.send_if_modified(|current| {
                if current.is_none() {
                    *current = Some(exit);
                    true
                } else {
                    false
                }
            });
        }
    }

    pub fn add_artifact(&self, artifact: CaptureArtifact) {
        self.script().artifacts.push(artifact);
    }

    pub fn launches(&self) -> Vec<RecordingId> {
        self.script().launches.clone()
    }

    pub fn launch_count(&self, id: &RecordingId) -> usize {
        self.script().launches.iter().filter(|l| *l == id).count()
    }

    pub fn stops(&self) -> Vec<String> {
        self.script().stops.clone()
    }

    pub fn stop_count(&self, id: &RecordingId) -> usize {
        self.script()
            .stops
            .iter()
            .filter(|s| s.as_str() == id.as_str())
            .count()
    }

    /// Outcome the capture of `id` was released with.
    pub fn released(&self, id: &RecordingId) -> Option<RecordingState> {
        self.script()
            .releases
            .iter()
            .find(|(h, _)| h.as_str() == id.as_str())
            .map(|(_, outcome)| *outcome)
    }

    /// Captures started and not yet released.
    pub fn live(&self) -> usize {
        self.script().exits.len()
    }
}

#[async_trait]
impl CaptureLauncher for ScriptedLauncher {
    async fn launch(&self, request: CaptureRequest) -> Result<CaptureHandle, LaunchError> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        let mut script = self.script();
        script.launches.push(request.recording.clone());
        if let Some(reason) = script.fail_launch.clone() {
            return Err(LaunchError(reason));
        }
        let handle = CaptureHandle {
            id: request.recording.to_string(),
            output: format!("memory://{}", request.recording),
        };
        let (tx, _) = watch::channel(None);
        script.exits.insert(handle.id.clone(), tx);
        Ok(handle)
    }

    async fn wait(&self, handle: &CaptureHandle) -> CaptureExit {
        let rx = self.script().exits.get(&handle.id).map(|tx| tx.subscribe());
        let Some(mut rx) = rx else {
            return CaptureExit::Error(format!("unknown capture {}", handle.id));
        };
        let exit = match rx.wait_for(|e| e.is_some()).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        };
        exit.unwrap_or_else(|| CaptureExit::Error("capture released".to_string()))
    }

    async fn stop(&self, handle: &CaptureHandle, _grace: Duration) -> CaptureExit {
        let hang = {
            let mut script = self.script();
            script.stops.push(handle.id.clone());
            script.hang_on_stop
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let mut script = self.script();
        let stop_exit = script.stop_exit.clone().unwrap_or(CaptureExit::Success);
        match script.exits.get_mut(&handle.id) {
            Some(tx) => {
                tx.send_if_modified(|current| {
                    if current.is_none() {
                        *current = Some(stop_exit);
                        true
                    } else {
                        false
                    }
                });
                let exit = tx.borrow().clone();
                exit.unwrap_or(CaptureExit::Success)
            }
            None => CaptureExit::Error(format!("unknown capture {}", handle.id)),
        }
    }

    async fn release(&self, handle: &CaptureHandle, outcome: RecordingState) {
        let mut script = self.script();
        script.exits.remove(&handle.id);
        script.releases.push((handle.id.clone(), outcome));
    }

    async fn artifacts(&self) -> anyhow::Result<Vec<CaptureArtifact>> {
        Ok(self.script().artifacts.clone())
    }
}
