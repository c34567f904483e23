use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use api::recorder::{HistoryRecord, RecordingState};
use api::request::ScheduleRecording;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{AutoRule, SchedulerConfig};
use crate::error::{CancelError, ScheduleError};
use crate::guide::GuideProvider;
use crate::history::{self, HistoryStore};
use crate::hook::Event;
use crate::launcher::CaptureLauncher;
use crate::metrics;
use crate::new_broadcast_channel;
use crate::recording::{Recording, RecordingId};
use crate::registry::Registry;

mod request;
mod tick;

pub use request::canonicalize;
use tick::Signal;

/// Owns the lifecycle of every recording.
///
/// Creation happens in [`Scheduler::schedule`]; every later state change is
/// applied by the reconciliation loop (or a direct [`Scheduler::tick`]).
/// Capture launcher calls run in spawned tasks and report back as signals,
/// so the registry lock is never held across them.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    rules: Vec<AutoRule>,
    catalog: Arc<Catalog>,
    guide: Arc<dyn GuideProvider>,
    launcher: Arc<dyn CaptureLauncher>,
    history: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    registry: Registry,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: Mutex<mpsc::UnboundedReceiver<Signal>>,
    wake: Notify,
    event_sender: broadcast::Sender<Event>,
    /// Terminal ids with their window stop, so auto rules do not revive them
    finished: StdMutex<HashMap<RecordingId, DateTime<Utc>>>,
}

pub struct SchedulerBuilder {
    config: SchedulerConfig,
    rules: Vec<AutoRule>,
    catalog: Arc<Catalog>,
    guide: Arc<dyn GuideProvider>,
    launcher: Arc<dyn CaptureLauncher>,
    history: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rules(mut self, rules: Vec<AutoRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Scheduler {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Scheduler {
            inner: Arc::new(Inner {
                config: self.config,
                rules: self.rules,
                catalog: self.catalog,
                guide: self.guide,
                launcher: self.launcher,
                history: self.history,
                clock: self.clock,
                registry: Registry::default(),
                signal_tx,
                signal_rx: Mutex::new(signal_rx),
                wake: Notify::new(),
                event_sender: new_broadcast_channel!(64),
                finished: StdMutex::new(HashMap::new()),
            }),
        }
    }
}

impl Scheduler {
    pub fn builder(
        catalog: Arc<Catalog>,
        guide: Arc<dyn GuideProvider>,
        launcher: Arc<dyn CaptureLauncher>,
        history: Arc<dyn HistoryStore>,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            config: SchedulerConfig::default(),
            rules: vec![],
            catalog,
            guide,
            launcher,
            history,
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates the recording a request describes, or returns the live one
    /// already carrying the same id.
    pub async fn schedule(&self, req: ScheduleRecording) -> Result<Recording, ScheduleError> {
        let now = self.inner.clock.now();
        let new = canonicalize(
            &self.inner.catalog,
            self.inner.guide.as_ref(),
            req,
            self.inner.config.timezone(),
            now,
        )
        .await?;
        let recording = Recording::pending(new, now).ok_or_else(|| {
            ScheduleError::InvalidWindow("window is empty".to_string())
        })?;
        let (recording, created) = self.inner.registry.insert_if_absent(recording).await;
        if created {
            metrics::created();
            info!(
                "[scheduler] scheduled {} \"{}\" {} .. {}",
                recording.id,
                recording.title,
                recording.start.to_rfc3339(),
                recording.stop.to_rfc3339()
            );
            self.inner.wake.notify_one();
        }
        Ok(recording)
    }

    /// Marks a live recording for cancellation. The loop applies it: a
    /// Pending recording ends without launching, a capturing one is stopped
    /// gracefully first.
    pub async fn cancel(&self, id: &RecordingId) -> Result<(), CancelError> {
        {
            let mut map = self.inner.registry.lock().await;
            let recording = map
                .get_mut(id)
                .ok_or_else(|| CancelError::NotFound(id.clone()))?;
            if recording.cancel_requested {
                return Ok(());
            }
            recording.cancel_requested = true;
        }
        info!("[scheduler] cancel requested for {}", id);
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Recordings holding a capture slot, ordered by start.
    pub async fn list_active(&self) -> Vec<Recording> {
        self.inner
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(Recording::is_capturing)
            .collect()
    }

    /// Recordings waiting for their window, ordered by start.
    pub async fn list_scheduled(&self) -> Vec<Recording> {
        self.inner
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.state == RecordingState::Pending)
            .collect()
    }

    pub async fn list_history(&self) -> Vec<HistoryRecord> {
        self.inner.history.list().await
    }

    pub async fn get(&self, id: &RecordingId) -> Option<Recording> {
        self.inner.registry.get(id).await
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn subscribe_event(&self) -> broadcast::Receiver<Event> {
        self.inner.event_sender.subscribe()
    }

    /// Runs the reconciliation loop until the task is aborted.
    pub fn spawn(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.inner.config.poll_period());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "[scheduler] reconciling every {:?}",
            self.inner.config.poll_period()
        );
        loop {
            let mut rx = self.inner.signal_rx.lock().await;
            let signal = tokio::select! {
                _ = interval.tick() => None,
                _ = self.inner.wake.notified() => None,
                signal = rx.recv() => signal,
            };
            drop(rx);
            match signal {
                Some(signal) => self.apply(signal).await,
                None => self.tick().await,
            }
        }
    }

    /// Periodically backfills history from capture artifacts nobody recorded.
    pub fn spawn_history_reconcile(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                match history::reconcile(
                    inner.launcher.as_ref(),
                    inner.history.as_ref(),
                    &inner.registry,
                )
                .await
                {
                    Ok(0) => {}
                    Ok(added) => info!("[history] reconcile added {} records", added),
                    Err(e) => warn!("[history] reconcile failed: {}", e),
                }
                tokio::time::sleep(inner.config.reconcile_period()).await;
            }
        })
    }

    /// Stops every capture still running. Call after the loop is aborted;
    /// their recordings end as Failed.
    pub async fn shutdown(&self) {
        let now = self.inner.clock.now();
        let mut transitions = vec![];
        let mut handles = vec![];
        {
            let mut map = self.inner.registry.lock().await;
            let ids: Vec<RecordingId> = map
                .values()
                .filter(|r| r.is_capturing())
                .map(|r| r.id.clone())
                .collect();
            for id in ids {
                let Some(mut recording) = map.remove(&id) else {
                    continue;
                };
                match recording.fail("interrupted by shutdown", false, now) {
                    Ok(t) => transitions.push(t),
                    Err(e) => error!("[scheduler] {}", e),
                }
                if let Some(handle) = recording.handle.take() {
                    handles.push(handle);
                }
            }
        }
        self.publish(transitions);

        let mut tasks = tokio::task::JoinSet::new();
        for handle in handles {
            let launcher = self.inner.launcher.clone();
            let grace = self.inner.config.grace_period();
            tasks.spawn(async move {
                let exit = launcher.stop(&handle, grace).await;
                launcher.release(&handle, RecordingState::Failed).await;
                (handle.id, exit)
            });
        }
        while let Some(res) = tasks.join_next().await {
            if let Ok((id, exit)) = res {
                info!("[scheduler] capture {} stopped on shutdown: {:?}", id, exit);
            }
        }
    }
}
