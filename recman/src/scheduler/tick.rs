use api::recorder::{HistoryRecord, RecordingState};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::Scheduler;
use crate::hook::Event;
use crate::launcher::{CaptureExit, CaptureHandle, CaptureRequest, LaunchError};
use crate::metrics;
use crate::recording::{
    Failure, IllegalTransition, NewRecording, Recording, RecordingId, Transition,
};
use crate::registry::Entries;

/// Results of launcher calls made outside the registry lock.
#[derive(Debug)]
pub(super) enum Signal {
    Launched {
        id: RecordingId,
        handle: CaptureHandle,
    },
    LaunchFailed {
        id: RecordingId,
        error: LaunchError,
    },
    Exited {
        id: RecordingId,
        exit: CaptureExit,
    },
}

/// Work that must wait until the registry lock is released.
enum Followup {
    Launch(CaptureRequest),
    Watch(RecordingId, CaptureHandle),
    Stop(RecordingId, CaptureHandle),
    /// A capture nobody owns any more
    StopOrphan(CaptureHandle),
    Release(CaptureHandle, RecordingState),
    History(HistoryRecord),
}

#[derive(Default)]
struct Outcome {
    transitions: Vec<Transition>,
    followups: Vec<Followup>,
    finished: Vec<(RecordingId, DateTime<Utc>)>,
}

impl Outcome {
    fn record(&mut self, result: Result<Transition, IllegalTransition>) -> bool {
        match result {
            Ok(transition) => {
                self.transitions.push(transition);
                true
            }
            Err(e) => {
                error!("[scheduler] {}", e);
                false
            }
        }
    }
}

impl Scheduler {
    /// One reconciliation pass: apply pending launcher signals, merge guide
    /// rule candidates, launch due recordings, stop those past their window
    /// or canceled, then fail recordings stuck in a transient state.
    pub async fn tick(&self) {
        let mut signals = vec![];
        {
            let mut rx = self.inner.signal_rx.lock().await;
            while let Ok(signal) = rx.try_recv() {
                signals.push(signal);
            }
        }
        for signal in signals {
            self.apply(signal).await;
        }

        let now = self.inner.clock.now();
        self.merge_rules(now).await;

        let mut out = Outcome::default();
        {
            let mut map = self.inner.registry.lock().await;
            self.start_due(&mut map, now, &mut out);
            self.stop_due(&mut map, now, &mut out);
            self.sweep(&mut map, now, &mut out);
        }
        self.finish(out).await;
        self.prune_finished(now);
    }

    pub(super) async fn apply(&self, signal: Signal) {
        let now = self.inner.clock.now();
        let mut out = Outcome::default();
        {
            let mut map = self.inner.registry.lock().await;
            match signal {
                Signal::Launched { id, handle } => {
                    self.on_launched(&mut map, id, handle, now, &mut out)
                }
                Signal::LaunchFailed { id, error } => {
                    self.on_launch_failed(&mut map, id, error, now, &mut out)
                }
                Signal::Exited { id, exit } => self.on_exited(&mut map, id, exit, now, &mut out),
            }
        }
        self.finish(out).await;
    }

    async fn merge_rules(&self, now: DateTime<Utc>) {
        if self.inner.rules.is_empty() {
            return;
        }
        let horizon = now + self.inner.config.lookahead();
        for rule in self.inner.rules.iter() {
            let Some(channel) = self.inner.catalog.resolve(&rule.channel) else {
                warn!("[scheduler] auto rule names unknown channel {}", rule.channel);
                continue;
            };
            let windows = match self.inner.guide.programs(&channel.id).await {
                Ok(windows) => windows,
                Err(e) => {
                    warn!("[scheduler] auto rule for {} skipped: {}", channel.id, e);
                    continue;
                }
            };
            for window in windows {
                if !window.is_valid()
                    || window.stop <= now
                    || window.start > horizon
                    || !rule.matches(&window.title)
                {
                    continue;
                }
                let id = RecordingId::derive(&channel.id, window.start);
                if self.is_finished(&id) {
                    continue;
                }
                let new = NewRecording {
                    channel: channel.id.clone(),
                    stream: channel.stream.clone(),
                    title: window.title,
                    description: window.description,
                    start: window.start,
                    stop: window.stop,
                };
                let Some(recording) = Recording::pending(new, now) else {
                    continue;
                };
                let (recording, created) = self.inner.registry.insert_if_absent(recording).await;
                if created {
                    metrics::created();
                    info!(
                        "[scheduler] auto rule scheduled {} \"{}\"",
                        recording.id, recording.title
                    );
                }
            }
        }
    }

    fn start_due(&self, map: &mut Entries, now: DateTime<Utc>, out: &mut Outcome) {
        let max = self.inner.config.max_concurrent;
        let mut capturing = map.values().filter(|r| r.is_capturing()).count();
        let mut due: Vec<(DateTime<Utc>, RecordingId)> = map
            .values()
            .filter(|r| {
                r.state == RecordingState::Pending
                    && (r.cancel_requested || r.start <= now || r.stop <= now)
            })
            .map(|r| (r.start, r.id.clone()))
            .collect();
        due.sort();

        for (_, id) in due {
            let Some(recording) = map.get_mut(&id) else {
                continue;
            };
            if recording.cancel_requested {
                out.record(recording.transition(RecordingState::Canceled, now));
                self.retire(map, &id, out);
                continue;
            }
            if recording.stop <= now {
                let result = if recording.stop <= recording.created_at {
                    recording.transition(RecordingState::Completed, now)
                } else if recording.waited_for_slot {
                    recording.fail("no capture slot freed before the window ended", false, now)
                } else {
                    recording.fail("window elapsed before launch", false, now)
                };
                out.record(result);
                self.retire(map, &id, out);
                continue;
            }
            if max > 0 && capturing >= max {
                if !recording.waited_for_slot {
                    recording.waited_for_slot = true;
                    warn!(
                        "[scheduler] {} waiting for a capture slot, {} of {} in use",
                        id, capturing, max
                    );
                }
                continue;
            }
            if out.record(recording.transition(RecordingState::Starting, now)) {
                capturing += 1;
                out.followups.push(Followup::Launch(CaptureRequest {
                    recording: recording.id.clone(),
                    channel: recording.channel.clone(),
                    title: recording.title.clone(),
                    description: recording.description.clone(),
                    stream: recording.stream.clone(),
                    start: now,
                    stop: recording.stop,
                    duration: (recording.stop - now).to_std().unwrap_or_default(),
                }));
            }
        }
    }

    fn stop_due(&self, map: &mut Entries, now: DateTime<Utc>, out: &mut Outcome) {
        for recording in map.values_mut() {
            if recording.state != RecordingState::Active
                || !(recording.cancel_requested || now >= recording.stop)
            {
                continue;
            }
            let Some(handle) = recording.handle.clone() else {
                error!("[scheduler] {} is active without a capture", recording.id);
                continue;
            };
            if out.record(recording.transition(RecordingState::Stopping, now)) {
                out.followups
                    .push(Followup::Stop(recording.id.clone(), handle));
            }
        }
    }

    fn sweep(&self, map: &mut Entries, now: DateTime<Utc>, out: &mut Outcome) {
        let timeout = self.inner.config.sweep_timeout();
        let secs = timeout.num_seconds();
        let stuck: Vec<RecordingId> = map
            .values()
            .filter(|r| {
                matches!(
                    r.state,
                    RecordingState::Starting | RecordingState::Stopping
                ) && now - r.state_since > timeout
            })
            .map(|r| r.id.clone())
            .collect();

        for id in stuck {
            let Some(recording) = map.get_mut(&id) else {
                continue;
            };
            let reason = format!("stuck in {} for more than {}s", recording.state, secs);
            warn!("[scheduler] {} {}", id, reason);
            // a pending cancel still decides the terminal state
            if recording.cancel_requested {
                if out.record(recording.transition(RecordingState::Canceled, now)) {
                    recording.failure = Some(Failure { reason, stuck: true });
                }
            } else {
                out.record(recording.fail(reason, true, now));
            }
            self.retire(map, &id, out);
        }
    }

    fn on_launched(
        &self,
        map: &mut Entries,
        id: RecordingId,
        handle: CaptureHandle,
        now: DateTime<Utc>,
        out: &mut Outcome,
    ) {
        let Some(recording) = map
            .get_mut(&id)
            .filter(|r| r.state == RecordingState::Starting)
        else {
            warn!(
                "[scheduler] capture {} came up after {} left Starting, stopping it",
                handle.id, id
            );
            out.followups.push(Followup::StopOrphan(handle));
            return;
        };
        recording.handle = Some(handle.clone());
        if !out.record(recording.transition(RecordingState::Active, now)) {
            return;
        }
        info!("[scheduler] {} capturing to {}", id, handle.output);
        if recording.cancel_requested || now >= recording.stop {
            if out.record(recording.transition(RecordingState::Stopping, now)) {
                out.followups.push(Followup::Stop(id, handle));
            }
        } else {
            out.followups.push(Followup::Watch(id, handle));
        }
    }

    fn on_launch_failed(
        &self,
        map: &mut Entries,
        id: RecordingId,
        error: LaunchError,
        now: DateTime<Utc>,
        out: &mut Outcome,
    ) {
        let Some(recording) = map
            .get_mut(&id)
            .filter(|r| r.state == RecordingState::Starting)
        else {
            debug!("[scheduler] late launch failure for {}: {}", id, error);
            return;
        };
        error!("[scheduler] {} {}", id, error);
        let result = if recording.cancel_requested {
            recording.transition(RecordingState::Canceled, now)
        } else {
            recording.fail(error.0, false, now)
        };
        out.record(result);
        self.retire(map, &id, out);
    }

    fn on_exited(
        &self,
        map: &mut Entries,
        id: RecordingId,
        exit: CaptureExit,
        now: DateTime<Utc>,
        out: &mut Outcome,
    ) {
        let Some(recording) = map.get_mut(&id) else {
            return;
        };
        match recording.state {
            RecordingState::Active => {
                info!("[scheduler] {} capture exited on its own: {:?}", id, exit);
                if !out.record(recording.transition(RecordingState::Stopping, now)) {
                    return;
                }
            }
            RecordingState::Stopping => {}
            _ => return,
        }
        let result = if recording.cancel_requested {
            recording.transition(RecordingState::Canceled, now)
        } else {
            match exit {
                CaptureExit::Success => recording.transition(RecordingState::Completed, now),
                CaptureExit::Error(reason) => recording.fail(reason, false, now),
                CaptureExit::Killed => recording.fail(
                    "capture did not exit within the grace period",
                    false,
                    now,
                ),
            }
        };
        out.record(result);
        self.retire(map, &id, out);
    }

    /// Removes a terminal recording and queues what its end requires.
    fn retire(&self, map: &mut Entries, id: &RecordingId, out: &mut Outcome) {
        let Some(recording) = map.remove(id) else {
            return;
        };
        if let Some(failure) = recording.failure.as_ref() {
            warn!("[scheduler] {} {}: {}", id, recording.state, failure.reason);
        }
        if recording.state == RecordingState::Completed {
            out.followups
                .push(Followup::History(history_record(&recording)));
        }
        if let Some(handle) = recording.handle {
            out.followups.push(Followup::Release(handle, recording.state));
        }
        out.finished.push((recording.id, recording.stop));
    }

    async fn finish(&self, out: Outcome) {
        self.publish(out.transitions);
        if !out.finished.is_empty() {
            let mut finished = self
                .inner
                .finished
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            finished.extend(out.finished);
        }

        for followup in out.followups {
            match followup {
                Followup::Launch(request) => {
                    let launcher = self.inner.launcher.clone();
                    let tx = self.inner.signal_tx.clone();
                    tokio::spawn(async move {
                        let id = request.recording.clone();
                        let signal = match launcher.launch(request).await {
                            Ok(handle) => Signal::Launched { id, handle },
                            Err(error) => Signal::LaunchFailed { id, error },
                        };
                        let _ = tx.send(signal);
                    });
                }
                Followup::Watch(id, handle) => {
                    let launcher = self.inner.launcher.clone();
                    let tx = self.inner.signal_tx.clone();
                    tokio::spawn(async move {
                        let exit = launcher.wait(&handle).await;
                        let _ = tx.send(Signal::Exited { id, exit });
                    });
                }
                Followup::Stop(id, handle) => {
                    let launcher = self.inner.launcher.clone();
                    let tx = self.inner.signal_tx.clone();
                    let grace = self.inner.config.grace_period();
                    tokio::spawn(async move {
                        let exit = launcher.stop(&handle, grace).await;
                        let _ = tx.send(Signal::Exited { id, exit });
                    });
                }
                Followup::StopOrphan(handle) => {
                    let launcher = self.inner.launcher.clone();
                    let grace = self.inner.config.grace_period();
                    tokio::spawn(async move {
                        let exit = launcher.stop(&handle, grace).await;
                        launcher.release(&handle, RecordingState::Failed).await;
                        info!("[scheduler] orphan capture {} stopped: {:?}", handle.id, exit);
                    });
                }
                Followup::Release(handle, outcome) => {
                    self.inner.launcher.release(&handle, outcome).await
                }
                Followup::History(record) => {
                    let id = record.id.clone();
                    match self.inner.history.insert(record).await {
                        Ok(true) => debug!("[history] recorded {}", id),
                        Ok(false) => debug!("[history] {} already recorded", id),
                        Err(e) => error!("[history] failed to record {}: {}", id, e),
                    }
                }
            }
        }
    }

    pub(super) fn publish(&self, transitions: Vec<Transition>) {
        for transition in transitions {
            metrics::observe(&transition);
            info!(
                "[scheduler] {} {} -> {}",
                transition.id, transition.from, transition.to
            );
            let _ = self
                .inner
                .event_sender
                .send(Event::Recording(transition));
        }
    }

    fn is_finished(&self, id: &RecordingId) -> bool {
        self.inner
            .finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    fn prune_finished(&self, now: DateTime<Utc>) {
        self.inner
            .finished
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, stop| *stop > now);
    }
}

fn history_record(recording: &Recording) -> HistoryRecord {
    HistoryRecord {
        id: recording.id.to_string(),
        channel: recording.channel.clone(),
        title: recording.title.clone(),
        actual_start: recording.started_at.unwrap_or(recording.state_since),
        actual_stop: recording.stopped_at,
        output: recording.handle.as_ref().map(|h| h.output.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use api::request::ScheduleRecording;
    use chrono::{Duration, TimeZone};
    use tokio::sync::broadcast;

    use super::*;
    use crate::catalog::{Catalog, Channel};
    use crate::clock::{Clock, ManualClock};
    use crate::config::{AutoRule, SchedulerConfig};
    use crate::guide::{ProgramWindow, StaticGuide};
    use crate::history::{HistoryIndex, HistoryStore};
    use crate::launcher::ScriptedLauncher;

    struct Harness {
        scheduler: Scheduler,
        launcher: Arc<ScriptedLauncher>,
        history: Arc<HistoryIndex>,
        clock: Arc<ManualClock>,
        guide: Arc<StaticGuide>,
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap()
    }

    fn harness(config: SchedulerConfig, rules: Vec<AutoRule>) -> Harness {
        let catalog = Catalog::new(vec![
            Channel {
                id: "bbc1".to_string(),
                number: 101,
                name: "BBC One".to_string(),
                stream: "http://s/bbc1".to_string(),
            },
            Channel {
                id: "itv".to_string(),
                number: 103,
                name: "ITV".to_string(),
                stream: "http://s/itv".to_string(),
            },
        ])
        .unwrap();
        let guide = Arc::new(StaticGuide::new(vec![
            ProgramWindow {
                channel: "bbc1".to_string(),
                start: at(10, 0),
                stop: at(10, 30),
                title: "News".to_string(),
                description: String::new(),
            },
            ProgramWindow {
                channel: "bbc1".to_string(),
                start: at(10, 30),
                stop: at(11, 0),
                title: "Quiz".to_string(),
                description: String::new(),
            },
        ]));
        let launcher = Arc::new(ScriptedLauncher::new());
        let history = Arc::new(HistoryIndex::memory());
        let clock = Arc::new(ManualClock::new(at(9, 59)));
        let scheduler = Scheduler::builder(
            Arc::new(catalog),
            guide.clone(),
            launcher.clone(),
            history.clone(),
        )
        .config(config)
        .rules(rules)
        .clock(clock.clone())
        .build();
        Harness {
            scheduler,
            launcher,
            history,
            clock,
            guide,
        }
    }

    fn window(channel: &str, start: DateTime<Utc>, stop: DateTime<Utc>) -> ScheduleRecording {
        ScheduleRecording {
            channel: channel.to_string(),
            start: Some(start.into()),
            stop: Some(stop.into()),
            title: Some("manual".to_string()),
            description: None,
        }
    }

    /// Ticks until spawned launcher calls have reported back.
    async fn settle(scheduler: &Scheduler) {
        for _ in 0..5 {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            scheduler.tick().await;
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<(RecordingState, RecordingState)> {
        let mut seen = vec![];
        while let Ok(Event::Recording(t)) = rx.try_recv() {
            seen.push((t.from, t.to));
        }
        seen
    }

    #[tokio::test]
    async fn test_full_lifecycle_completes_once() {
        let h = harness(SchedulerConfig::default(), vec![]);
        let mut events = h.scheduler.subscribe_event();
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();

        settle(&h.scheduler).await;
        assert_eq!(h.launcher.launch_count(&rec.id), 0);
        assert_eq!(h.scheduler.list_scheduled().await.len(), 1);

        h.clock.set(at(10, 0));
        settle(&h.scheduler).await;
        let active = h.scheduler.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].state, RecordingState::Active);

        h.clock.set(at(10, 30));
        settle(&h.scheduler).await;
        assert!(h.scheduler.registry().is_empty().await);
        assert_eq!(h.launcher.launch_count(&rec.id), 1);
        assert_eq!(h.launcher.stop_count(&rec.id), 1);
        assert_eq!(h.launcher.live(), 0);

        use RecordingState::*;
        assert_eq!(
            drain(&mut events),
            vec![
                (Pending, Starting),
                (Starting, Active),
                (Active, Stopping),
                (Stopping, Completed)
            ]
        );
        let history = h.history.list().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, rec.id.to_string());
        assert_eq!(history[0].actual_start, at(10, 0));
        assert_eq!(history[0].actual_stop, Some(at(10, 30)));
        assert_eq!(h.launcher.released(&rec.id), Some(Completed));
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let h = harness(SchedulerConfig::default(), vec![]);
        h.clock.set(at(10, 15));
        let req = ScheduleRecording {
            channel: "bbc1".to_string(),
            ..Default::default()
        };
        let a = h.scheduler.schedule(req.clone()).await.unwrap();
        h.clock.set(at(10, 16));
        let b = h.scheduler.schedule(req).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.as_str(), "bbc1-20261019T100000Z");
        assert_eq!(h.scheduler.registry().len().await, 1);

        settle(&h.scheduler).await;
        assert_eq!(h.launcher.launch_count(&a.id), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_never_launches() {
        let h = harness(SchedulerConfig::default(), vec![]);
        let mut events = h.scheduler.subscribe_event();
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();
        h.scheduler.cancel(&rec.id).await.unwrap();
        h.clock.set(at(10, 0));
        settle(&h.scheduler).await;

        assert_eq!(h.launcher.launch_count(&rec.id), 0);
        assert!(h.scheduler.get(&rec.id).await.is_none());
        assert_eq!(
            drain(&mut events),
            vec![(RecordingState::Pending, RecordingState::Canceled)]
        );
        assert!(h.history.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_active_stops_once() {
        let h = harness(SchedulerConfig::default(), vec![]);
        h.clock.set(at(10, 0));
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();
        settle(&h.scheduler).await;
        assert_eq!(h.scheduler.list_active().await.len(), 1);

        h.scheduler.cancel(&rec.id).await.unwrap();
        h.scheduler.cancel(&rec.id).await.unwrap();
        settle(&h.scheduler).await;

        assert!(h.scheduler.get(&rec.id).await.is_none());
        assert_eq!(h.launcher.stop_count(&rec.id), 1);
        assert!(h.history.list().await.is_empty());
        assert_eq!(h.launcher.released(&rec.id), Some(RecordingState::Canceled));
        assert_eq!(
            h.scheduler.cancel(&rec.id).await,
            Err(crate::error::CancelError::NotFound(rec.id.clone()))
        );
    }

    #[tokio::test]
    async fn test_elapsed_window_skips_launch() {
        let h = harness(SchedulerConfig::default(), vec![]);
        h.clock.set(at(12, 0));
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();
        settle(&h.scheduler).await;

        assert_eq!(h.launcher.launch_count(&rec.id), 0);
        assert!(h.scheduler.registry().is_empty().await);
        let history = h.history.list().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].output.is_none());
        assert!(history[0].actual_stop.is_none());
    }

    #[tokio::test]
    async fn test_launch_failure_fails_recording() {
        let h = harness(SchedulerConfig::default(), vec![]);
        h.launcher.fail_launches(Some("no such stream"));
        let mut events = h.scheduler.subscribe_event();
        h.clock.set(at(10, 0));
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();
        settle(&h.scheduler).await;

        assert!(h.scheduler.get(&rec.id).await.is_none());
        assert_eq!(h.launcher.launch_count(&rec.id), 1);
        assert_eq!(
            drain(&mut events),
            vec![
                (RecordingState::Pending, RecordingState::Starting),
                (RecordingState::Starting, RecordingState::Failed)
            ]
        );
    }

    #[tokio::test]
    async fn test_unsolicited_exit_while_active() {
        let h = harness(SchedulerConfig::default(), vec![]);
        let mut events = h.scheduler.subscribe_event();
        h.clock.set(at(10, 0));
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();
        settle(&h.scheduler).await;
        h.launcher
            .finish(&rec.id, CaptureExit::Error("stream lost".to_string()));
        settle(&h.scheduler).await;

        assert!(h.scheduler.get(&rec.id).await.is_none());
        assert_eq!(h.launcher.stop_count(&rec.id), 0);
        let seen = drain(&mut events);
        assert_eq!(
            seen.last(),
            Some(&(RecordingState::Stopping, RecordingState::Failed))
        );
        assert!(h.history.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_fails_stuck_stop() {
        let config = SchedulerConfig {
            grace_period_secs: 1,
            sweep_timeout_secs: 5,
            ..Default::default()
        };
        let h = harness(config, vec![]);
        h.launcher.hang_on_stop(true);
        h.clock.set(at(10, 0));
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 1)))
            .await
            .unwrap();
        settle(&h.scheduler).await;

        h.clock.set(at(10, 1));
        settle(&h.scheduler).await;
        let stuck = h.scheduler.get(&rec.id).await.unwrap();
        assert_eq!(stuck.state, RecordingState::Stopping);

        let mut events = h.scheduler.subscribe_event();
        h.clock.advance(Duration::seconds(6));
        h.scheduler.tick().await;
        assert!(h.scheduler.get(&rec.id).await.is_none());
        match events.try_recv() {
            Ok(Event::Recording(t)) => {
                assert_eq!((t.from, t.to), (RecordingState::Stopping, RecordingState::Failed))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_cancel_of_stuck_stop() {
        let config = SchedulerConfig {
            grace_period_secs: 1,
            sweep_timeout_secs: 5,
            ..Default::default()
        };
        let h = harness(config, vec![]);
        h.launcher.hang_on_stop(true);
        h.clock.set(at(10, 0));
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();
        settle(&h.scheduler).await;
        h.scheduler.cancel(&rec.id).await.unwrap();
        settle(&h.scheduler).await;
        assert_eq!(
            h.scheduler.get(&rec.id).await.unwrap().state,
            RecordingState::Stopping
        );

        let mut events = h.scheduler.subscribe_event();
        h.clock.advance(Duration::seconds(6));
        h.scheduler.tick().await;
        assert!(h.scheduler.get(&rec.id).await.is_none());
        assert_eq!(
            drain(&mut events),
            vec![(RecordingState::Stopping, RecordingState::Canceled)]
        );
        assert_eq!(h.launcher.released(&rec.id), Some(RecordingState::Canceled));
        assert!(h.history.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_slot_limit_defers_and_fails_starved() {
        let config = SchedulerConfig {
            max_concurrent: 1,
            ..Default::default()
        };
        let h = harness(config, vec![]);
        h.clock.set(at(10, 0));
        let first = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();
        let second = h
            .scheduler
            .schedule(window("itv", at(10, 0), at(10, 10)))
            .await
            .unwrap();
        settle(&h.scheduler).await;
        assert_eq!(h.launcher.launch_count(&first.id), 1);
        assert_eq!(h.launcher.launch_count(&second.id), 0);
        assert!(h.scheduler.get(&second.id).await.unwrap().waited_for_slot);

        h.clock.set(at(10, 10));
        settle(&h.scheduler).await;
        assert!(h.scheduler.get(&second.id).await.is_none());
        assert_eq!(h.launcher.launch_count(&second.id), 0);
        assert_eq!(h.scheduler.list_active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_rule_schedules_matching_programs() {
        let rules = vec![AutoRule {
            channel: "bbc1".to_string(),
            title: "Qu*".to_string(),
        }];
        let h = harness(SchedulerConfig::default(), rules);
        h.clock.set(at(10, 29) + Duration::seconds(30));
        h.scheduler.tick().await;
        let scheduled = h.scheduler.list_scheduled().await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].title, "Quiz");

        h.scheduler.cancel(&scheduled[0].id).await.unwrap();
        settle(&h.scheduler).await;
        assert!(h.scheduler.registry().is_empty().await);

        h.clock.set(at(10, 31));
        settle(&h.scheduler).await;
        assert!(h.scheduler.registry().is_empty().await);
        assert_eq!(h.launcher.launches().len(), 0);
    }

    #[tokio::test]
    async fn test_auto_rule_with_empty_guide() {
        let rules = vec![AutoRule {
            channel: "101".to_string(),
            title: "*".to_string(),
        }];
        let h = harness(SchedulerConfig::default(), rules);
        h.guide.replace(vec![]);
        h.clock.set(at(10, 0));
        settle(&h.scheduler).await;
        assert!(h.scheduler.registry().is_empty().await);
        assert!(h.launcher.launches().is_empty());
    }

    #[tokio::test]
    async fn test_late_launch_after_sweep_is_stopped() {
        let config = SchedulerConfig {
            grace_period_secs: 1,
            sweep_timeout_secs: 5,
            ..Default::default()
        };
        let h = harness(config, vec![]);
        h.clock.set(at(10, 0));
        let rec = h
            .scheduler
            .schedule(window("bbc1", at(10, 0), at(10, 30)))
            .await
            .unwrap();
        // move to Starting without letting the launch report back
        h.scheduler.tick().await;
        assert_eq!(
            h.scheduler.get(&rec.id).await.unwrap().state,
            RecordingState::Starting
        );
        h.clock.advance(Duration::seconds(6));
        {
            let mut rx = h.scheduler.inner.signal_rx.lock().await;
            // the launch task has had no chance to run yet
            assert!(rx.try_recv().is_err());
        }
        let mut map = h.scheduler.inner.registry.lock().await;
        let mut out = Outcome::default();
        h.scheduler.sweep(&mut map, h.clock.now(), &mut out);
        drop(map);
        h.scheduler.finish(out).await;
        assert!(h.scheduler.get(&rec.id).await.is_none());

        settle(&h.scheduler).await;
        assert_eq!(h.launcher.launch_count(&rec.id), 1);
        assert_eq!(h.launcher.stop_count(&rec.id), 1);
        assert_eq!(h.launcher.live(), 0);
    }
}
