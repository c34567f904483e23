#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::oneshot;

use recman::catalog::{Catalog, Channel};
use recman::clock::ManualClock;
use recman::config::{AutoRule, SchedulerConfig};
use recman::guide::{GuideError, GuideProvider, ProgramWindow, StaticGuide};
use recman::history::HistoryIndex;
use recman::launcher::ScriptedLauncher;
use recman::scheduler::Scheduler;

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
}

pub fn catalog() -> Catalog {
    Catalog::new(vec![
        Channel {
            id: "bbc1".to_string(),
            number: 101,
            name: "BBC One".to_string(),
            stream: "http://127.0.0.1:9/bbc1.ts".to_string(),
        },
        Channel {
            id: "itv".to_string(),
            number: 103,
            name: "ITV".to_string(),
            stream: "http://127.0.0.1:9/itv.ts".to_string(),
        },
    ])
    .unwrap()
}

pub fn programs() -> Vec<ProgramWindow> {
    vec![
        ProgramWindow {
            channel: "bbc1".to_string(),
            start: at(10, 0, 0),
            stop: at(10, 30, 0),
            title: "News".to_string(),
            description: "Morning headlines".to_string(),
        },
        ProgramWindow {
            channel: "bbc1".to_string(),
            start: at(10, 30, 0),
            stop: at(11, 0, 0),
            title: "Quiz".to_string(),
            description: String::new(),
        },
        ProgramWindow {
            channel: "itv".to_string(),
            start: at(10, 0, 0),
            stop: at(11, 0, 0),
            title: "Film".to_string(),
            description: String::new(),
        },
    ]
}

/// Short periods so loop-driven tests finish in seconds.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_period_secs: 1,
        grace_period_secs: 1,
        sweep_timeout_secs: 3,
        ..Default::default()
    }
}

/// A guide whose backing service is down.
pub struct DownGuide;

#[async_trait]
impl GuideProvider for DownGuide {
    async fn programs(&self, _channel: &str) -> Result<Vec<ProgramWindow>, GuideError> {
        Err(GuideError::Unavailable("guide service unreachable".to_string()))
    }
}

pub struct Fixture {
    pub scheduler: Scheduler,
    pub launcher: Arc<ScriptedLauncher>,
    pub history: Arc<HistoryIndex>,
    pub clock: Arc<ManualClock>,
}

pub struct FixtureBuilder {
    config: SchedulerConfig,
    rules: Vec<AutoRule>,
    launcher: ScriptedLauncher,
    guide: Arc<dyn GuideProvider>,
    now: DateTime<Utc>,
}

impl FixtureBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rules(mut self, rules: Vec<AutoRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn launcher(mut self, launcher: ScriptedLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn guide(mut self, guide: Arc<dyn GuideProvider>) -> Self {
        self.guide = guide;
        self
    }

    pub fn now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn build(self) -> Fixture {
        let launcher = Arc::new(self.launcher);
        let history = Arc::new(HistoryIndex::memory());
        let clock = Arc::new(ManualClock::new(self.now));
        let scheduler = Scheduler::builder(
            Arc::new(catalog()),
            self.guide,
            launcher.clone(),
            history.clone(),
        )
        .config(self.config)
        .rules(self.rules)
        .clock(clock.clone())
        .build();
        Fixture {
            scheduler,
            launcher,
            history,
            clock,
        }
    }
}

pub fn fixture() -> FixtureBuilder {
    FixtureBuilder {
        config: fast_config(),
        rules: vec![],
        launcher: ScriptedLauncher::new(),
        guide: Arc::new(StaticGuide::new(programs())),
        now: at(9, 59, 0),
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A shutdown future and the trigger that resolves it.
pub fn shutdown_signal() -> (oneshot::Sender<()>, impl Future<Output = ()> + Send + 'static) {
    let (tx, rx) = oneshot::channel::<()>();
    (tx, async move {
        let _ = rx.await;
    })
}
