use std::{env, fs, net::SocketAddr, str::FromStr, time::Duration};

use chrono_tz::Tz;
use glob::Pattern;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub guide: GuideConfig,
    /// Guide rules that schedule recordings without a request
    #[serde(default)]
    pub auto: Vec<AutoRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Reconciliation loop period, the scheduling granularity
    #[serde(default = "default_poll_period_secs")]
    pub poll_period_secs: u64,
    /// Time a capture is given to exit after a stop request before it is killed
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Longest time a recording may stay in Starting or Stopping
    #[serde(default = "default_sweep_timeout_secs")]
    pub sweep_timeout_secs: u64,
    /// Concurrent capture slots, 0 means unlimited
    #[serde(default)]
    pub max_concurrent: usize,
    /// Period of the history backfill pass
    #[serde(default = "default_reconcile_period_secs")]
    pub reconcile_period_secs: u64,
    /// How early guide rules create their pending recordings
    #[serde(default = "default_lookahead_secs")]
    pub lookahead_secs: u64,
    /// IANA zone that request times without an offset are read in
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// Where completed captures are indexed, in-memory only when empty
    #[serde(default = "default_history_path")]
    pub history_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideConfig {
    #[serde(default = "default_guide_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRule {
    /// Channel id or number
    pub channel: String,
    /// Glob matched against program titles
    #[serde(default = "default_auto_title")]
    pub title: String,
}

impl AutoRule {
    pub fn matches(&self, title: &str) -> bool {
        Pattern::new(&self.title)
            .map(|p| p.matches(title))
            .unwrap_or(false)
    }
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from_str(&format!(
        "0.0.0.0:{}",
        env::var("PORT").unwrap_or(String::from("8080"))
    ))
    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)))
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            cors: Default::default(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_poll_period_secs() -> u64 {
    30
}

fn default_grace_period_secs() -> u64 {
    10
}

fn default_sweep_timeout_secs() -> u64 {
    60
}

fn default_reconcile_period_secs() -> u64 {
    300
}

fn default_lookahead_secs() -> u64 {
    60
}

fn default_timezone() -> String {
    "Europe/London".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_period_secs: default_poll_period_secs(),
            grace_period_secs: default_grace_period_secs(),
            sweep_timeout_secs: default_sweep_timeout_secs(),
            max_concurrent: 0,
            reconcile_period_secs: default_reconcile_period_secs(),
            lookahead_secs: default_lookahead_secs(),
            timezone: default_timezone(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn sweep_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sweep_timeout_secs as i64)
    }

    pub fn reconcile_period(&self) -> Duration {
        Duration::from_secs(self.reconcile_period_secs)
    }

    pub fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lookahead_secs as i64)
    }

    /// Zone for offset-less request times, UTC when the name is unknown.
    pub fn timezone(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }
}

fn default_output_dir() -> String {
    "recordings".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_history_path() -> String {
    "recordings/history.json".to_string()
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            ffmpeg: default_ffmpeg(),
            history_path: default_history_path(),
        }
    }
}

fn default_catalog_path() -> String {
    "channels.json".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

fn default_guide_path() -> String {
    "guide.json".to_string()
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            path: default_guide_path(),
        }
    }
}

fn default_auto_title() -> String {
    "*".to_string()
}

impl Config {
    /// Reads the config file at `path`. Without a path, looks in the working
    /// directory, then the system-wide location, then uses built-in defaults.
    pub fn load(path: Option<String>) -> anyhow::Result<Self> {
        let content = match path {
            Some(path) => fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("config file [{}] error: {}", path, e))?,
            None => fs::read_to_string("liverec.toml")
                .or(fs::read_to_string("/etc/liverec/liverec.toml"))
                .unwrap_or_default(),
        };
        let cfg: Self = toml::from_str(content.as_str())
            .map_err(|e| anyhow::anyhow!("config parse error: {}", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.poll_period_secs == 0 {
            return Err(anyhow::anyhow!("scheduler.poll_period_secs must be positive"));
        }

        if self.scheduler.sweep_timeout_secs <= self.scheduler.grace_period_secs {
            return Err(anyhow::anyhow!(
                "scheduler.sweep_timeout_secs must be greater than scheduler.grace_period_secs"
            ));
        }

        Tz::from_str(&self.scheduler.timezone).map_err(|e| {
            anyhow::anyhow!("scheduler.timezone [{}] error: {}", self.scheduler.timezone, e)
        })?;

        for rule in self.auto.iter() {
            if rule.channel.trim().is_empty() {
                anyhow::bail!("auto rule channel cannot be empty");
            }
            Pattern::new(&rule.title)
                .map_err(|e| anyhow::anyhow!("auto rule title [{}] error: {}", rule.title, e))?;
        }

        Ok(())
    }
}
