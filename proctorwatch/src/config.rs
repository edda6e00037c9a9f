// proctorwatch/src/config.rs
//
// Command-line and environment configuration.
//
// Every flag falls back to a PROCTORWATCH_* variable (a `.env` file is loaded
// first by main). `MONGO_URI` is honoured as a legacy alias for the store
// location, but only when it names something this binary can open.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::error::{ConfigError, StoreError};
use crate::media::Dimensions;
use crate::session::{ExpiryPolicy, SessionSettings};
use crate::store::{JsonlStore, MemoryStore, SharedStore};

pub const DEFAULT_STORE: &str = "./data/violations.jsonl";

// ── serve ─────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "PROCTORWATCH_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    #[arg(long, env = "PROCTORWATCH_STORE",
          help = "Violation log: a JSONL file path, or \"memory\" [default: ./data/violations.jsonl]")]
    pub store: Option<String>,
}

impl ServeArgs {
    pub fn store_location(&self) -> Result<StoreLocation, ConfigError> {
        resolve_store(self.store.as_deref(), std::env::var("MONGO_URI").ok())
    }
}

/// Where violation records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

impl StoreLocation {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::Invalid { name: "store", reason: "empty location".into() });
        }
        if raw.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }
        if let Some(path) = raw.strip_prefix("file://") {
            return Ok(Self::File(PathBuf::from(path)));
        }
        if raw.contains("://") {
            return Err(ConfigError::UnsupportedStore(raw.to_string()));
        }
        Ok(Self::File(PathBuf::from(raw)))
    }

    pub async fn open(&self) -> Result<SharedStore, StoreError> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryStore::new()),
            Self::File(path) => Arc::new(JsonlStore::open(path.clone()).await?),
        })
    }
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Explicit flag / PROCTORWATCH_STORE wins, then MONGO_URI, then the default file.
fn resolve_store(explicit: Option<&str>, mongo_uri: Option<String>) -> Result<StoreLocation, ConfigError> {
    match (explicit, mongo_uri) {
        (Some(raw), _) => StoreLocation::parse(raw),
        (None, Some(uri)) => StoreLocation::parse(&uri),
        (None, None) => StoreLocation::parse(DEFAULT_STORE),
    }
}

// ── monitor ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeedMode {
    Tail,    // follow a growing JSONL feed
    Replay,  // play a finished feed once, scaled by --speed
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[arg(long, value_enum, default_value = "replay")]
    pub mode: FeedMode,

    #[arg(long, default_value = "/tmp/proctorwatch_feed.jsonl",
          help = "JSONL client event feed")]
    pub feed: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    pub speed: f64,

    #[arg(long, help = "Directory of .jpg frames served as the camera")]
    pub frames: Option<PathBuf>,

    #[arg(long, help = "Resolution the camera reports, e.g. 1280x720")]
    pub camera_size: Option<Dimensions>,

    #[arg(long, env = "PROCTORWATCH_LOG_SERVER", default_value = "http://localhost:5000")]
    pub log_server: String,

    #[arg(long, env = "PROCTORWATCH_DETECTOR", default_value = "http://localhost:5001")]
    pub detector: String,

    #[arg(long, env = "PROCTORWATCH_DURATION_SECS", default_value = "300")]
    pub duration_secs: u64,

    #[arg(long, env = "PROCTORWATCH_SAMPLE_MS", default_value = "1000")]
    pub sample_ms: u64,

    #[arg(long, env = "PROCTORWATCH_HTTP_TIMEOUT_MS", default_value = "5000")]
    pub http_timeout_ms: u64,

    #[arg(long, value_enum, env = "PROCTORWATCH_EXPIRY", default_value = "display-only")]
    pub expiry: ExpiryPolicy,
}

impl MonitorArgs {
    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        if self.duration_secs == 0 {
            return Err(ConfigError::Invalid { name: "duration_secs", reason: "must be at least 1".into() });
        }
        if self.sample_ms == 0 {
            return Err(ConfigError::Invalid { name: "sample_ms", reason: "must be at least 1".into() });
        }
        Ok(SessionSettings {
            duration_secs: self.duration_secs,
            sample_every:  Duration::from_millis(self.sample_ms),
            tick_every:    Duration::from_secs(1),
            expiry:        self.expiry,
        })
    }

    pub fn http_timeout(&self) -> Result<Duration, ConfigError> {
        http_timeout(self.http_timeout_ms)
    }

    pub fn validate_speed(&self) -> Result<f64, ConfigError> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(ConfigError::Invalid { name: "speed", reason: format!("{} is not a positive number", self.speed) });
        }
        Ok(self.speed)
    }
}

// ── violations ────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ViolationsArgs {
    #[arg(long, env = "PROCTORWATCH_LOG_SERVER", default_value = "http://localhost:5000")]
    pub log_server: String,

    #[arg(long, env = "PROCTORWATCH_HTTP_TIMEOUT_MS", default_value = "5000")]
    pub http_timeout_ms: u64,

    #[arg(long, help = "Print raw JSON instead of a table")]
    pub json: bool,
}

impl ViolationsArgs {
    pub fn http_timeout(&self) -> Result<Duration, ConfigError> {
        http_timeout(self.http_timeout_ms)
    }
}

fn http_timeout(ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::Invalid { name: "http_timeout_ms", reason: "must be at least 1".into() });
    }
    Ok(Duration::from_millis(ms))
}
