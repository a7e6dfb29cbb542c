//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::services::scan_queue::{LibraryId, ScanQueueConfig};

/// Default cron expression for scheduled scans (top of every hour).
pub const DEFAULT_SCAN_SCHEDULE: &str = "0 0 * * * *";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// A library root the directory scanner can walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    pub id: LibraryId,
    pub path: PathBuf,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Registered libraries (`LIBRARIES=7=/data/manga,8=/data/comics`)
    pub libraries: Vec<LibraryConfig>,

    /// How long finished scans stay queryable
    pub scan_history_retention: Duration,

    /// How often the history pruner runs
    pub scan_prune_interval: Duration,

    /// Upper bound on a single scan (unset = no limit)
    pub scan_timeout: Option<Duration>,

    /// Cron expression for scheduled scans; `None` disables them
    pub scan_schedule: Option<String>,

    /// Capacity of the scan event broadcast channel
    pub scan_event_capacity: usize,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        let queue = ScanQueueConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            libraries: Vec::new(),
            scan_history_retention: queue.history_retention,
            scan_prune_interval: queue.prune_interval,
            scan_timeout: queue.scan_timeout,
            scan_schedule: Some(DEFAULT_SCAN_SCHEDULE.to_string()),
            scan_event_capacity: queue.event_capacity,
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Missing keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let libraries = match lookup("LIBRARIES") {
            Some(raw) => parse_libraries(&raw).context("Invalid LIBRARIES")?,
            None => Vec::new(),
        };

        let scan_schedule = match lookup("SCAN_SCHEDULE") {
            Some(s) if s.trim().eq_ignore_ascii_case("off") => None,
            Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => defaults.scan_schedule,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => bail!("Invalid LOG_FORMAT: {other} (expected json or pretty)"),
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),

            port: lookup("PORT")
                .unwrap_or_else(|| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            libraries,

            scan_history_retention: match lookup("SCAN_HISTORY_RETENTION_HOURS") {
                Some(v) => Duration::from_secs(
                    v.parse::<u64>()
                        .context("Invalid SCAN_HISTORY_RETENTION_HOURS")?
                        .checked_mul(60 * 60)
                        .context("SCAN_HISTORY_RETENTION_HOURS too large")?,
                ),
                None => defaults.scan_history_retention,
            },

            scan_prune_interval: match lookup("SCAN_PRUNE_INTERVAL_SECS") {
                Some(v) => Duration::from_secs(
                    v.parse().context("Invalid SCAN_PRUNE_INTERVAL_SECS")?,
                ),
                None => defaults.scan_prune_interval,
            },

            scan_timeout: match lookup("SCAN_TIMEOUT_SECS") {
                Some(v) if !v.trim().is_empty() => Some(Duration::from_secs(
                    v.trim().parse().context("Invalid SCAN_TIMEOUT_SECS")?,
                )),
                _ => None,
            },

            scan_schedule,

            scan_event_capacity: match lookup("SCAN_EVENT_CAPACITY") {
                Some(v) => v.parse().context("Invalid SCAN_EVENT_CAPACITY")?,
                None => defaults.scan_event_capacity,
            },

            log_format,
        })
    }

    /// Tuning for the scan queue and its background services
    pub fn scan_queue_config(&self) -> ScanQueueConfig {
        ScanQueueConfig {
            history_retention: self.scan_history_retention,
            prune_interval: self.scan_prune_interval,
            scan_timeout: self.scan_timeout,
            event_capacity: self.scan_event_capacity,
            ..ScanQueueConfig::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse `id=path` pairs separated by commas.
pub fn parse_libraries(raw: &str) -> Result<Vec<LibraryConfig>> {
    let mut libraries: Vec<LibraryConfig> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, path) = entry
            .split_once('=')
            .with_context(|| format!("expected id=path, got {entry:?}"))?;
        let id: i64 = id
            .trim()
            .parse()
            .with_context(|| format!("invalid library id {:?}", id.trim()))?;
        let path = path.trim();
        if path.is_empty() {
            bail!("library {id} has an empty path");
        }
        if libraries.iter().any(|l| l.id.0 == id) {
            bail!("library {id} is listed more than once");
        }
        libraries.push(LibraryConfig {
            id: LibraryId(id),
            path: PathBuf::from(path),
        });
    }
    Ok(libraries)
}
