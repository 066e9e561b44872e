use std::{path::PathBuf, time::Duration};

use chrono::{FixedOffset, Offset, Utc};
use log::LevelFilter;

use crate::{alert::RetryPolicy, logging::DEFAULT_TIME_FORMAT};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_root: PathBuf,
    pub utc_offset: FixedOffset,
    pub time_format: String,
    pub level: LevelFilter,
    pub max_file_bytes: u64,
    pub backup_count: u32,
    pub console: bool,
    pub use_ansi: bool,
    pub alert: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_root: data_dir().join("logs"),
            utc_offset: Utc.fix(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            level: LevelFilter::Info,
            max_file_bytes: 10 * 1024 * 1024,
            backup_count: 5,
            console: true,
            use_ansi: yansi::Condition::stderr_is_tty(),
            alert: AlertConfig::default(),
        }
    }
}

impl Config {
    pub fn with_log_root(self, log_root: impl Into<PathBuf>) -> Self {
        Self {
            log_root: log_root.into(),
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Minimum gap between two remote sends.
    pub rate_limit: Duration,
    pub retry: RetryPolicy,
    /// How long `stop` waits for the queue to drain before cancelling.
    pub drain_timeout: Duration,
    pub cancel_grace: Duration,
    pub request_timeout: Duration,
    pub verify_on_start: bool,
    pub api_base: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            drain_timeout: Duration::from_secs(5),
            cancel_grace: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            verify_on_start: true,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var_os("HOME");
    #[cfg(target_os = "windows")]
    let home = std::env::var_os("USERPROFILE");

    home.map(PathBuf::from)
}

pub fn data_dir() -> PathBuf {
    let data_dir = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("chatlog")
}
