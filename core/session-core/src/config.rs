//! Configuration loading and application paths.
//!
//! Everything lives under `~/.sessionclean/` (overridable with
//! `SESSIONCLEAN_HOME`):
//! - `config.toml`: monitored roots, filter rules, timings
//! - `session.db`: the session store
//! - `daemon.sock`: IPC socket
//! - `logs/`: daemon log files

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CleanError, Result};
use crate::types::{FilterRule, MonitoredRoot};

const HOME_ENV: &str = "SESSIONCLEAN_HOME";
const APP_DIR_NAME: &str = ".sessionclean";

const DEFAULT_QUIET_PERIOD_SECS: u64 = 3;
const DEFAULT_REVIEW_TIMEOUT_SECS: u64 = 60;
const DEFAULT_AVAILABILITY_INTERVAL_SECS: u64 = 5;
const DEFAULT_KEEP_CLOSED_SESSIONS: usize = 10;

const DEFAULT_ROOT_NAMES: &[&str] = &[
    "Desktop",
    "Documents",
    "Downloads",
    "Pictures",
    "Videos",
    "Music",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub roots: Vec<MonitoredRoot>,
    pub rules: Vec<FilterRule>,
    pub ignored_extensions: Vec<String>,
    pub ignored_directories: Vec<String>,
    pub show_hidden_files: bool,
    pub quiet_period_secs: u64,
    pub review_timeout_secs: u64,
    pub availability_interval_secs: u64,
    pub keep_closed_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            rules: Vec::new(),
            ignored_extensions: Vec::new(),
            ignored_directories: Vec::new(),
            show_hidden_files: false,
            quiet_period_secs: DEFAULT_QUIET_PERIOD_SECS,
            review_timeout_secs: DEFAULT_REVIEW_TIMEOUT_SECS,
            availability_interval_secs: DEFAULT_AVAILABILITY_INTERVAL_SECS,
            keep_closed_sessions: DEFAULT_KEEP_CLOSED_SESSIONS,
        }
    }
}

impl AppConfig {
    /// Config pre-populated with the standard user folders that exist.
    pub fn with_default_roots(home: &Path) -> Self {
        let roots = DEFAULT_ROOT_NAMES
            .iter()
            .map(|name| home.join(name))
            .filter(|path| path.is_dir())
            .map(MonitoredRoot::new)
            .collect();
        Self {
            roots,
            ..Self::default()
        }
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }

    pub fn review_timeout(&self) -> Duration {
        Duration::from_secs(self.review_timeout_secs)
    }

    pub fn availability_interval(&self) -> Duration {
        Duration::from_secs(self.availability_interval_secs.max(1))
    }

    /// Enabled roots, regardless of whether they are currently mounted.
    pub fn enabled_roots(&self) -> Vec<MonitoredRoot> {
        self.roots
            .iter()
            .filter(|root| root.enabled)
            .cloned()
            .collect()
    }
}

/// Loads `config.toml`, falling back to default roots when the file is missing.
pub fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config_path = match path {
        Some(path) => path,
        None => config_path()?,
    };

    if !config_path.exists() {
        let home = dirs::home_dir().ok_or(CleanError::HomeDirNotFound)?;
        tracing::info!(path = %config_path.display(), "No config file found; using default roots");
        return Ok(AppConfig::with_default_roots(&home));
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| CleanError::io(format!("read {}", config_path.display()), err))?;
    toml::from_str::<AppConfig>(&content).map_err(|err| CleanError::ConfigMalformed {
        path: config_path.clone(),
        details: err.to_string(),
    })
}

/// Returns the application directory (~/.sessionclean or `$SESSIONCLEAN_HOME`).
pub fn app_dir() -> Result<PathBuf> {
    if let Some(value) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(value));
    }
    dirs::home_dir()
        .map(|home| home.join(APP_DIR_NAME))
        .ok_or(CleanError::HomeDirNotFound)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(app_dir()?.join("config.toml"))
}

pub fn db_path() -> Result<PathBuf> {
    Ok(app_dir()?.join("session.db"))
}

pub fn socket_path() -> Result<PathBuf> {
    Ok(app_dir()?.join("daemon.sock"))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(app_dir()?.join("logs"))
}

pub fn backoff_path() -> Result<PathBuf> {
    Ok(app_dir()?.join("daemon-backoff.json"))
}
