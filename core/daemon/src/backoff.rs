//! Crash-loop protection for daemon restarts.
//!
//! Every start is appended to a small JSON history next to the database.
//! More than `MAX_STARTS` starts inside `WINDOW_SECS` delays startup by a
//! linearly growing, capped amount.

use chrono::{DateTime, Duration, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::thread;
use tracing::warn;

const WINDOW_SECS: i64 = 120;
const MAX_STARTS: usize = 3;
const BACKOFF_STEP_SECS: u64 = 10;
const BACKOFF_MAX_SECS: u64 = 60;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StartHistory {
    starts: Vec<DateTime<Utc>>,
}

impl StartHistory {
    fn prune(&mut self, now: DateTime<Utc>) {
        let window = Duration::seconds(WINDOW_SECS);
        self.starts.retain(|start| now - *start <= window);
    }

    /// Records a start at `now` and returns the delay it earns.
    fn record_start(&mut self, now: DateTime<Utc>) -> Option<u64> {
        self.prune(now);
        self.starts.push(now);
        delay_for(self.starts.len())
    }
}

fn delay_for(recent_starts: usize) -> Option<u64> {
    let extra = recent_starts.checked_sub(MAX_STARTS).filter(|extra| *extra > 0)?;
    Some(BACKOFF_STEP_SECS.saturating_mul(extra as u64).min(BACKOFF_MAX_SECS))
}

/// Health view of the restart history.
#[derive(Debug, Serialize)]
pub struct BackoffSnapshot {
    pub recent_starts: usize,
    pub window_secs: i64,
    pub last_start: Option<DateTime<Utc>>,
    pub current_delay_secs: Option<u64>,
}

pub fn apply_startup_backoff(path: &Path) {
    let now = Utc::now();
    let mut history = match load_history(path) {
        Ok(history) => history,
        Err(err) => {
            warn!(error = %err, "Ignoring unreadable start history");
            StartHistory::default()
        }
    };
    let delay = history.record_start(now);

    if let Err(err) = save_history(path, &history) {
        warn!(error = %err, "Failed to persist start history");
    }

    if let Some(secs) = delay {
        warn!(
            recent_starts = history.starts.len(),
            delay_secs = secs,
            "Repeated restarts detected; delaying startup"
        );
        thread::sleep(std::time::Duration::from_secs(secs));
    }
}

pub fn snapshot(path: &Path) -> Option<BackoffSnapshot> {
    let mut history = load_history(path).ok()?;
    history.prune(Utc::now());
    Some(BackoffSnapshot {
        recent_starts: history.starts.len(),
        window_secs: WINDOW_SECS,
        last_start: history.starts.last().copied(),
        current_delay_secs: delay_for(history.starts.len()),
    })
}

fn load_history(path: &Path) -> Result<StartHistory, String> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(StartHistory::default())
        }
        Err(err) => return Err(format!("Failed to read start history: {}", err)),
    };
    serde_json::from_slice(&data).map_err(|err| format!("Failed to parse start history: {}", err))
}

fn save_history(path: &Path, history: &StartHistory) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create start history dir: {}", err))?;
    }
    let payload = serde_json::to_vec_pretty(history)
        .map_err(|err| format!("Failed to serialize start history: {}", err))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)
        .map_err(|err| format!("Failed to write start history: {}", err))?;
    fs::rename(&tmp_path, path).map_err(|err| format!("Failed to commit start history: {}", err))
}
