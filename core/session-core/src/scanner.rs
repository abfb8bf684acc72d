//! Snapshot scanning of monitored roots and session seeding.
//!
//! `scan` walks every enabled, mounted root lazily and yields one
//! `ObservedFile` per regular file. Symlinks are not followed and
//! deny-listed directories are pruned before descending. Unreadable
//! subtrees are logged and skipped.
//!
//! `seed_session` consumes a scan and decides, path by path, whether a file
//! is pre-existing (baseline) or new to the session (tracked record).

use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;
use crate::filter::{is_ignored_dir_name, FilterEngine};
use crate::store::Store;
use crate::types::{Classification, MonitoredRoot, ObservedFile, RecordStatus};

/// Filesystem timestamps can trail the wall clock; files touched this close
/// before a cutoff still count as new.
pub const CLOCK_SKEW_SLACK_SECS: i64 = 2;

const BASELINE_BATCH: usize = 500;

/// Lazily walks `roots`. Disabled or missing roots yield nothing.
pub fn scan<'a>(
    filter: &'a FilterEngine,
    roots: &'a [MonitoredRoot],
) -> impl Iterator<Item = ObservedFile> + 'a {
    roots
        .iter()
        .filter(|root| {
            if !root.enabled {
                return false;
            }
            if !root.is_available() {
                tracing::debug!(root = %root.path.display(), "Skipping unavailable root");
                return false;
            }
            true
        })
        .flat_map(move |root| scan_root(filter, root))
}

fn scan_root<'a>(
    filter: &'a FilterEngine,
    root: &'a MonitoredRoot,
) -> impl Iterator<Item = ObservedFile> + 'a {
    let max_depth = if root.recursive { usize::MAX } else { 1 };

    WalkDir::new(&root.path)
        .follow_links(false)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| !is_pruned(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                log_walk_error(&err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| observe_path(filter, &root.path, entry.path()))
}

fn is_pruned(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && is_ignored_dir_name(&entry.file_name().to_string_lossy())
}

fn log_walk_error(err: &walkdir::Error) {
    let path = err
        .path()
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    match err.io_error().map(|io| io.kind()) {
        Some(std::io::ErrorKind::NotFound) => {
            tracing::debug!(path = %path, "Entry vanished during scan");
        }
        _ => {
            tracing::warn!(path = %path, error = %err, "Skipping unreadable entry");
        }
    }
}

/// Stats and classifies one path under `root`. `None` when it is gone or is
/// not a regular file.
pub fn observe_path(filter: &FilterEngine, root: &Path, path: &Path) -> Option<ObservedFile> {
    let (classification, metadata) = filter.classify_path(root, path)?;
    Some(ObservedFile {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
        size: metadata.len(),
        modified_at: metadata.modified().ok().map(system_time_to_utc),
        created_at: metadata.created().ok().map(system_time_to_utc),
        classification,
    })
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Seeding
// ═══════════════════════════════════════════════════════════════════════════════

/// How a scan is folded into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedMode {
    /// First session ever, or after a resume: everything already on disk
    /// is pre-existing.
    Fresh,
    /// Session following a review. Paths the previous session knew about
    /// (records or baseline) are pre-existing; anything else touched since
    /// the freeze is new.
    Successor {
        previous_session: String,
        since: DateTime<Utc>,
    },
    /// Re-walk of a live session (root reappeared or explicit rescan).
    /// Unknown paths touched since `since` are new.
    CatchUp { since: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub scanned: usize,
    pub baseline: usize,
    pub tracked: usize,
}

/// Walks `roots` and records each file as baseline or as a tracked record of
/// `session_id`.
pub fn seed_session(
    store: &Store,
    filter: &FilterEngine,
    roots: &[MonitoredRoot],
    session_id: &str,
    mode: &SeedMode,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    let mut baseline = Vec::with_capacity(BASELINE_BATCH);
    let cutoff = match mode {
        SeedMode::Fresh => None,
        SeedMode::Successor { since, .. } | SeedMode::CatchUp { since } => {
            Some(*since - chrono::Duration::seconds(CLOCK_SKEW_SLACK_SECS))
        }
    };

    for observed in scan(filter, roots) {
        summary.scanned += 1;

        let status = match cutoff {
            None => None,
            Some(cutoff) => {
                if store.record(session_id, &observed.path)?.is_some()
                    || store.is_baseline(session_id, &observed.path)?
                {
                    continue;
                }
                let known_before = match mode {
                    SeedMode::Successor {
                        previous_session, ..
                    } => {
                        store.record(previous_session, &observed.path)?.is_some()
                            || store.is_baseline(previous_session, &observed.path)?
                    }
                    _ => false,
                };
                let is_new = !known_before
                    && observed.classification == Classification::User
                    && observed
                        .touched_at()
                        .map(|touched| touched >= cutoff)
                        .unwrap_or(false);
                is_new.then_some(RecordStatus::Tracked)
            }
        };

        match status {
            Some(status) => {
                tracing::debug!(path = %observed.path.display(), "New file found by scan");
                store.upsert_record(&observed.into_record(session_id, status, Utc::now()))?;
                summary.tracked += 1;
            }
            None => {
                baseline.push(observed);
                if baseline.len() >= BASELINE_BATCH {
                    summary.baseline += baseline.len();
                    store.record_baseline(session_id, &baseline)?;
                    baseline.clear();
                }
            }
        }
    }

    summary.baseline += baseline.len();
    store.record_baseline(session_id, &baseline)?;

    tracing::info!(
        session_id = %session_id,
        scanned = summary.scanned,
        baseline = summary.baseline,
        tracked = summary.tracked,
        "Seeded session"
    );
    Ok(summary)
}
