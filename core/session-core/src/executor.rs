//! Applies a review's decisions.
//!
//! Deletion always goes through the platform trash, never a permanent
//! unlink. A file that cannot be trashed is kept and its reason recorded;
//! the rest of the batch still runs. Each record's terminal status is
//! committed before `apply` returns, and a store failure stops the batch.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::store::Store;
use crate::types::{
    path_key, ApplyOutcome, ApplyReport, Decision, DecisionBatch, FileOutcome, FileRecord,
    RecordStatus,
};

/// Moves a path to the recycle bin / trash.
pub trait Trash: Send + Sync {
    fn move_to_trash(&self, path: &Path) -> std::result::Result<(), String>;
}

/// The platform trash via the `trash` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTrash;

impl Trash for SystemTrash {
    fn move_to_trash(&self, path: &Path) -> std::result::Result<(), String> {
        trash::delete(path).map_err(|err| err.to_string())
    }
}

pub fn apply(
    store: &Store,
    session_id: &str,
    batch: &DecisionBatch,
    trash: &dyn Trash,
) -> Result<ApplyReport> {
    let mut candidates: HashMap<String, FileRecord> = store
        .list_records(session_id, Some(RecordStatus::Pending))?
        .into_iter()
        .filter(FileRecord::is_candidate)
        .map(|record| (record.key(), record))
        .collect();

    let mut report = ApplyReport {
        session_id: session_id.to_string(),
        round: batch.round,
        outcomes: Vec::with_capacity(batch.decisions.len().max(candidates.len())),
    };

    for (path, decision) in &batch.decisions {
        let Some(record) = candidates.remove(&path_key(path)) else {
            tracing::warn!(path = %path.display(), "Decision for a path that is not a candidate");
            report.outcomes.push(FileOutcome {
                path: path.clone(),
                outcome: ApplyOutcome::Skipped,
            });
            continue;
        };

        let outcome = match decision {
            Decision::Keep => {
                store.mark_status(session_id, &record.path, RecordStatus::Kept, None)?;
                ApplyOutcome::Skipped
            }
            Decision::Delete => match trash.move_to_trash(&record.path) {
                Ok(()) => {
                    store.mark_status(session_id, &record.path, RecordStatus::Deleted, None)?;
                    tracing::info!(path = %record.path.display(), "Moved to trash");
                    ApplyOutcome::Deleted
                }
                Err(reason) => {
                    tracing::warn!(
                        path = %record.path.display(),
                        reason = %reason,
                        "Failed to move file to trash; keeping it"
                    );
                    store.mark_status(
                        session_id,
                        &record.path,
                        RecordStatus::Kept,
                        Some(&reason),
                    )?;
                    ApplyOutcome::Failed { reason }
                }
            },
        };
        report.outcomes.push(FileOutcome {
            path: record.path,
            outcome,
        });
    }

    // Undecided candidates default to keep.
    let mut undecided: Vec<FileRecord> = candidates.into_values().collect();
    undecided.sort_by(|a, b| a.path.cmp(&b.path));
    for record in undecided {
        store.mark_status(session_id, &record.path, RecordStatus::Kept, None)?;
        report.outcomes.push(FileOutcome {
            path: record.path,
            outcome: ApplyOutcome::Skipped,
        });
    }

    tracing::info!(
        session_id = %session_id,
        round = batch.round,
        deleted = report.deleted(),
        failed = report.failed(),
        skipped = report.skipped(),
        "Applied review decisions"
    );
    Ok(report)
}
