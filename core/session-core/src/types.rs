//! Shared types for sessions, file records, and review decisions.
//!
//! Classification, record status and session phase are closed enums with
//! explicit string forms; those strings are the persisted layout, so renaming
//! a variant's `as_str` breaks existing databases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::files::{file_category, file_type};

// ═══════════════════════════════════════════════════════════════════════════════
// Classification & Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Verdict of the filter engine for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    User,
    System,
    Ignored,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::User => "user",
            Classification::System => "system",
            Classification::Ignored => "ignored",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Classification::User),
            "system" => Some(Classification::System),
            "ignored" => Some(Classification::Ignored),
            _ => None,
        }
    }
}

/// Lifecycle status of a tracked file within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Tracked,
    Pending,
    Kept,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Tracked => "tracked",
            RecordStatus::Pending => "pending",
            RecordStatus::Kept => "kept",
            RecordStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "tracked" => Some(RecordStatus::Tracked),
            "pending" => Some(RecordStatus::Pending),
            "kept" => Some(RecordStatus::Kept),
            "deleted" => Some(RecordStatus::Deleted),
            _ => None,
        }
    }

    /// Forward-only transition table.
    ///
    /// Two backward edges exist: `pending -> tracked` when a review restarts,
    /// and `deleted -> tracked` when a path deleted outside the tool is
    /// recreated in the same session. `kept` is terminal.
    pub fn can_transition_to(&self, next: RecordStatus) -> bool {
        use RecordStatus::*;
        match (self, next) {
            (Kept, Kept) => true,
            (Kept, _) => false,
            (Tracked, _) => true,
            (Pending, _) => true,
            (Deleted, Deleted) | (Deleted, Tracked) => true,
            (Deleted, _) => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Path identity
// ═══════════════════════════════════════════════════════════════════════════════

/// Normalized identity of a path within a session.
///
/// Case-insensitive platforms (Windows, macOS) fold to lower case; elsewhere
/// the path is used verbatim.
pub fn path_key(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if cfg!(any(windows, target_os = "macos")) {
        raw.to_lowercase()
    } else {
        raw.into_owned()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Files
// ═══════════════════════════════════════════════════════════════════════════════

/// A file seen by the scanner or the change monitor, before it is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedFile {
    pub path: PathBuf,
    pub root: PathBuf,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub classification: Classification,
}

impl ObservedFile {
    pub fn into_record(
        self,
        session_id: &str,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> FileRecord {
        FileRecord {
            session_id: session_id.to_string(),
            path: self.path,
            root: self.root,
            size: self.size,
            modified_at: self.modified_at,
            created_at: self.created_at,
            classification: self.classification,
            status,
            first_seen_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Latest of creation and modification time, when either is known.
    pub fn touched_at(&self) -> Option<DateTime<Utc>> {
        match (self.created_at, self.modified_at) {
            (Some(created), Some(modified)) => Some(created.max(modified)),
            (created, modified) => created.or(modified),
        }
    }
}

/// Durable record of one file within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub session_id: String,
    pub path: PathBuf,
    pub root: PathBuf,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub classification: Classification,
    pub status: RecordStatus,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl FileRecord {
    pub fn key(&self) -> String {
        path_key(&self.path)
    }

    pub fn is_candidate(&self) -> bool {
        self.classification == Classification::User
            && matches!(self.status, RecordStatus::Tracked | RecordStatus::Pending)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Monitored roots
// ═══════════════════════════════════════════════════════════════════════════════

/// What a user rule decides for the paths it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleVerdict {
    /// Whitelist: always surface for review.
    User,
    /// Blacklist as system file: tracked nowhere.
    System,
    /// Blacklist as noise.
    Ignored,
}

impl From<RuleVerdict> for Classification {
    fn from(verdict: RuleVerdict) -> Self {
        match verdict {
            RuleVerdict::User => Classification::User,
            RuleVerdict::System => Classification::System,
            RuleVerdict::Ignored => Classification::Ignored,
        }
    }
}

/// A user-configured glob rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub pattern: String,
    pub verdict: RuleVerdict,
}

/// A directory or drive watched for new files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredRoot {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// External / USB drives; expected to come and go.
    #[serde(default)]
    pub removable: bool,
    /// Replaces the global rule list for this root when set.
    #[serde(default)]
    pub rules: Option<Vec<FilterRule>>,
}

fn default_true() -> bool {
    true
}

impl MonitoredRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            recursive: true,
            removable: false,
            rules: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.path.is_dir()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Monitoring,
    ReviewPending,
    Reviewing,
    Applying,
    Closed,
    Resumed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Monitoring => "monitoring",
            SessionPhase::ReviewPending => "review_pending",
            SessionPhase::Reviewing => "reviewing",
            SessionPhase::Applying => "applying",
            SessionPhase::Closed => "closed",
            SessionPhase::Resumed => "resumed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "monitoring" => Some(SessionPhase::Monitoring),
            "review_pending" => Some(SessionPhase::ReviewPending),
            "reviewing" => Some(SessionPhase::Reviewing),
            "applying" => Some(SessionPhase::Applying),
            "closed" => Some(SessionPhase::Closed),
            "resumed" => Some(SessionPhase::Resumed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a review was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewTrigger {
    Shutdown,
    Manual,
    Resume,
}

impl ReviewTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewTrigger::Shutdown => "shutdown",
            ReviewTrigger::Manual => "manual",
            ReviewTrigger::Resume => "resume",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "shutdown" => Some(ReviewTrigger::Shutdown),
            "manual" => Some(ReviewTrigger::Manual),
            "resume" => Some(ReviewTrigger::Resume),
            _ => None,
        }
    }
}

/// Persisted session row. Identity is the start timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub review_round: u32,
    pub trigger: Option<ReviewTrigger>,
    pub frozen_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub clean_close: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Review
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Keep,
    Delete,
}

/// A frozen candidate as shown to the review UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub classification: Classification,
    pub file_type: String,
    pub category: String,
}

impl From<&FileRecord> for Candidate {
    fn from(record: &FileRecord) -> Self {
        Candidate {
            path: record.path.clone(),
            size: record.size,
            modified_at: record.modified_at,
            classification: record.classification,
            file_type: file_type(&record.path),
            category: file_category(&record.path).to_string(),
        }
    }
}

/// Candidate list handed to the review UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOffer {
    pub session_id: String,
    pub round: u32,
    pub trigger: ReviewTrigger,
    /// Set when a shutdown is waiting; after it everything is kept.
    pub deadline: Option<DateTime<Utc>>,
    pub candidates: Vec<Candidate>,
}

/// The user's verdict for one review round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionBatch {
    pub session_id: String,
    pub round: u32,
    #[serde(default)]
    pub decisions: BTreeMap<PathBuf, Decision>,
}

impl DecisionBatch {
    pub fn empty(session_id: &str, round: u32) -> Self {
        Self {
            session_id: session_id.to_string(),
            round,
            decisions: BTreeMap::new(),
        }
    }

    pub fn uniform(offer: &ReviewOffer, decision: Decision) -> Self {
        Self {
            session_id: offer.session_id.clone(),
            round: offer.round,
            decisions: offer
                .candidates
                .iter()
                .map(|candidate| (candidate.path.clone(), decision))
                .collect(),
        }
    }

    pub fn all_keep(offer: &ReviewOffer) -> Self {
        Self::uniform(offer, Decision::Keep)
    }

    pub fn all_delete(offer: &ReviewOffer) -> Self {
        Self::uniform(offer, Decision::Delete)
    }

    pub fn with(mut self, path: impl Into<PathBuf>, decision: Decision) -> Self {
        self.decisions.insert(path.into(), decision);
        self
    }
}

/// Result of applying one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ApplyOutcome {
    Deleted,
    Failed { reason: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub session_id: String,
    pub round: u32,
    pub outcomes: Vec<FileOutcome>,
}

impl ApplyReport {
    pub fn deleted(&self) -> usize {
        self.count(|outcome| matches!(outcome, ApplyOutcome::Deleted))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, ApplyOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, ApplyOutcome::Skipped))
    }

    pub fn outcome_for(&self, path: &Path) -> Option<&ApplyOutcome> {
        let key = path_key(path);
        self.outcomes
            .iter()
            .find(|entry| path_key(&entry.path) == key)
            .map(|entry| &entry.outcome)
    }

    fn count(&self, pred: impl Fn(&ApplyOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|entry| pred(&entry.outcome))
            .count()
    }
}

/// Read-only status for the tray.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrayStatus {
    pub session_id: String,
    pub phase: SessionPhase,
    pub tracked: usize,
    pub pending: usize,
    pub unavailable_roots: Vec<PathBuf>,
}
