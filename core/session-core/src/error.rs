//! Error types for sessionclean-core operations.

use std::path::PathBuf;

/// All errors that can occur in sessionclean-core operations.
///
/// Transient filesystem problems (unreadable subtrees, a locked file during
/// deletion) are not errors at this level; they are logged and reported as
/// per-file outcomes. What surfaces here is what must stop the caller.
#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid filter rule {pattern:?}: {details}")]
    InvalidRule { pattern: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Store error: {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Corrupt store row: {0}")]
    CorruptRow(String),

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Session {0} is already closed")]
    SessionClosed(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Decisions for session {session_id} round {round} were already submitted")]
    AlreadySubmitted { session_id: String, round: u32 },

    #[error("Cannot {action} while session is {phase}")]
    InvalidTransition { action: String, phase: String },

    #[error("Review round mismatch: expected {expected}, got {actual}")]
    StaleReview { expected: u32, actual: u32 },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Controller channel closed")]
    ChannelClosed,
}

impl CleanError {
    pub(crate) fn store(context: impl Into<String>, source: rusqlite::Error) -> Self {
        CleanError::Store {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CleanError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable machine-readable code for IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            CleanError::HomeDirNotFound => "home_not_found",
            CleanError::ConfigMalformed { .. } => "config_malformed",
            CleanError::InvalidRule { .. } => "invalid_rule",
            CleanError::Store { .. } | CleanError::CorruptRow(_) => "store_error",
            CleanError::SessionClosed(_) => "session_closed",
            CleanError::UnknownSession(_) => "unknown_session",
            CleanError::AlreadySubmitted { .. } => "already_submitted",
            CleanError::InvalidTransition { .. } => "invalid_transition",
            CleanError::StaleReview { .. } => "stale_review",
            CleanError::Io { .. } => "io_error",
            CleanError::Watch(_) => "watch_error",
            CleanError::ChannelClosed => "channel_closed",
        }
    }
}

/// Convenience type alias for Results using CleanError.
pub type Result<T> = std::result::Result<T, CleanError>;

impl From<CleanError> for String {
    fn from(err: CleanError) -> String {
        err.to_string()
    }
}
