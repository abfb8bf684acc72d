//! SQLite persistence for sessions and file records.
//!
//! The store is the single durable authority. Every public mutation runs on
//! its own connection and is committed before it returns (WAL journal with
//! `synchronous=FULL`), so an abrupt termination loses at most the call in
//! flight, never a committed record. Writes are insert/update only while a
//! session is open; `prune_closed_sessions` only touches cleanly closed ones.
//!
//! Tables:
//! - `sessions`: one row per session, keyed by start timestamp
//! - `records`: files created during a session, keyed by (session, path key)
//! - `baseline`: files that pre-existed a session; never reviewed
//! - `decision_batches`: submitted review decisions, insert-once

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use crate::error::{CleanError, Result};
use crate::types::{
    path_key, Classification, DecisionBatch, FileRecord, ObservedFile, RecordStatus,
    ReviewTrigger, Session, SessionPhase,
};

const RECORD_COLUMNS: &str = "session_id, path, root, size, modified_at, created_at, \
     classification, status, first_seen_at, updated_at, last_error";

const SESSION_COLUMNS: &str =
    "session_id, started_at, phase, review_round, trigger, frozen_at, closed_at, clean_close";

pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Creates a new open session in `Monitoring`.
    ///
    /// The id is the start timestamp; on collision it is nudged forward by a
    /// microsecond until unique.
    pub fn begin_session(&self, started_at: DateTime<Utc>) -> Result<Session> {
        self.with_connection(|conn| {
            let mut started_at = started_at;
            loop {
                let id = format_timestamp(started_at);
                let inserted = conn
                    .execute(
                        "INSERT INTO sessions (session_id, started_at, phase, review_round, clean_close) \
                         VALUES (?1, ?2, ?3, 0, 0) \
                         ON CONFLICT(session_id) DO NOTHING",
                        params![id, id, SessionPhase::Monitoring.as_str()],
                    )
                    .map_err(|err| CleanError::store("insert session", err))?;
                if inserted == 1 {
                    return Ok(Session {
                        id,
                        started_at,
                        phase: SessionPhase::Monitoring,
                        review_round: 0,
                        trigger: None,
                        frozen_at: None,
                        closed_at: None,
                        clean_close: false,
                    });
                }
                started_at += chrono::Duration::microseconds(1);
            }
        })
    }

    pub fn session(&self, session_id: &str) -> Result<Option<Session>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                params![session_id],
                session_from_row,
            )
            .optional()
            .map_err(|err| CleanError::store("query session", err))
        })
    }

    /// Most recent session that was not cleanly closed, if any.
    pub fn load_open_session(&self) -> Result<Option<Session>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions \
                     WHERE clean_close = 0 ORDER BY started_at DESC LIMIT 1"
                ),
                [],
                session_from_row,
            )
            .optional()
            .map_err(|err| CleanError::store("query open session", err))
        })
    }

    pub fn set_phase(&self, session_id: &str, phase: SessionPhase) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions SET phase = ?2 WHERE session_id = ?1 AND clean_close = 0",
                    params![session_id, phase.as_str()],
                )
                .map_err(|err| CleanError::store("update session phase", err))?;
            if updated == 0 {
                return Err(closed_or_unknown(conn, session_id));
            }
            Ok(())
        })
    }

    /// Opens the next review round and returns its number.
    ///
    /// `frozen_at` is kept from the first round of the session; later rounds
    /// (restarted or resumed reviews) do not move it.
    pub fn begin_review_round(
        &self,
        session_id: &str,
        trigger: ReviewTrigger,
        frozen_at: DateTime<Utc>,
    ) -> Result<u32> {
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions SET review_round = review_round + 1, trigger = ?2, \
                        frozen_at = COALESCE(frozen_at, ?3) \
                     WHERE session_id = ?1 AND clean_close = 0",
                    params![session_id, trigger.as_str(), format_timestamp(frozen_at)],
                )
                .map_err(|err| CleanError::store("begin review round", err))?;
            if updated == 0 {
                return Err(closed_or_unknown(conn, session_id));
            }
            conn.query_row(
                "SELECT review_round FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get::<_, u32>(0),
            )
            .map_err(|err| CleanError::store("read review round", err))
        })
    }

    pub fn set_trigger(&self, session_id: &str, trigger: ReviewTrigger) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE sessions SET trigger = ?2 WHERE session_id = ?1 AND clean_close = 0",
                params![session_id, trigger.as_str()],
            )
            .map_err(|err| CleanError::store("update session trigger", err))?;
            Ok(())
        })
    }

    /// Marks a session cleanly closed. Fails if it is already closed.
    pub fn close_session(&self, session_id: &str, closed_at: DateTime<Utc>) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions SET phase = ?2, closed_at = ?3, clean_close = 1 \
                     WHERE session_id = ?1 AND clean_close = 0",
                    params![
                        session_id,
                        SessionPhase::Closed.as_str(),
                        format_timestamp(closed_at)
                    ],
                )
                .map_err(|err| CleanError::store("close session", err))?;
            if updated == 0 {
                return Err(closed_or_unknown(conn, session_id));
            }
            Ok(())
        })
    }

    /// Drops cleanly closed sessions beyond the newest `keep`. Open sessions
    /// are never touched.
    pub fn prune_closed_sessions(&self, keep: usize) -> Result<usize> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| CleanError::store("begin prune", err))?;
            let stale: Vec<String> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT session_id FROM sessions WHERE clean_close = 1 \
                         ORDER BY started_at DESC LIMIT -1 OFFSET ?1",
                    )
                    .map_err(|err| CleanError::store("prepare prune query", err))?;
                let rows = stmt
                    .query_map(params![keep as i64], |row| row.get::<_, String>(0))
                    .map_err(|err| CleanError::store("query prunable sessions", err))?;
                rows.collect::<std::result::Result<_, _>>()
                    .map_err(|err| CleanError::store("decode prunable session", err))?
            };
            for session_id in &stale {
                for table in ["records", "baseline", "decision_batches", "sessions"] {
                    tx.execute(
                        &format!("DELETE FROM {table} WHERE session_id = ?1"),
                        params![session_id],
                    )
                    .map_err(|err| CleanError::store(format!("prune {table}"), err))?;
                }
            }
            tx.commit()
                .map_err(|err| CleanError::store("commit prune", err))?;
            Ok(stale.len())
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────

    /// Inserts or refreshes a record.
    ///
    /// An existing record keeps its `first_seen_at`. `kept` and `pending`
    /// statuses are sticky; anything else takes the incoming status.
    pub fn upsert_record(&self, record: &FileRecord) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO records \
                    (session_id, path_key, path, root, size, modified_at, created_at, \
                     classification, status, first_seen_at, updated_at, last_error) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                 ON CONFLICT(session_id, path_key) DO UPDATE SET \
                    path = excluded.path, \
                    root = excluded.root, \
                    size = excluded.size, \
                    modified_at = excluded.modified_at, \
                    created_at = excluded.created_at, \
                    classification = excluded.classification, \
                    status = CASE records.status \
                        WHEN 'kept' THEN 'kept' \
                        WHEN 'pending' THEN 'pending' \
                        ELSE excluded.status END, \
                    updated_at = excluded.updated_at",
                params![
                    record.session_id,
                    record.key(),
                    record.path.to_string_lossy(),
                    record.root.to_string_lossy(),
                    record.size as i64,
                    record.modified_at.map(format_timestamp),
                    record.created_at.map(format_timestamp),
                    record.classification.as_str(),
                    record.status.as_str(),
                    format_timestamp(record.first_seen_at),
                    format_timestamp(record.updated_at),
                    record.last_error,
                ],
            )
            .map_err(|err| CleanError::store("upsert record", err))?;
            Ok(())
        })
    }

    pub fn record(&self, session_id: &str, path: &Path) -> Result<Option<FileRecord>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE session_id = ?1 AND path_key = ?2"
                ),
                params![session_id, path_key(path)],
                record_from_row,
            )
            .optional()
            .map_err(|err| CleanError::store("query record", err))
        })
    }

    pub fn list_records(
        &self,
        session_id: &str,
        status: Option<RecordStatus>,
    ) -> Result<Vec<FileRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM records \
                     WHERE session_id = ?1 AND (?2 IS NULL OR status = ?2) \
                     ORDER BY first_seen_at DESC, path_key ASC"
                ))
                .map_err(|err| CleanError::store("prepare records query", err))?;
            let rows = stmt
                .query_map(
                    params![session_id, status.map(|status| status.as_str())],
                    record_from_row,
                )
                .map_err(|err| CleanError::store("query records", err))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(|err| CleanError::store("decode record row", err))?);
            }
            Ok(records)
        })
    }

    pub fn count_records(&self, session_id: &str, status: RecordStatus) -> Result<usize> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM records WHERE session_id = ?1 AND status = ?2 \
                 AND classification = 'user'",
                params![session_id, status.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as usize)
            .map_err(|err| CleanError::store("count records", err))
        })
    }

    /// Moves a record to `status` if the transition is allowed.
    ///
    /// Returns `false` when no such record exists or the transition would go
    /// backwards; the record is left untouched in both cases.
    pub fn mark_status(
        &self,
        session_id: &str,
        path: &Path,
        status: RecordStatus,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let key = path_key(path);
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| CleanError::store("begin mark status", err))?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM records WHERE session_id = ?1 AND path_key = ?2",
                    params![session_id, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| CleanError::store("read record status", err))?;

            let current = match current.as_deref().map(RecordStatus::from_str) {
                Some(Some(current)) => current,
                Some(None) => {
                    return Err(CleanError::CorruptRow(format!(
                        "unknown status {:?} for {}",
                        current,
                        path.display()
                    )))
                }
                None => return Ok(false),
            };

            if !current.can_transition_to(status) {
                tracing::debug!(
                    path = %path.display(),
                    from = current.as_str(),
                    to = status.as_str(),
                    "Refusing backward status transition"
                );
                return Ok(false);
            }

            tx.execute(
                "UPDATE records SET status = ?3, last_error = ?4, updated_at = ?5 \
                 WHERE session_id = ?1 AND path_key = ?2",
                params![
                    session_id,
                    key,
                    status.as_str(),
                    last_error,
                    format_timestamp(Utc::now())
                ],
            )
            .map_err(|err| CleanError::store("update record status", err))?;
            tx.commit()
                .map_err(|err| CleanError::store("commit record status", err))?;
            Ok(true)
        })
    }

    /// Moves a record to a new path in place, preserving `first_seen_at`.
    ///
    /// When the destination already has a record (a file overwritten by the
    /// rename), that row takes the moved file's metadata and the earlier of
    /// the two `first_seen_at` values, and the source row is marked
    /// `deleted`. No row is removed either way.
    pub fn rename_record(&self, session_id: &str, from: &Path, to: &ObservedFile) -> Result<bool> {
        let from_key = path_key(from);
        let to_key = path_key(&to.path);
        let now = format_timestamp(Utc::now());
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| CleanError::store("begin rename", err))?;
            let source: Option<(String, String)> = tx
                .query_row(
                    "SELECT first_seen_at, status FROM records WHERE session_id = ?1 AND path_key = ?2",
                    params![session_id, from_key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|err| CleanError::store("read rename source", err))?;
            let Some((source_first_seen, source_status)) = source else {
                // Nothing to move; leave the destination as it was.
                return Ok(false);
            };

            let displaced = from_key != to_key
                && tx
                    .query_row(
                        "SELECT 1 FROM records WHERE session_id = ?1 AND path_key = ?2",
                        params![session_id, to_key],
                        |_| Ok(()),
                    )
                    .optional()
                    .map_err(|err| CleanError::store("read rename destination", err))?
                    .is_some();

            if displaced {
                tx.execute(
                    "UPDATE records SET path = ?3, root = ?4, size = ?5, modified_at = ?6, \
                        created_at = ?7, classification = ?8, \
                        status = CASE status \
                            WHEN 'kept' THEN 'kept' \
                            WHEN 'pending' THEN 'pending' \
                            ELSE ?9 END, \
                        first_seen_at = MIN(first_seen_at, ?10), last_error = NULL, updated_at = ?11 \
                     WHERE session_id = ?1 AND path_key = ?2",
                    params![
                        session_id,
                        to_key,
                        to.path.to_string_lossy(),
                        to.root.to_string_lossy(),
                        to.size as i64,
                        to.modified_at.map(format_timestamp),
                        to.created_at.map(format_timestamp),
                        to.classification.as_str(),
                        source_status,
                        source_first_seen,
                        now,
                    ],
                )
                .map_err(|err| CleanError::store("merge rename destination", err))?;
                tx.execute(
                    "UPDATE records SET status = CASE status WHEN 'kept' THEN 'kept' ELSE 'deleted' END, \
                        updated_at = ?3 \
                     WHERE session_id = ?1 AND path_key = ?2",
                    params![session_id, from_key, now],
                )
                .map_err(|err| CleanError::store("retire rename source", err))?;
                tracing::debug!(
                    from = %from.display(),
                    to = %to.path.display(),
                    "Rename replaced an existing record"
                );
            } else {
                tx.execute(
                    "UPDATE records SET path_key = ?3, path = ?4, root = ?5, size = ?6, \
                        modified_at = ?7, created_at = ?8, classification = ?9, updated_at = ?10 \
                     WHERE session_id = ?1 AND path_key = ?2",
                    params![
                        session_id,
                        from_key,
                        to_key,
                        to.path.to_string_lossy(),
                        to.root.to_string_lossy(),
                        to.size as i64,
                        to.modified_at.map(format_timestamp),
                        to.created_at.map(format_timestamp),
                        to.classification.as_str(),
                        now,
                    ],
                )
                .map_err(|err| CleanError::store("rename record", err))?;
            }
            tx.commit()
                .map_err(|err| CleanError::store("commit rename", err))?;
            Ok(true)
        })
    }

    /// Freezes review candidates: every tracked user record becomes pending.
    pub fn freeze_candidates(&self, session_id: &str) -> Result<usize> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE records SET status = 'pending', updated_at = ?2 \
                 WHERE session_id = ?1 AND status = 'tracked' AND classification = 'user'",
                params![session_id, format_timestamp(Utc::now())],
            )
            .map_err(|err| CleanError::store("freeze candidates", err))
        })
    }

    /// Returns pending records to tracked (review restarted or dismissed).
    pub fn restore_pending(&self, session_id: &str) -> Result<usize> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE records SET status = 'tracked', updated_at = ?2 \
                 WHERE session_id = ?1 AND status = 'pending'",
                params![session_id, format_timestamp(Utc::now())],
            )
            .map_err(|err| CleanError::store("restore pending records", err))
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Baseline
    // ─────────────────────────────────────────────────────────────────────

    pub fn record_baseline(&self, session_id: &str, entries: &[ObservedFile]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| CleanError::store("begin baseline batch", err))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO baseline (session_id, path_key, size, modified_at) \
                         VALUES (?1, ?2, ?3, ?4) \
                         ON CONFLICT(session_id, path_key) DO NOTHING",
                    )
                    .map_err(|err| CleanError::store("prepare baseline insert", err))?;
                for entry in entries {
                    stmt.execute(params![
                        session_id,
                        path_key(&entry.path),
                        entry.size as i64,
                        entry.modified_at.map(format_timestamp),
                    ])
                    .map_err(|err| CleanError::store("insert baseline entry", err))?;
                }
            }
            tx.commit()
                .map_err(|err| CleanError::store("commit baseline batch", err))
        })
    }

    pub fn is_baseline(&self, session_id: &str, path: &Path) -> Result<bool> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT 1 FROM baseline WHERE session_id = ?1 AND path_key = ?2",
                params![session_id, path_key(path)],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
            .map_err(|err| CleanError::store("query baseline", err))
        })
    }

    pub fn baseline_count(&self, session_id: &str) -> Result<usize> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM baseline WHERE session_id = ?1",
                params![session_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as usize)
            .map_err(|err| CleanError::store("count baseline", err))
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────

    /// Persists a decision batch. A batch can be recorded once per round.
    pub fn record_decisions(&self, batch: &DecisionBatch, submitted_at: DateTime<Utc>) -> Result<()> {
        let payload = serde_json::to_string(batch).map_err(|err| {
            CleanError::CorruptRow(format!("failed to serialize decision batch: {}", err))
        })?;
        self.with_connection(|conn| {
            let inserted = conn
                .execute(
                    "INSERT INTO decision_batches (session_id, round, submitted_at, payload) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(session_id, round) DO NOTHING",
                    params![
                        batch.session_id,
                        batch.round,
                        format_timestamp(submitted_at),
                        payload
                    ],
                )
                .map_err(|err| CleanError::store("insert decision batch", err))?;
            if inserted == 0 {
                return Err(CleanError::AlreadySubmitted {
                    session_id: batch.session_id.clone(),
                    round: batch.round,
                });
            }
            Ok(())
        })
    }

    pub fn decisions(&self, session_id: &str, round: u32) -> Result<Option<DecisionBatch>> {
        let payload: Option<String> = self.with_connection(|conn| {
            conn.query_row(
                "SELECT payload FROM decision_batches WHERE session_id = ?1 AND round = ?2",
                params![session_id, round],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| CleanError::store("query decision batch", err))
        })?;
        payload
            .map(|payload| {
                serde_json::from_str(&payload).map_err(|err| {
                    CleanError::CorruptRow(format!("failed to parse decision batch: {}", err))
                })
            })
            .transpose()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connection
    // ─────────────────────────────────────────────────────────────────────

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    started_at TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    review_round INTEGER NOT NULL DEFAULT 0,
                    trigger TEXT,
                    frozen_at TEXT,
                    closed_at TEXT,
                    clean_close INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE TABLE IF NOT EXISTS records (
                    session_id TEXT NOT NULL,
                    path_key TEXT NOT NULL,
                    path TEXT NOT NULL,
                    root TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    modified_at TEXT,
                    created_at TEXT,
                    classification TEXT NOT NULL,
                    status TEXT NOT NULL,
                    first_seen_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    last_error TEXT,
                    PRIMARY KEY (session_id, path_key)
                 );
                 CREATE INDEX IF NOT EXISTS records_status_idx ON records (session_id, status);
                 CREATE TABLE IF NOT EXISTS baseline (
                    session_id TEXT NOT NULL,
                    path_key TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    modified_at TEXT,
                    PRIMARY KEY (session_id, path_key)
                 );
                 CREATE TABLE IF NOT EXISTS decision_batches (
                    session_id TEXT NOT NULL,
                    round INTEGER NOT NULL,
                    submitted_at TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (session_id, round)
                 );
                 COMMIT;",
            )
            .map_err(|err| CleanError::store("initialize schema", err))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| CleanError::io("create store directory", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| CleanError::store("open sqlite db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| CleanError::store("enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|err| CleanError::store("set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| CleanError::store("set busy_timeout", err))?;

        Ok(conn)
    }
}

fn closed_or_unknown(conn: &Connection, session_id: &str) -> CleanError {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sessions WHERE session_id = ?1",
            params![session_id],
            |_| Ok(()),
        )
        .optional()
        .ok()
        .flatten()
        .is_some();
    if exists {
        CleanError::SessionClosed(session_id.to_string())
    } else {
        CleanError::UnknownSession(session_id.to_string())
    }
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn required_timestamp(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(column, format!("Bad timestamp: {raw}")))
}

fn optional_timestamp(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let phase_raw: String = row.get(2)?;
    let phase = SessionPhase::from_str(&phase_raw)
        .ok_or_else(|| conversion_error(2, format!("Unknown session phase: {phase_raw}")))?;
    let trigger_raw: Option<String> = row.get(4)?;

    Ok(Session {
        id: row.get(0)?,
        started_at: required_timestamp(row, 1)?,
        phase,
        review_round: row.get(3)?,
        trigger: trigger_raw.as_deref().and_then(ReviewTrigger::from_str),
        frozen_at: optional_timestamp(row, 5)?,
        closed_at: optional_timestamp(row, 6)?,
        clean_close: row.get::<_, i64>(7)? != 0,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let classification_raw: String = row.get(6)?;
    let classification = Classification::from_str(&classification_raw).ok_or_else(|| {
        conversion_error(6, format!("Unknown classification: {classification_raw}"))
    })?;
    let status_raw: String = row.get(7)?;
    let status = RecordStatus::from_str(&status_raw)
        .ok_or_else(|| conversion_error(7, format!("Unknown record status: {status_raw}")))?;

    Ok(FileRecord {
        session_id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        root: PathBuf::from(row.get::<_, String>(2)?),
        size: row.get::<_, i64>(3)?.max(0) as u64,
        modified_at: optional_timestamp(row, 4)?,
        created_at: optional_timestamp(row, 5)?,
        classification,
        status,
        first_seen_at: required_timestamp(row, 8)?,
        updated_at: required_timestamp(row, 9)?,
        last_error: row.get(10)?,
    })
}
