//! Debounce buffer for files that are still being written.
//!
//! A path enters the buffer on every create/modify notification. It leaves
//! when it has been quiet for the configured period and its size did not
//! change since the last observation; otherwise its timer restarts. Time is
//! passed in explicitly so the buffer can be driven without sleeping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct PendingEntry {
    root: PathBuf,
    last_event: Instant,
    last_size: Option<u64>,
}

/// A buffered path that has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub root: PathBuf,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct PendingBuffer {
    quiet_period: Duration,
    entries: HashMap<PathBuf, PendingEntry>,
}

impl PendingBuffer {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            entries: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Records activity on `path`, restarting its quiet timer.
    pub fn touch(&mut self, root: &Path, path: PathBuf, size: Option<u64>, now: Instant) {
        let entry = self.entries.entry(path).or_insert_with(|| PendingEntry {
            root: root.to_path_buf(),
            last_event: now,
            last_size: size,
        });
        entry.last_event = now;
        entry.last_size = size;
    }

    /// Re-keys a buffered entry. Returns `false` when `from` was not buffered.
    pub fn rename(&mut self, from: &Path, to: PathBuf, now: Instant) -> bool {
        match self.entries.remove(from) {
            Some(mut entry) => {
                entry.last_event = now;
                self.entries.insert(to, entry);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Drops every entry belonging to `root`.
    pub fn forget_root(&mut self, root: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.root != root);
        before - self.entries.len()
    }

    /// Earliest instant at which some entry could settle.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .map(|entry| entry.last_event + self.quiet_period)
            .min()
    }

    /// Removes and returns entries that are quiet and size-stable.
    ///
    /// `probe` reports the current size of a path, or `None` when it has
    /// vanished; vanished entries are dropped. An entry whose size moved
    /// since the last observation stays buffered with a fresh timer.
    pub fn drain_settled(
        &mut self,
        now: Instant,
        mut probe: impl FnMut(&Path) -> Option<u64>,
    ) -> Vec<Settled> {
        let quiet_period = self.quiet_period;
        let due: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_event) >= quiet_period)
            .map(|(path, _)| path.clone())
            .collect();

        let mut settled = Vec::new();
        for path in due {
            let current = probe(&path);
            let Some(entry) = self.entries.get_mut(&path) else {
                continue;
            };
            match current {
                None => {
                    tracing::debug!(path = %path.display(), "Pending file vanished before settling");
                    self.entries.remove(&path);
                }
                Some(size) if entry.last_size == Some(size) => {
                    if let Some(entry) = self.entries.remove(&path) {
                        settled.push(Settled {
                            root: entry.root,
                            path,
                        });
                    }
                }
                Some(size) => {
                    entry.last_size = Some(size);
                    entry.last_event = now;
                }
            }
        }
        settled.sort_by(|a, b| a.path.cmp(&b.path));
        settled
    }
}
