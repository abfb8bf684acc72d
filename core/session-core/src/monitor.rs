//! Live change monitoring for monitored roots.
//!
//! One background thread owns a `notify` watcher, the debounce buffer and
//! the per-root availability state. Raw notifications are funneled through a
//! channel into that thread; settled files are classified and proposed
//! through the `forward` callback. The thread exits when the handle is
//! stopped or dropped, or when `forward` reports the receiver is gone.

use crossbeam_channel::{select, Receiver, Sender};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::error::Result;
use crate::filter::{is_ignored_dir_name, FilterEngine};
use crate::pending::PendingBuffer;
use crate::scanner::observe_path;
use crate::types::{Classification, MonitoredRoot, ObservedFile};

const MAX_WAIT: Duration = Duration::from_millis(500);

/// A change proposed by the monitor. The controller decides what it means
/// for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A user file settled after creation or modification.
    Created(ObservedFile),
    /// A tracked path moved; `to` carries the new classification.
    Renamed { from: PathBuf, to: ObservedFile },
    /// Deleted, or moved out of every monitored root.
    Removed { path: PathBuf },
    RootUnavailable(PathBuf),
    RootAvailable(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub quiet_period: Duration,
    pub availability_interval: Duration,
}

/// Stops the monitor thread when dropped.
pub struct MonitorHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the stop channel wakes the thread.
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts watching `roots` on a background thread.
pub fn spawn_monitor<F>(
    roots: Vec<MonitoredRoot>,
    filter: FilterEngine,
    settings: MonitorSettings,
    forward: F,
) -> Result<MonitorHandle>
where
    F: FnMut(ChangeEvent) -> bool + Send + 'static,
{
    let (raw_tx, raw_rx) = crossbeam_channel::unbounded::<notify::Result<Event>>();
    let watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    })?;
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

    let thread = std::thread::Builder::new()
        .name("sessionclean-monitor".to_string())
        .spawn(move || {
            let mut monitor = Monitor {
                watcher,
                roots: roots
                    .into_iter()
                    .filter(|root| root.enabled)
                    .map(|root| WatchedRoot {
                        root,
                        available: false,
                    })
                    .collect(),
                filter,
                pending: PendingBuffer::new(settings.quiet_period),
                availability_interval: settings.availability_interval,
                forward,
                open: true,
            };
            monitor.run(raw_rx, stop_rx);
        })
        .map_err(|err| crate::error::CleanError::io("spawn monitor thread", err))?;

    Ok(MonitorHandle {
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

struct WatchedRoot {
    root: MonitoredRoot,
    available: bool,
}

struct Monitor<F> {
    watcher: RecommendedWatcher,
    roots: Vec<WatchedRoot>,
    filter: FilterEngine,
    pending: PendingBuffer,
    availability_interval: Duration,
    forward: F,
    open: bool,
}

impl<F> Monitor<F>
where
    F: FnMut(ChangeEvent) -> bool,
{
    fn run(&mut self, raw_rx: Receiver<notify::Result<Event>>, stop_rx: Receiver<()>) {
        self.probe_roots();
        let mut next_probe = Instant::now() + self.availability_interval;
        tracing::info!(
            roots = self.roots.len(),
            watching = self.roots.iter().filter(|r| r.available).count(),
            "Change monitor started"
        );

        while self.open {
            let now = Instant::now();
            let wake_at = self
                .pending
                .next_deadline()
                .map(|deadline| deadline.min(next_probe))
                .unwrap_or(next_probe);
            let timeout = wake_at.saturating_duration_since(now).min(MAX_WAIT);

            select! {
                recv(raw_rx) -> msg => match msg {
                    Ok(Ok(event)) => self.handle_event(event, Instant::now()),
                    Ok(Err(err)) => tracing::warn!(error = %err, "Watch error"),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => break,
                default(timeout) => {}
            }

            let now = Instant::now();
            self.flush_settled(now);
            if now >= next_probe {
                self.probe_roots();
                next_probe = now + self.availability_interval;
            }
        }
        tracing::info!("Change monitor stopped");
    }

    fn emit(&mut self, change: ChangeEvent) {
        if self.open && !(self.forward)(change) {
            tracing::debug!("Controller channel closed; stopping monitor");
            self.open = false;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────

    fn handle_event(&mut self, event: Event, now: Instant) {
        match event.kind {
            EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any) => {
                for path in event.paths {
                    self.touch(path, now);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.rename(from.clone(), to.clone(), now);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                // A buffered source stays put so a paired `Both` can re-key it;
                // if none follows, it is dropped as vanished when it settles.
                for path in event.paths {
                    if !self.pending.contains(&path) {
                        self.emit_removed(path);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Single-sided rename: direction inferred from existence.
                for path in event.paths {
                    if path.exists() {
                        self.touch(path, now);
                    } else {
                        self.removed(path);
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    self.removed(path);
                }
            }
            _ => {}
        }
    }

    fn root_for(&self, path: &Path) -> Option<PathBuf> {
        self.roots
            .iter()
            .filter(|watched| watched.available && path.starts_with(&watched.root.path))
            .filter(|watched| watched.root.recursive || path.parent() == Some(&watched.root.path))
            .max_by_key(|watched| watched.root.path.components().count())
            .map(|watched| watched.root.path.clone())
    }

    fn touch(&mut self, path: PathBuf, now: Instant) {
        let Some(root) = self.root_for(&path) else {
            return;
        };
        let metadata = match fs_err::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(_) => return,
        };

        if metadata.is_dir() {
            // Files copied in together with a new directory may predate its watch.
            for entry in WalkDir::new(&path)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0
                        || !entry.file_type().is_dir()
                        || !is_ignored_dir_name(&entry.file_name().to_string_lossy())
                })
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
            {
                let size = entry.metadata().ok().map(|metadata| metadata.len());
                self.pending
                    .touch(&root, entry.path().to_path_buf(), size, now);
            }
            return;
        }
        if metadata.is_file() {
            self.pending.touch(&root, path, Some(metadata.len()), now);
        }
    }

    fn rename(&mut self, from: PathBuf, to: PathBuf, now: Instant) {
        if self.root_for(&to).is_none() {
            self.removed(from);
            return;
        }
        if self.pending.rename(&from, to.clone(), now) {
            tracing::debug!(from = %from.display(), to = %to.display(), "Re-keyed pending file");
            return;
        }
        let Some(root) = self.root_for(&to) else {
            return;
        };
        // The destination may also have been buffered by a create event.
        self.pending.remove(&to);
        match observe_path(&self.filter, &root, &to) {
            Some(observed) => self.emit(ChangeEvent::Renamed { from, to: observed }),
            None => self.removed(from),
        }
    }

    fn removed(&mut self, path: PathBuf) {
        self.pending.remove(&path);
        self.emit_removed(path);
    }

    fn emit_removed(&mut self, path: PathBuf) {
        if self.root_for(&path).is_some() {
            self.emit(ChangeEvent::Removed { path });
        }
    }

    fn flush_settled(&mut self, now: Instant) {
        let settled = self.pending.drain_settled(now, |path| {
            fs_err::symlink_metadata(path)
                .ok()
                .filter(|metadata| metadata.is_file())
                .map(|metadata| metadata.len())
        });
        for file in settled {
            match observe_path(&self.filter, &file.root, &file.path) {
                Some(observed) if observed.classification == Classification::User => {
                    tracing::debug!(path = %observed.path.display(), size = observed.size, "File settled");
                    self.emit(ChangeEvent::Created(observed));
                }
                Some(observed) => {
                    tracing::debug!(
                        path = %observed.path.display(),
                        classification = observed.classification.as_str(),
                        "Settled file is not a user file"
                    );
                }
                None => {}
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Root availability
    // ─────────────────────────────────────────────────────────────────────

    fn probe_roots(&mut self) {
        let mut changes = Vec::new();
        for index in 0..self.roots.len() {
            let path = self.roots[index].root.path.clone();
            let present = self.roots[index].root.is_available();
            let was_available = self.roots[index].available;

            if present && !was_available {
                let mode = if self.roots[index].root.recursive {
                    RecursiveMode::Recursive
                } else {
                    RecursiveMode::NonRecursive
                };
                match self.watcher.watch(&path, mode) {
                    Ok(()) => {
                        tracing::info!(root = %path.display(), "Watching root");
                        self.roots[index].available = true;
                        changes.push(ChangeEvent::RootAvailable(path));
                    }
                    Err(err) => {
                        tracing::warn!(root = %path.display(), error = %err, "Failed to watch root");
                    }
                }
            } else if !present && was_available {
                if let Err(err) = self.watcher.unwatch(&path) {
                    tracing::debug!(root = %path.display(), error = %err, "Unwatch failed");
                }
                let dropped = self.pending.forget_root(&path);
                tracing::info!(root = %path.display(), dropped, "Root became unavailable");
                self.roots[index].available = false;
                changes.push(ChangeEvent::RootUnavailable(path));
            }
        }
        for change in changes {
            self.emit(change);
        }
    }
}

/// Enabled roots that are not mounted right now.
pub fn initial_unavailable(roots: &[MonitoredRoot]) -> Vec<PathBuf> {
    roots
        .iter()
        .filter(|root| root.enabled && !root.is_available())
        .map(|root| root.path.clone())
        .collect()
}
