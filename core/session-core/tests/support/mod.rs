#![allow(dead_code)]

use sessionclean_core::{
    AppConfig, Controller, FilterEngine, MonitoredRoot, ReviewOffer, ReviewPresenter,
    StatusSink, Store, Trash, TrayStatus,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Trash stand-in that records every call and never touches the disk.
#[derive(Clone, Default)]
pub struct FakeTrash {
    pub calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeTrash {
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl Trash for FakeTrash {
    fn move_to_trash(&self, path: &Path) -> Result<(), String> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingPresenter {
    pub offers: Arc<Mutex<Vec<ReviewOffer>>>,
}

impl ReviewPresenter for RecordingPresenter {
    fn present(&self, offer: &ReviewOffer) {
        self.offers.lock().unwrap().push(offer.clone());
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub statuses: Arc<Mutex<Vec<TrayStatus>>>,
}

impl RecordingSink {
    pub fn last(&self) -> Option<TrayStatus> {
        self.statuses.lock().unwrap().last().cloned()
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, status: &TrayStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }
}

/// A temp home with an empty `Downloads` root and a store.
pub struct Fixture {
    pub dir: TempDir,
    pub downloads: PathBuf,
    pub config: AppConfig,
    pub trash: FakeTrash,
    pub presenter: RecordingPresenter,
    pub sink: RecordingSink,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let downloads = dir.path().join("Downloads");
        std::fs::create_dir_all(&downloads).expect("create Downloads");
        let config = AppConfig {
            roots: vec![MonitoredRoot::new(&downloads)],
            review_timeout_secs: 5,
            ..AppConfig::default()
        };
        Self {
            dir,
            downloads,
            config,
            trash: FakeTrash::default(),
            presenter: RecordingPresenter::default(),
            sink: RecordingSink::default(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("state").join("session.db")
    }

    pub fn store(&self) -> Store {
        Store::new(self.db_path()).expect("store")
    }

    pub fn start(&self) -> Controller {
        let filter = FilterEngine::new(&self.config).expect("filter");
        Controller::start(
            self.store(),
            filter,
            &self.config,
            Box::new(self.trash.clone()),
            Box::new(self.presenter.clone()),
            Box::new(self.sink.clone()),
        )
        .expect("controller start")
    }

    /// Writes a file under Downloads, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.downloads.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write file");
        path
    }
}

pub fn candidate_paths(offer: &ReviewOffer) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = offer.candidates.iter().map(|c| c.path.clone()).collect();
    paths.sort();
    paths
}
