//! # sessionclean-core
//!
//! Session tracking engine for SessionClean: remembers the files a user
//! creates during a working session and lets them keep or trash those files
//! before the machine shuts down.
//!
//! ## Components
//!
//! - [`filter`]: pure classification of a path as user, system or ignored
//! - [`store`]: SQLite store; the only durable state
//! - [`scanner`]: lazy snapshot walk and session seeding
//! - [`monitor`]: `notify`-based watcher with a debounce buffer
//! - [`lifecycle`]: the session state machine, driven through a channel
//! - [`executor`]: applies review decisions via the platform trash
//!
//! ## Design Principles
//!
//! - **Synchronous**: threads and channels, no async runtime.
//! - **Crash-safe**: every store mutation is committed before it returns; a
//!   session left open is resumed on the next start.
//! - **Never unlink**: deletion only ever moves files to the trash.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sessionclean_core::*;
//!
//! let config = load_config(None)?;
//! let store = Store::new(db_path()?)?;
//! let filter = FilterEngine::new(&config)?;
//! let controller = Controller::start(store, filter, &config, trash, presenter, sink)?;
//! let (tx, rx) = control_channel();
//! std::thread::spawn(move || controller.run(rx));
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod files;
pub mod filter;
pub mod lifecycle;
pub mod monitor;
pub mod pending;
pub mod scanner;
pub mod store;
pub mod types;

pub use config::*;
pub use error::{CleanError, Result};
pub use executor::{apply, SystemTrash, Trash};
pub use files::{file_category, file_type, format_size};
pub use filter::{FileMeta, FilterEngine};
pub use lifecycle::{
    control_channel, ControlEvent, Controller, ReviewPresenter, ShutdownAck, StatusSink,
};
pub use monitor::{spawn_monitor, ChangeEvent, MonitorHandle, MonitorSettings};
pub use scanner::{scan, seed_session, SeedMode, SeedSummary};
pub use store::Store;
pub use types::*;
