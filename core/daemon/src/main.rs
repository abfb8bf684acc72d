//! SessionClean daemon entrypoint.
//!
//! A single-writer service: the controller thread owns every session
//! transition, the monitor thread proposes changes, a signal watcher turns
//! SIGTERM/SIGINT/SIGHUP into a final review, and a Unix socket serves the
//! review UI and tray.

use fs_err as fs;
use std::env;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use sessionclean_core::{
    backoff_path, control_channel, db_path, load_config, log_dir, socket_path, spawn_monitor,
    ControlEvent, Controller, FilterEngine, MonitorSettings, ReviewOffer, ReviewPresenter,
    StatusSink, Store, SystemTrash, TrayStatus,
};

mod backoff;
mod ipc;
mod signals;

use ipc::ServerContext;

const LOG_FILE_PREFIX: &str = "sessionclean-daemon.log";
/// Added to the review timeout before the process stops waiting for the
/// shutdown acknowledgement.
const SHUTDOWN_GRACE_MARGIN: Duration = Duration::from_secs(15);

/// Announces offers in the log; clients pick them up with `get_review`.
struct LogPresenter;

impl ReviewPresenter for LogPresenter {
    fn present(&self, offer: &ReviewOffer) {
        info!(
            session_id = %offer.session_id,
            round = offer.round,
            trigger = offer.trigger.as_str(),
            candidates = offer.candidates.len(),
            deadline = ?offer.deadline,
            "Review offered"
        );
    }
}

struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn publish(&self, status: &TrayStatus) {
        tracing::debug!(
            session_id = %status.session_id,
            phase = %status.phase,
            tracked = status.tracked,
            pending = status.pending,
            unavailable_roots = status.unavailable_roots.len(),
            "Status updated"
        );
    }
}

fn main() {
    let log_guard = init_logging();

    let backoff_path = match backoff_path() {
        Ok(path) => {
            backoff::apply_startup_backoff(&path);
            Some(path)
        }
        Err(err) => {
            warn!(error = %err, "Failed to resolve daemon backoff path");
            None
        }
    };

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let filter = match FilterEngine::new(&config) {
        Ok(filter) => filter,
        Err(err) => {
            error!(error = %err, "Invalid filter rules");
            std::process::exit(1);
        }
    };

    let store = match db_path().and_then(Store::new) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to open session store");
            std::process::exit(1);
        }
    };

    let (control_tx, control_rx) = control_channel();
    let controller = match Controller::start(
        store,
        filter.clone(),
        &config,
        Box::new(SystemTrash),
        Box::new(LogPresenter),
        Box::new(LogStatusSink),
    ) {
        Ok(controller) => controller,
        Err(err) => {
            error!(error = %err, code = err.code(), "Failed to start session");
            std::process::exit(1);
        }
    };
    info!(
        session_id = %controller.session().id,
        phase = %controller.session().phase,
        roots = config.enabled_roots().len(),
        "Session ready"
    );
    thread::spawn(move || controller.run(control_rx));

    let monitor_tx = control_tx.clone();
    let _monitor = match spawn_monitor(
        config.enabled_roots(),
        filter,
        MonitorSettings {
            quiet_period: config.quiet_period(),
            availability_interval: config.availability_interval(),
        },
        move |change| monitor_tx.send(ControlEvent::Change(change)).is_ok(),
    ) {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "Failed to start change monitor");
            std::process::exit(1);
        }
    };

    let socket_path = match socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = signals::install() {
        error!(error = %err, "Failed to install shutdown signal handlers");
        std::process::exit(1);
    }
    signals::spawn_shutdown_watcher(
        control_tx.clone(),
        config.review_timeout() + SHUTDOWN_GRACE_MARGIN,
        socket_path.clone(),
        log_guard,
    );

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "SessionClean daemon started");

    let context = Arc::new(ServerContext {
        control: control_tx,
        backoff_path,
        started_at: Instant::now(),
    });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let context = Arc::clone(&context);
                thread::spawn(move || ipc::handle_connection(stream, context));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

/// Logs to stderr and to a daily file under the log directory. The returned
/// guard flushes the file writer and must live until exit.
fn init_logging() -> Option<WorkerGuard> {
    let debug_enabled = env::var("SESSIONCLEAN_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (file_layer, guard) = match log_dir().map(|dir| fs::create_dir_all(&dir).map(|()| dir)) {
        Ok(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}
