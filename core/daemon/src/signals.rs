//! Shutdown interception.
//!
//! SIGTERM, SIGINT and SIGHUP only set a flag. A watcher thread turns the
//! flag into a `ShutdownRequested` event and lets the process exit once the
//! controller acknowledges, or once the hard grace period runs out.

use crossbeam_channel::Sender;
use fs_err as fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use sessionclean_core::{ControlEvent, ShutdownAck};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_signal: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn install() -> Result<(), String> {
    for signal in [libc::SIGTERM, libc::SIGINT, libc::SIGHUP] {
        // SAFETY: the handler only performs an atomic store, which is
        // async-signal-safe.
        let previous = unsafe { libc::signal(signal, on_shutdown_signal as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(format!(
                "Failed to install handler for signal {}: {}",
                signal,
                std::io::Error::last_os_error()
            ));
        }
    }
    Ok(())
}

/// Spawns the thread that forwards an intercepted signal to the controller.
///
/// `grace` bounds how long the process waits for the acknowledgement; it
/// should exceed the review timeout so the timeout fallback gets to run.
/// `log_guard` is dropped before exiting so the file log is flushed.
pub fn spawn_shutdown_watcher(
    control: Sender<ControlEvent>,
    grace: Duration,
    socket_path: PathBuf,
    log_guard: Option<WorkerGuard>,
) {
    thread::spawn(move || {
        while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
        }
        info!("Shutdown signal received; requesting final review");

        let code = match request_shutdown(&control, grace) {
            Ok(ShutdownAck::Proceed) => {
                info!("Session closed; shutting down");
                0
            }
            Ok(ShutdownAck::Abort(reason)) => {
                warn!(reason = %reason, "Final writes failed; session left open for resume");
                1
            }
            Err(err) => {
                error!(error = %err, "No shutdown acknowledgement; exiting anyway");
                1
            }
        };

        let _ = control.send(ControlEvent::Stop);
        if let Err(err) = fs::remove_file(&socket_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %err, "Failed to remove daemon socket");
            }
        }
        drop(log_guard);
        std::process::exit(code);
    });
}

fn request_shutdown(control: &Sender<ControlEvent>, grace: Duration) -> Result<ShutdownAck, String> {
    let (ack, acked) = crossbeam_channel::bounded(1);
    control
        .send_timeout(ControlEvent::ShutdownRequested { ack }, grace)
        .map_err(|err| format!("controller did not accept shutdown request: {}", err))?;
    acked
        .recv_timeout(grace)
        .map_err(|err| format!("controller did not acknowledge shutdown: {}", err))
}
