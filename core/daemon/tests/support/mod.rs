#![allow(dead_code)]

use sessionclean_daemon_protocol::{Method, Request, Response};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub struct DaemonGuard {
    child: Child,
}

impl DaemonGuard {
    /// Sends SIGTERM, as the OS does on logout or shutdown.
    pub fn terminate(&self) {
        // SAFETY: plain signal delivery to our own child process.
        let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM) };
        assert_eq!(rc, 0, "failed to signal daemon");
    }

    pub fn wait_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().expect("poll daemon") {
                return Some(status);
            }
            sleep(Duration::from_millis(50));
        }
        None
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A temp HOME with a `Downloads` root and an app dir holding `config.toml`.
pub struct DaemonHome {
    pub dir: TempDir,
    pub downloads: PathBuf,
}

impl DaemonHome {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp HOME");
        let downloads = dir.path().join("Downloads");
        std::fs::create_dir_all(&downloads).expect("create Downloads");
        std::fs::create_dir_all(dir.path().join("app")).expect("create app dir");
        let config = format!(
            r#"quiet_period_secs = 1
review_timeout_secs = 5
availability_interval_secs = 1

[[roots]]
path = "{}"
"#,
            downloads.display()
        );
        std::fs::write(dir.path().join("app").join("config.toml"), config)
            .expect("write config");
        Self { dir, downloads }
    }

    pub fn app_dir(&self) -> PathBuf {
        self.dir.path().join("app")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.app_dir().join("daemon.sock")
    }

    pub fn spawn(&self) -> DaemonGuard {
        let child = Command::new(env!("CARGO_BIN_EXE_sessionclean-daemon"))
            .env("HOME", self.dir.path())
            .env("SESSIONCLEAN_HOME", self.app_dir())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn sessionclean-daemon");
        let guard = DaemonGuard { child };
        wait_for_socket(&self.socket_path(), Duration::from_secs(10));
        guard
    }
}

pub fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for daemon socket at {}", path.display());
}

pub fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("failed to serialize request");
    stream.write_all(b"\n").expect("failed to write request");
    stream.flush().expect("failed to flush request");
    read_response(&mut stream)
}

pub fn call(socket: &Path, method: Method, params: Option<serde_json::Value>) -> Response {
    send_request(socket, Request::new(method, params))
}

pub fn send_raw_request(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to daemon socket");
    stream.write_all(payload).expect("failed to write payload");
    stream.flush().expect("failed to flush payload");
    read_response(&mut stream)
}

pub fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };
    serde_json::from_slice(response_bytes).expect("failed to parse response JSON")
}

pub fn error_code(response: &Response) -> Option<&str> {
    response.error.as_ref().map(|err| err.code.as_str())
}
