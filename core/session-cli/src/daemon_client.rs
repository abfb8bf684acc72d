//! Client for the sessionclean daemon socket.
//!
//! The daemon is the only writer; the CLI never opens the store itself.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use sessionclean_daemon_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};

const SOCKET_ENV: &str = "SESSIONCLEAN_DAEMON_SOCKET";
const WRITE_TIMEOUT_MS: u64 = 2_000;
/// Applying a large batch moves every file to the trash before replying.
const READ_TIMEOUT_SECS: u64 = 180;

pub struct DaemonClient {
    socket: PathBuf,
    read_timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket: PathBuf) -> Self {
        Self {
            socket,
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }

    /// Uses `$SESSIONCLEAN_DAEMON_SOCKET`, else the app directory's socket.
    pub fn from_env() -> Result<Self, String> {
        if let Some(path) = env::var_os(SOCKET_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::new(PathBuf::from(path)));
        }
        sessionclean_core::socket_path()
            .map(Self::new)
            .map_err(|err| err.to_string())
    }

    #[cfg(test)]
    fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sends one request and decodes the `data` payload of a successful reply.
    pub fn call<T: DeserializeOwned>(&self, method: Method, params: Option<Value>) -> Result<T, String> {
        let response = self.send_request(Request::new(method, params))?;
        if !response.ok {
            return Err(response
                .error
                .map(|err| format!("{}: {}", err.code, err.message))
                .unwrap_or_else(|| "Unknown daemon error".to_string()));
        }
        serde_json::from_value(response.data.unwrap_or(Value::Null))
            .map_err(|err| format!("Unexpected daemon payload for {:?}: {}", method, err))
    }

    fn send_request(&self, request: Request) -> Result<Response, String> {
        let mut stream = UnixStream::connect(&self.socket).map_err(|err| {
            format!(
                "Failed to connect to daemon socket {}: {} (is sessionclean-daemon running?)",
                self.socket.display(),
                err
            )
        })?;
        let _ = stream.set_read_timeout(Some(self.read_timeout));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        serde_json::to_writer(&mut stream, &request)
            .map_err(|err| format!("Failed to write request: {}", err))?;
        stream
            .write_all(b"\n")
            .map_err(|err| format!("Failed to flush request: {}", err))?;
        stream.flush().ok();

        read_response(&mut stream)
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };
    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}
