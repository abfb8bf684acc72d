//! Unix-socket request handling.
//!
//! One newline-terminated JSON request per connection, one JSON response
//! back. Requests never touch the store directly: each method becomes a
//! `ControlEvent` for the controller thread and waits for its reply.

use crossbeam_channel::Sender;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use sessionclean_core::{CleanError, ControlEvent, Decision, DecisionBatch, ReviewOffer};
use sessionclean_daemon_protocol::{
    parse_submit_decisions, DecisionValue, ErrorInfo, Method, Request, Response,
    SubmitDecisionsParams, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

use crate::backoff;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const CONTROL_SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Long enough for a large batch to be moved to the trash.
const CONTROL_REPLY_TIMEOUT: Duration = Duration::from_secs(120);

/// State shared by connection threads.
pub struct ServerContext {
    pub control: Sender<ControlEvent>,
    pub backoff_path: Option<PathBuf>,
    pub started_at: Instant,
}

pub fn handle_connection(mut stream: UnixStream, context: Arc<ServerContext>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let _ = write_response(&mut stream, Response::error_with_info(None, err));
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &context);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
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
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn write_response(stream: &mut UnixStream, response: Response) -> Result<(), String> {
    let mut payload = serde_json::to_vec(&response)
        .map_err(|err| format!("Failed to serialize response: {}", err))?;
    payload.push(b'\n');
    stream
        .write_all(&payload)
        .map_err(|err| format!("Failed to write response: {}", err))
}

fn handle_request(request: Request, context: &ServerContext) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    match request.method {
        Method::GetHealth => Response::ok(id, health(context)),
        Method::GetStatus => respond(
            id,
            call(context, |reply| ControlEvent::GetStatus { reply })
                .and_then(|status| status.map_err(clean_error)),
        ),
        Method::GetReview => respond(id, current_review(context)),
        Method::ReviewNow => respond(
            id,
            call(context, |reply| ControlEvent::ReviewRequested { reply: Some(reply) })
                .and_then(|offer| offer.map_err(clean_error)),
        ),
        Method::SubmitDecisions => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(
                        id,
                        "invalid_params",
                        "session_id and round are required",
                    )
                }
            };
            let parsed = match parse_submit_decisions(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            let batch = match build_batch(context, parsed) {
                Ok(batch) => batch,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(
                id,
                call(context, |reply| ControlEvent::SubmitDecisions { batch, reply })
                    .and_then(|report| report.map_err(clean_error)),
            )
        }
        Method::DismissReview => respond(
            id,
            call(context, |reply| ControlEvent::DismissReview { reply })
                .and_then(|result| result.map_err(clean_error))
                .map(|()| serde_json::json!({ "dismissed": true })),
        ),
        Method::Rescan => respond(
            id,
            send(context, ControlEvent::Rescan).map(|()| serde_json::json!({ "queued": true })),
        ),
    }
}

fn health(context: &ServerContext) -> Value {
    let mut data = serde_json::json!({
        "status": "ok",
        "pid": std::process::id(),
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": PROTOCOL_VERSION,
        "uptime_secs": context.started_at.elapsed().as_secs(),
    });
    if let Some(snapshot) = context.backoff_path.as_deref().and_then(backoff::snapshot) {
        if let Ok(value) = serde_json::to_value(snapshot) {
            data["backoff"] = value;
        }
    }
    data
}

fn current_review(context: &ServerContext) -> Result<Option<ReviewOffer>, ErrorInfo> {
    call(context, |reply| ControlEvent::GetReview { reply })
}

/// Expands the `all` shortcut against the offered round; explicit entries win.
fn build_batch(
    context: &ServerContext,
    params: SubmitDecisionsParams,
) -> Result<DecisionBatch, ErrorInfo> {
    let mut decisions: BTreeMap<PathBuf, Decision> = BTreeMap::new();

    if let Some(all) = params.all {
        let offer = current_review(context)?
            .filter(|offer| offer.session_id == params.session_id && offer.round == params.round)
            .ok_or_else(|| {
                ErrorInfo::new(
                    "no_review",
                    format!(
                        "no review is offered for session {} round {}",
                        params.session_id, params.round
                    ),
                )
            })?;
        decisions.extend(
            DecisionBatch::uniform(&offer, decision_from(all))
                .decisions
                .into_iter(),
        );
    }

    for (path, value) in params.decisions {
        decisions.insert(PathBuf::from(path), decision_from(value));
    }

    Ok(DecisionBatch {
        session_id: params.session_id,
        round: params.round,
        decisions,
    })
}

fn decision_from(value: DecisionValue) -> Decision {
    match value {
        DecisionValue::Keep => Decision::Keep,
        DecisionValue::Delete => Decision::Delete,
    }
}

fn send(context: &ServerContext, event: ControlEvent) -> Result<(), ErrorInfo> {
    context
        .control
        .send_timeout(event, CONTROL_SEND_TIMEOUT)
        .map_err(|err| {
            ErrorInfo::new(
                "controller_unavailable",
                format!("controller did not accept the request: {}", err),
            )
        })
}

fn call<T>(
    context: &ServerContext,
    event: impl FnOnce(Sender<T>) -> ControlEvent,
) -> Result<T, ErrorInfo> {
    let (reply, replied) = crossbeam_channel::bounded(1);
    send(context, event(reply))?;
    replied.recv_timeout(CONTROL_REPLY_TIMEOUT).map_err(|err| {
        ErrorInfo::new(
            "controller_timeout",
            format!("controller did not reply: {}", err),
        )
    })
}

fn clean_error(err: CleanError) -> ErrorInfo {
    ErrorInfo::new(err.code(), err.to_string())
}

fn respond<T: Serialize>(id: Option<String>, result: Result<T, ErrorInfo>) -> Response {
    match result {
        Ok(data) => match serde_json::to_value(data) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize response: {}", err),
            ),
        },
        Err(err) => Response::error_with_info(id, err),
    }
}
