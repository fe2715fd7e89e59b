use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};

pub const CMD_STATUS: &str = "status";
pub const CMD_RECONCILE: &str = "reconcile";
pub const CMD_STOP: &str = "stop";

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// How long `status` keeps looking for a daemon that is still binding its socket.
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Open the control socket. A missing socket file, or one nobody accepts
/// on (left by a daemon that was killed), both mean no daemon is running.
fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    UnixStream::connect(socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused => DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        },
        _ => io_err(socket, err),
    })
}

/// One request line out, one response line back.
pub fn send_request(socket: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let stream = connect(socket)?;

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    (&stream).write_all(&line).map_err(|e| io_err(socket, e))?;

    let mut reply = String::new();
    BufReader::new(&stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(socket, e))?;
    if reply.is_empty() {
        return Err(DaemonError::Protocol(format!(
            "gitops daemon at {} hung up without answering '{}'",
            socket.display(),
            request.cmd
        )));
    }

    Ok(serde_json::from_str(reply.trim_end())?)
}

/// Status snapshot. Right after `gitops start` the socket may not be bound
/// yet, so a missing daemon is retried for a short grace period.
pub fn request_status(socket: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new(CMD_STATUS);
    let deadline = Instant::now() + STARTUP_GRACE;
    loop {
        match send_request(socket, &request) {
            Err(DaemonError::DaemonNotRunning { .. }) if Instant::now() < deadline => {
                sleep(RETRY_INTERVAL)
            }
            result => return result.and_then(response_into_data),
        }
    }
}

pub fn request_stop(socket: &Path) -> Result<(), DaemonError> {
    let response = send_request(socket, &DaemonRequest::new(CMD_STOP))?;
    response_into_data(response).map(|_| ())
}

/// Run one cycle now and wait for its record. Fails while a cycle is in flight.
pub fn request_reconcile(socket: &Path) -> Result<Value, DaemonError> {
    let response = send_request(socket, &DaemonRequest::new(CMD_RECONCILE))?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
