//! Client for the focus daemon socket.
//!
//! The daemon is the only writer; this module never touches state files.
//! A request that could not be delivered at all is retried once with the
//! same id. A request that reached the daemon is never resent, since
//! mutations are not idempotent.

use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use focus_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};
use serde_json::Value;

pub const SOCKET_ENV: &str = "FOCUS_DAEMON_SOCKET";
const DATA_DIR: &str = ".focusquest";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 3000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Could not reach focus-daemon at {path}: {source}")]
    Unreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Daemon I/O failed: {0}")]
    Transport(String),

    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

impl ClientError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Daemon { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    /// Explicit path, then `FOCUS_DAEMON_SOCKET`, then `~/.focusquest/daemon.sock`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, ClientError> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        if let Ok(path) = env::var(SOCKET_ENV) {
            if !path.trim().is_empty() {
                return Ok(Self::new(PathBuf::from(path)));
            }
        }
        let home = dirs::home_dir().ok_or(ClientError::HomeDirNotFound)?;
        Ok(Self::new(home.join(DATA_DIR).join(SOCKET_NAME)))
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Sends one request and returns the `data` payload of a successful response.
    pub fn call(&self, method: Method, params: Option<Value>) -> Result<Value, ClientError> {
        let request = Request::new(method, Some(make_request_id()), params);
        let response = match self.send(&request) {
            Err(ClientError::Unreachable { source, .. }) => {
                tracing::warn!(
                    method = method.as_str(),
                    error = %source,
                    "Daemon unreachable; retrying once"
                );
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                self.send(&request)?
            }
            other => other?,
        };

        if response.id != request.id {
            tracing::warn!(
                sent = ?request.id,
                received = ?response.id,
                "Daemon response id mismatch"
            );
        }

        if response.ok {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            let (code, message) = response
                .error
                .map(|err| (err.code, err.message))
                .unwrap_or_else(|| ("unknown".to_string(), "Unknown daemon error".to_string()));
            tracing::debug!(method = method.as_str(), code = %code, "Daemon rejected request");
            Err(ClientError::Daemon { code, message })
        }
    }

    fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream =
            UnixStream::connect(&self.socket).map_err(|source| ClientError::Unreachable {
                path: self.socket.clone(),
                source,
            })?;
        let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        serde_json::to_writer(&mut stream, request)
            .map_err(|err| ClientError::Transport(format!("Failed to write request: {}", err)))?;
        stream
            .write_all(b"\n")
            .map_err(|err| ClientError::Transport(format!("Failed to flush request: {}", err)))?;
        stream.flush().ok();

        read_response(&mut stream)
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                // Snapshots can be larger than requests; allow some headroom.
                if buffer.len() > MAX_REQUEST_BYTES * 16 {
                    return Err(ClientError::Transport(
                        "Response exceeded maximum size".to_string(),
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
                return Err(ClientError::Transport(
                    "Timed out waiting for daemon response".to_string(),
                ));
            }
            Err(err) => {
                return Err(ClientError::Transport(format!(
                    "Failed to read response: {}",
                    err
                )))
            }
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::Transport(
            "Daemon response was empty".to_string(),
        ));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::Transport(format!("Failed to parse response JSON: {}", err)))
}

fn make_request_id() -> String {
    format!("cli-{}", ulid::Ulid::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use focus_protocol::ErrorInfo;
    use serde_json::json;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn read_request(stream: &mut UnixStream) -> Request {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer.contains(&b'\n') {
                break;
            }
        }
        let end = buffer.iter().position(|b| *b == b'\n').unwrap_or(buffer.len());
        serde_json::from_slice(&buffer[..end]).unwrap()
    }

    fn reply(stream: &mut UnixStream, response: &Response) {
        let mut payload = serde_json::to_vec(response).unwrap();
        payload.push(b'\n');
        stream.write_all(&payload).unwrap();
    }

    /// Answers a single connection, echoing the request id.
    fn serve_once(
        listener: UnixListener,
        respond: fn(Option<String>) -> Response,
    ) -> thread::JoinHandle<Request> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            reply(&mut stream, &respond(request.id.clone()));
            request
        })
    }

    #[test]
    fn returns_data_for_ok_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = serve_once(listener, |id| Response::ok(id, json!({"status": "ok"})));

        let client = DaemonClient::new(path);
        let data = client.call(Method::GetHealth, None).unwrap();
        assert_eq!(data["status"], "ok");

        let seen = server.join().unwrap();
        assert_eq!(seen.method, Method::GetHealth);
        assert!(seen.id.as_deref().unwrap().starts_with("cli-"));
    }

    #[test]
    fn daemon_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = serve_once(listener, |id| {
            Response::error_with_info(
                id,
                ErrorInfo::new("conflict_error", "Conflict: a session is already active"),
            )
        });

        let client = DaemonClient::new(path);
        let err = client
            .call(Method::StartSession, Some(json!({"duration_minutes": 25})))
            .unwrap_err();
        assert_eq!(err.code(), Some("conflict_error"));
        assert_eq!(server.join().unwrap().method, Method::StartSession);
    }

    #[test]
    fn missing_socket_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(dir.path().join("absent.sock"));
        match client.call(Method::GetHealth, None) {
            Err(ClientError::Unreachable { path, .. }) => {
                assert_eq!(path, dir.path().join("absent.sock"))
            }
            other => panic!("expected Unreachable, got {:?}", other),
        }
    }

    #[test]
    fn explicit_socket_wins() {
        let client = DaemonClient::resolve(Some(PathBuf::from("/tmp/x.sock"))).unwrap();
        assert_eq!(client.socket(), Path::new("/tmp/x.sock"));
    }
}
