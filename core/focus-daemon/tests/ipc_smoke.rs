use focus_protocol::{Method, Request, Response, PROTOCOL_VERSION};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> DaemonGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_focus-daemon"))
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn focus-daemon");
    DaemonGuard { child }
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".focusquest").join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn start_daemon(home: &Path) -> DaemonGuard {
    let guard = spawn_daemon(home);
    wait_for_socket(&socket_path(home), Duration::from_secs(5));
    guard
}

fn send_raw(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    stream.write_all(payload).expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn send(socket: &Path, method: Method, params: Option<Value>) -> Response {
    let request = Request::new(method, Some(format!("req-{}", method.as_str())), params);
    let mut payload = serde_json::to_vec(&request).expect("Failed to serialize request");
    payload.push(b'\n');
    send_raw(socket, &payload)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
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

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn error_code(response: &Response) -> &str {
    assert!(!response.ok, "expected an error response");
    response
        .error
        .as_ref()
        .map(|error| error.code.as_str())
        .expect("error payload missing")
}

#[test]
fn test_health_reports_protocol_version() {
    let home = TempDir::new().unwrap();
    let _daemon = start_daemon(home.path());
    let socket = socket_path(home.path());

    let response = send(&socket, Method::GetHealth, None);
    assert!(response.ok);
    assert_eq!(response.id.as_deref(), Some("req-get_health"));
    let data = response.data.unwrap();
    assert_eq!(data["status"], "ok");
    assert_eq!(data["protocol_version"], json!(PROTOCOL_VERSION));
}

#[test]
fn test_session_lifecycle_over_socket() {
    let home = TempDir::new().unwrap();
    let _daemon = start_daemon(home.path());
    let socket = socket_path(home.path());

    let started = send(
        &socket,
        Method::StartSession,
        Some(json!({"duration_minutes": 30})),
    );
    assert!(started.ok, "start failed: {:?}", started.error);
    assert_eq!(started.data.unwrap()["session"]["durationMinutes"], 30);

    let conflict = send(&socket, Method::StartSession, None);
    assert_eq!(error_code(&conflict), "conflict_error");

    let paused = send(&socket, Method::PauseSession, None);
    assert!(paused.ok);
    assert_eq!(paused.data.unwrap()["session"]["isPaused"], true);

    let resumed = send(
        &socket,
        Method::ResumeSession,
        Some(json!({"idle_seconds": 0})),
    );
    assert!(resumed.ok);
    assert_eq!(resumed.data.unwrap()["session"]["isPaused"], false);

    let compromised = send(
        &socket,
        Method::MarkCompromised,
        Some(json!({"reason": "phone"})),
    );
    assert!(compromised.ok);
    assert_eq!(compromised.data.unwrap()["session"]["isCompromised"], true);

    let state = send(&socket, Method::GetState, None);
    let data = state.data.unwrap();
    assert_eq!(data["state"]["session"]["compromiseReason"], "phone");
    assert_eq!(data["timers"].as_array().map(Vec::len), Some(3));

    let abandoned = send(&socket, Method::AbandonSession, None);
    assert!(abandoned.ok);

    let state = send(&socket, Method::GetState, None).data.unwrap();
    assert!(state["state"]["session"].is_null());
    assert_eq!(state["state"]["statistics"]["abandonedSessions"], 1);

    let again = send(&socket, Method::PauseSession, None);
    assert_eq!(error_code(&again), "not_active_error");
}

#[test]
fn test_invalid_params_are_rejected() {
    let home = TempDir::new().unwrap();
    let _daemon = start_daemon(home.path());
    let socket = socket_path(home.path());

    let response = send(
        &socket,
        Method::StartSession,
        Some(json!({"duration_minutes": 3})),
    );
    assert_eq!(error_code(&response), "invalid_duration");

    let response = send(&socket, Method::MarkCompromised, None);
    assert_eq!(error_code(&response), "missing_params");

    let response = send(&socket, Method::SkipBreak, None);
    assert_eq!(error_code(&response), "not_active_error");
}

#[test]
fn test_malformed_requests_get_error_responses() {
    let home = TempDir::new().unwrap();
    let _daemon = start_daemon(home.path());
    let socket = socket_path(home.path());

    let response = send_raw(&socket, b"{not json\n");
    assert_eq!(error_code(&response), "invalid_json");

    let response = send_raw(&socket, b"   \n");
    assert_eq!(error_code(&response), "empty_request");

    let response = send_raw(
        &socket,
        b"{\"protocol_version\":99,\"method\":\"get_health\"}\n",
    );
    assert_eq!(error_code(&response), "protocol_mismatch");
}

#[test]
fn test_backup_slot_is_empty_then_deletable() {
    let home = TempDir::new().unwrap();
    let _daemon = start_daemon(home.path());
    let socket = socket_path(home.path());

    let response = send(&socket, Method::GetBackup, None);
    assert!(response.ok);
    assert!(response.data.unwrap()["backup"].is_null());

    let response = send(&socket, Method::DeleteBackup, None);
    assert!(response.ok);
    assert_eq!(response.data.unwrap()["deleted"], true);
}

#[test]
fn test_active_session_survives_restart() {
    let home = TempDir::new().unwrap();
    let socket = socket_path(home.path());

    {
        let _daemon = start_daemon(home.path());
        let started = send(
            &socket,
            Method::StartSession,
            Some(json!({"duration_minutes": 45, "task_ref": "task-1"})),
        );
        assert!(started.ok);
    }

    let _daemon = start_daemon(home.path());
    let state = send(&socket, Method::GetState, None).data.unwrap();
    assert_eq!(state["state"]["session"]["durationMinutes"], 45);
    assert_eq!(state["state"]["session"]["taskRef"], "task-1");

    let session_timer = state["timers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|timer| timer["kind"] == "sessionEnd")
        .cloned()
        .unwrap();
    assert_eq!(session_timer["phase"], "armed");
    assert!(session_timer["fires_at"].is_string());
}
