//! Focus Quest daemon entrypoint.
//!
//! A single-writer host for the session lifecycle: it owns the SQLite-backed
//! game state, persists alarms across restarts, and serves newline-delimited
//! JSON requests over a Unix socket. Missed deadlines are settled at startup
//! and whenever the alarm loop notices the host was suspended.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use focus_core::{load_config, FocusConfig, FocusError, StartRequest, StorageConfig};
use focus_protocol::{
    parse_mark_compromised, parse_resume_session, parse_start_session, ErrorInfo, Method, Request,
    Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::{json, Value};

mod alarms;
mod db;
mod kv;
mod state;

use db::Db;
use state::SharedState;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const ALARM_POLL_INTERVAL_MS: u64 = 1000;

fn main() {
    init_logging();

    let storage = match StorageConfig::from_home() {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "Failed to resolve Focus Quest data directory");
            std::process::exit(1);
        }
    };

    let config = match load_config(&storage.config_file()) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            FocusConfig::default()
        }
    };

    let socket_path = storage.socket_file();
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db = match Db::new(storage.daemon_db_file()) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let shared_state = Arc::new(SharedState::new(db, &config));
    if let Err(err) = shared_state.reconcile_startup() {
        // Not fatal: requests retry the load, and the alarm loop retries on the next gap.
        warn!(error = %err, code = err.code(), "Startup reconciliation failed");
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        retry_attempts = config.retry.max_attempts,
        idle_tick_secs = config.timers.idle_tick_period_secs,
        "Focus daemon started"
    );
    spawn_alarm_loop(Arc::clone(&shared_state));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn spawn_alarm_loop(state: Arc<SharedState>) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(ALARM_POLL_INTERVAL_MS));
        state.poll_alarms();
    });
}

fn init_logging() {
    let debug_enabled = env::var("FOCUS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
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

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = request.method.as_str(), id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
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
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
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

fn handle_request(request: Request, state: &SharedState) -> Response {
    if let Err(err) = request.validate() {
        return Response::error_with_info(request.id, err);
    }

    let Request {
        method, id, params, ..
    } = request;
    let reconciler = state.reconciler();

    let result: Result<Value, Response> = match method {
        Method::GetHealth => {
            let mut data = json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "pending_alarms": state.pending_alarms(),
            });
            if let Ok(value) = serde_json::to_value(state.poll_stats()) {
                data["alarm_poll"] = value;
            }
            Ok(data)
        }
        Method::GetState => reconciler
            .snapshot()
            .map_err(|err| focus_error(&id, err))
            .and_then(|snapshot| {
                let timers = to_data(&id, "timers", &state.timers())?;
                let mut data = to_data(&id, "state", &snapshot)?;
                data["timers"] = timers["timers"].clone();
                Ok(data)
            }),
        Method::StartSession => match parse_start_session(params) {
            Ok(parsed) => reconciler
                .start_session(StartRequest {
                    duration_minutes: parsed.duration_minutes,
                    task_ref: parsed.task_ref,
                    auto_complete_task: parsed.auto_complete_task,
                })
                .map_err(|err| focus_error(&id, err))
                .and_then(|session| to_data(&id, "session", &session)),
            Err(err) => Err(Response::error_with_info(id.clone(), err)),
        },
        Method::PauseSession => reconciler
            .pause_session()
            .map_err(|err| focus_error(&id, err))
            .and_then(|session| to_data(&id, "session", &session)),
        Method::ResumeSession => match parse_resume_session(params) {
            Ok(parsed) => reconciler
                .resume_session(parsed.idle_seconds)
                .map_err(|err| focus_error(&id, err))
                .and_then(|session| to_data(&id, "session", &session)),
            Err(err) => Err(Response::error_with_info(id.clone(), err)),
        },
        Method::MarkCompromised => match parse_mark_compromised(params) {
            Ok(parsed) => reconciler
                .mark_compromised(&parsed.reason)
                .map_err(|err| focus_error(&id, err))
                .and_then(|session| to_data(&id, "session", &session)),
            Err(err) => Err(Response::error_with_info(id.clone(), err)),
        },
        Method::AbandonSession => reconciler
            .abandon_session()
            .map(|active_seconds| json!({ "abandoned": true, "active_seconds": active_seconds }))
            .map_err(|err| focus_error(&id, err)),
        Method::SkipBreak => reconciler
            .skip_break()
            .map(|()| json!({ "skipped": true }))
            .map_err(|err| focus_error(&id, err)),
        Method::GetBackup => reconciler
            .get_backup()
            .map_err(|err| focus_error(&id, err))
            .and_then(|backup| to_data(&id, "backup", &backup)),
        Method::DeleteBackup => reconciler
            .delete_backup()
            .map(|()| json!({ "deleted": true }))
            .map_err(|err| focus_error(&id, err)),
    };

    match result {
        Ok(data) => {
            if method.is_mutation() {
                info!(method = method.as_str(), "Mutation applied");
            }
            Response::ok(id, data)
        }
        Err(response) => response,
    }
}

fn focus_error(id: &Option<String>, err: FocusError) -> Response {
    match &err {
        FocusError::Storage { .. } | FocusError::Scheduler { .. } | FocusError::Json { .. } => {
            error!(error = %err, code = err.code(), "Request failed")
        }
        _ => tracing::debug!(error = %err, code = err.code(), "Request rejected"),
    }
    Response::error(id.clone(), err.code(), err.to_string())
}

/// Serializes `value` as `{ key: value }`.
fn to_data(id: &Option<String>, key: &str, value: &impl Serialize) -> Result<Value, Response> {
    let value = serde_json::to_value(value).map_err(|err| {
        Response::error(
            id.clone(),
            "serialization_error",
            format!("Failed to serialize {}: {}", key, err),
        )
    })?;
    let mut data = serde_json::Map::new();
    data.insert(key.to_string(), value);
    Ok(Value::Object(data))
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
