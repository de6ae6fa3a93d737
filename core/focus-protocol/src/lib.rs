//! IPC protocol types and validation for focus-daemon.
//!
//! Shared by the daemon and its clients so the wire format cannot drift.
//! Requests and responses are single JSON objects, one per line, over a Unix
//! socket. The daemon remains the authority on validation; clients reuse the
//! same param types to build requests it will accept.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

pub const MIN_SESSION_MINUTES: u32 = 5;
pub const MAX_SESSION_MINUTES: u32 = 120;
pub const MAX_TASK_REF_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 512;
/// Upper bound for a client-reported idle figure (one day).
pub const MAX_IDLE_SECONDS: u64 = 24 * 60 * 60;
pub const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetState,
    StartSession,
    PauseSession,
    ResumeSession,
    MarkCompromised,
    AbandonSession,
    SkipBreak,
    GetBackup,
    DeleteBackup,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetHealth => "get_health",
            Method::GetState => "get_state",
            Method::StartSession => "start_session",
            Method::PauseSession => "pause_session",
            Method::ResumeSession => "resume_session",
            Method::MarkCompromised => "mark_compromised",
            Method::AbandonSession => "abandon_session",
            Method::SkipBreak => "skip_break",
            Method::GetBackup => "get_backup",
            Method::DeleteBackup => "delete_backup",
        }
    }

    /// Whether the method changes the game-state document.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Method::StartSession
                | Method::PauseSession
                | Method::ResumeSession
                | Method::MarkCompromised
                | Method::AbandonSession
                | Method::SkipBreak
                | Method::DeleteBackup
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: Option<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id,
            params,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ErrorInfo::new(
                "protocol_mismatch",
                format!(
                    "protocol_version {} is not supported (expected {})",
                    self.protocol_version, PROTOCOL_VERSION
                ),
            ));
        }
        if let Some(id) = &self.id {
            if id.len() > MAX_REQUEST_ID_LEN {
                return Err(ErrorInfo::new(
                    "invalid_id",
                    format!("id must be {} characters or fewer", MAX_REQUEST_ID_LEN),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Params
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartSessionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_complete_task: Option<bool>,
}

impl StartSessionParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(minutes) = self.duration_minutes {
            if !(MIN_SESSION_MINUTES..=MAX_SESSION_MINUTES).contains(&minutes) {
                return Err(ErrorInfo::new(
                    "invalid_duration",
                    format!(
                        "duration_minutes must be between {} and {}",
                        MIN_SESSION_MINUTES, MAX_SESSION_MINUTES
                    ),
                ));
            }
        }
        if let Some(task_ref) = &self.task_ref {
            require_bounded(task_ref, "task_ref", MAX_TASK_REF_LEN)?;
        }
        if self.auto_complete_task == Some(true) && self.task_ref.is_none() {
            return Err(ErrorInfo::new(
                "missing_field",
                "task_ref is required when auto_complete_task is set",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResumeSessionParams {
    /// Idle seconds observed by the client while paused. When absent the
    /// daemon charges the paused interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_seconds: Option<u64>,
}

impl ResumeSessionParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self.idle_seconds {
            Some(seconds) if seconds > MAX_IDLE_SECONDS => Err(ErrorInfo::new(
                "invalid_idle_seconds",
                format!("idle_seconds must be {} or fewer", MAX_IDLE_SECONDS),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkCompromisedParams {
    pub reason: String,
}

impl MarkCompromisedParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_bounded(&self.reason, "reason", MAX_REASON_LEN)
    }
}

pub fn parse_start_session(params: Option<Value>) -> Result<StartSessionParams, ErrorInfo> {
    let parsed: StartSessionParams = parse_optional(params, "start_session")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_resume_session(params: Option<Value>) -> Result<ResumeSessionParams, ErrorInfo> {
    let parsed: ResumeSessionParams = parse_optional(params, "resume_session")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_mark_compromised(params: Option<Value>) -> Result<MarkCompromisedParams, ErrorInfo> {
    let Some(params) = params else {
        return Err(ErrorInfo::new("missing_params", "reason is required"));
    };
    let parsed: MarkCompromisedParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("mark_compromised params are invalid: {}", err),
        )
    })?;
    parsed.validate()?;
    Ok(parsed)
}

fn parse_optional<T>(params: Option<Value>, method: &str) -> Result<T, ErrorInfo>
where
    T: Default + serde::de::DeserializeOwned,
{
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(|err| {
            ErrorInfo::new(
                "invalid_params",
                format!("{} params are invalid: {}", method, err),
            )
        }),
    }
}

fn require_bounded(value: &str, field: &str, max_len: usize) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > max_len {
        return Err(ErrorInfo::new(
            "invalid_field",
            format!("{} must be {} characters or fewer", field, max_len),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips_snake_case_method() {
        let request = Request::new(
            Method::StartSession,
            Some("req-1".to_string()),
            Some(json!({"duration_minutes": 25})),
        );
        let text = serde_json::to_string(&request).unwrap();
        assert!(text.contains("\"start_session\""));
        let parsed: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.method, Method::StartSession);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_method() {
        let err = serde_json::from_value::<Request>(json!({
            "protocol_version": 1,
            "method": "reset_everything"
        }));
        assert!(err.is_err());
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let mut request = Request::new(Method::GetHealth, None, None);
        request.protocol_version = 2;
        assert_eq!(request.validate().unwrap_err().code, "protocol_mismatch");
    }

    #[test]
    fn start_params_default_when_absent() {
        assert_eq!(
            parse_start_session(None).unwrap(),
            StartSessionParams::default()
        );
        assert_eq!(
            parse_start_session(Some(Value::Null)).unwrap(),
            StartSessionParams::default()
        );
    }

    #[test]
    fn start_params_validate_duration() {
        for minutes in [4, 121] {
            let err = parse_start_session(Some(json!({"duration_minutes": minutes}))).unwrap_err();
            assert_eq!(err.code, "invalid_duration");
        }
        assert!(parse_start_session(Some(json!({"duration_minutes": 120}))).is_ok());
    }

    #[test]
    fn start_params_reject_unknown_fields() {
        let err = parse_start_session(Some(json!({"minutes": 25}))).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn auto_complete_needs_task() {
        let err =
            parse_start_session(Some(json!({"auto_complete_task": true}))).unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn resume_params_bound_idle() {
        assert_eq!(
            parse_resume_session(None).unwrap().idle_seconds,
            None
        );
        let err = parse_resume_session(Some(json!({"idle_seconds": MAX_IDLE_SECONDS + 1})))
            .unwrap_err();
        assert_eq!(err.code, "invalid_idle_seconds");
    }

    #[test]
    fn compromise_requires_reason() {
        assert_eq!(
            parse_mark_compromised(None).unwrap_err().code,
            "missing_params"
        );
        assert_eq!(
            parse_mark_compromised(Some(json!({"reason": "  "})))
                .unwrap_err()
                .code,
            "missing_field"
        );
        assert_eq!(
            parse_mark_compromised(Some(json!({"reason": "social media"})))
                .unwrap()
                .reason,
            "social media"
        );
    }
}
