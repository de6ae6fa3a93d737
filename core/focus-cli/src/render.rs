//! Human-readable rendering of daemon payloads.
//!
//! Works on raw JSON so the CLI stays decoupled from focus-core's types.

use chrono::{DateTime, Utc};
use serde_json::Value;

pub fn status(data: &Value, now: DateTime<Utc>) -> String {
    let state = &data["state"];
    let player = &state["player"];
    let mut lines = vec![format!(
        "Level {}  ({}/{} xp)  currency {}",
        number(&player["level"]),
        number(&player["experience"]),
        number(&player["experienceToNextLevel"]),
        number(&player["currency"]),
    )];

    match state.get("session").filter(|session| !session.is_null()) {
        Some(session) => lines.push(session_line(session, now)),
        None => lines.push("No active session".to_string()),
    }

    if let Some(break_state) = state.get("break").filter(|value| !value.is_null()) {
        let remaining = deadline(break_state).map(|end| end - now);
        lines.push(match remaining {
            Some(left) if left.num_seconds() > 0 => {
                format!("On break: {} left", clock(left.num_seconds()))
            }
            _ => "On break: ending".to_string(),
        });
    }

    let statistics = &state["statistics"];
    lines.push(format!(
        "Sessions {} ({} compromised, {} abandoned)  streak {} days",
        number(&statistics["totalSessions"]),
        number(&statistics["compromisedSessions"]),
        number(&statistics["abandonedSessions"]),
        number(&statistics["currentStreakDays"]),
    ));

    if let Some(timers) = data["timers"].as_array() {
        let armed: Vec<&str> = timers
            .iter()
            .filter(|timer| timer["phase"] == "armed")
            .filter_map(|timer| timer["kind"].as_str())
            .collect();
        if !armed.is_empty() {
            lines.push(format!("Armed timers: {}", armed.join(", ")));
        }
    }

    lines.join("\n")
}

pub fn session_line(session: &Value, now: DateTime<Utc>) -> String {
    let minutes = number(&session["durationMinutes"]);
    let mut line = match deadline(session).map(|end| end - now) {
        Some(left) if session["isPaused"] == true => format!(
            "Session ({} min) paused with {} left",
            minutes,
            clock(left.num_seconds().max(0))
        ),
        Some(left) if left.num_seconds() > 0 => {
            format!("Session ({} min): {} left", minutes, clock(left.num_seconds()))
        }
        _ => format!("Session ({} min): finishing", minutes),
    };
    if let Some(task) = session["taskRef"].as_str() {
        line.push_str(&format!("  task {}", task));
    }
    if session["isCompromised"] == true {
        let reason = session["compromiseReason"].as_str().unwrap_or("compromised");
        line.push_str(&format!("  [compromised: {}]", reason));
    }
    line
}

pub fn backup(data: &Value) -> String {
    let backup = &data["backup"];
    if backup.is_null() {
        return "No backup stored".to_string();
    }
    let taken = backup["timestamp"]
        .as_i64()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "unknown time".to_string());
    let reason = backup["reason"].as_str().unwrap_or("unspecified");
    format!("Backup from {} ({})", taken, reason)
}

fn deadline(record: &Value) -> Option<DateTime<Utc>> {
    let start = record["startTime"]
        .as_i64()
        .and_then(DateTime::<Utc>::from_timestamp_millis)?;
    let minutes = record["durationMinutes"].as_i64()?;
    Some(start + chrono::Duration::minutes(minutes))
}

fn clock(total_seconds: i64) -> String {
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

fn number(value: &Value) -> String {
    match value {
        Value::Number(number) => number.to_string(),
        _ => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 10, 0).unwrap()
    }

    fn started_at_nine() -> i64 {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn running_session_shows_time_left() {
        let session = json!({
            "startTime": started_at_nine(),
            "durationMinutes": 25,
            "isPaused": false,
            "isCompromised": false,
            "taskRef": "write-report"
        });
        assert_eq!(
            session_line(&session, now()),
            "Session (25 min): 15:00 left  task write-report"
        );
    }

    #[test]
    fn compromised_session_shows_reason() {
        let session = json!({
            "startTime": started_at_nine(),
            "durationMinutes": 25,
            "isPaused": true,
            "isCompromised": true,
            "compromiseReason": "phone"
        });
        assert_eq!(
            session_line(&session, now()),
            "Session (25 min) paused with 15:00 left  [compromised: phone]"
        );
    }

    #[test]
    fn status_without_session() {
        let data = json!({
            "state": {
                "player": {"level": 2, "experience": 40, "experienceToNextLevel": 200, "currency": 7},
                "session": null,
                "statistics": {"totalSessions": 3, "compromisedSessions": 1,
                               "abandonedSessions": 0, "currentStreakDays": 2}
            },
            "timers": [{"kind": "idleCollectionTick", "phase": "armed"}]
        });
        assert_eq!(
            status(&data, now()),
            "Level 2  (40/200 xp)  currency 7\n\
             No active session\n\
             Sessions 3 (1 compromised, 0 abandoned)  streak 2 days\n\
             Armed timers: idleCollectionTick"
        );
    }

    #[test]
    fn empty_backup_slot() {
        assert_eq!(backup(&json!({"backup": null})), "No backup stored");
        assert_eq!(
            backup(&json!({"backup": {"timestamp": started_at_nine(), "reason": "unparseable"}})),
            "Backup from 2026-03-02T09:00:00+00:00 (unparseable)"
        );
    }
}
