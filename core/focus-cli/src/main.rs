//! focus: command-line client for the Focus Quest daemon.
//!
//! ## Subcommands
//!
//! - `start`, `pause`, `resume`, `compromise`, `abandon`: session lifecycle
//! - `skip-break`: end the current break early
//! - `status`: player, session, and timer overview
//! - `backup show|delete`: inspect or clear the corruption backup slot
//! - `health`: daemon liveness
//!
//! Every command talks to `focus-daemon` over its Unix socket; `--json`
//! prints the raw response payload instead of the human summary.

mod daemon_client;
mod logging;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use focus_protocol::{
    MarkCompromisedParams, Method, ResumeSessionParams, StartSessionParams, MAX_SESSION_MINUTES,
    MIN_SESSION_MINUTES,
};
use serde_json::Value;

use daemon_client::{ClientError, DaemonClient};

#[derive(Parser)]
#[command(name = "focus")]
#[command(about = "Focus Quest session control")]
#[command(version)]
struct Cli {
    /// Daemon socket path (else $FOCUS_DAEMON_SOCKET, else ~/.focusquest/daemon.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Print the raw JSON payload
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a focus session
    Start {
        /// Session length in minutes (defaults to the saved setting)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(MIN_SESSION_MINUTES as i64..=MAX_SESSION_MINUTES as i64))]
        minutes: Option<u32>,

        /// Task the session is working on
        #[arg(short, long)]
        task: Option<String>,

        /// Mark the task complete when the session finishes
        #[arg(long, requires = "task")]
        auto_complete: bool,
    },

    /// Pause the active session
    Pause,

    /// Resume a paused session
    Resume {
        /// Idle seconds to charge instead of the whole paused interval
        #[arg(long)]
        idle_seconds: Option<u64>,
    },

    /// Flag the active session as compromised
    Compromise {
        /// Why focus was broken
        #[arg(value_name = "REASON")]
        reason: String,
    },

    /// Give up on the active session without a reward
    Abandon,

    /// End the current break early
    SkipBreak,

    /// Show player, session, and timer status
    Status,

    /// Check that the daemon is running
    Health,

    /// Inspect or clear the corruption backup
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Show the stored backup, if any
    Show,
    /// Delete the stored backup
    Delete,
}

fn main() -> ExitCode {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let client = match DaemonClient::resolve(cli.socket.clone()) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("focus: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(&client, &cli) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::warn!(error = %err, code = ?err.code(), "focus command failed");
            eprintln!("focus: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(client: &DaemonClient, cli: &Cli) -> Result<String, ClientError> {
    let (method, params) = request_for(&cli.command)?;
    let data = client.call(method, params)?;

    if cli.json {
        return serde_json::to_string_pretty(&data)
            .map_err(|err| ClientError::Transport(format!("Failed to format response: {}", err)));
    }
    Ok(summarize(&cli.command, &data))
}

fn request_for(command: &Commands) -> Result<(Method, Option<Value>), ClientError> {
    let encode = |value: Result<Value, serde_json::Error>| {
        value
            .map(Some)
            .map_err(|err| ClientError::Transport(format!("Failed to encode params: {}", err)))
    };

    Ok(match command {
        Commands::Start {
            minutes,
            task,
            auto_complete,
        } => (
            Method::StartSession,
            encode(serde_json::to_value(StartSessionParams {
                duration_minutes: *minutes,
                task_ref: task.clone(),
                auto_complete_task: auto_complete.then_some(true),
            }))?,
        ),
        Commands::Pause => (Method::PauseSession, None),
        Commands::Resume { idle_seconds } => (
            Method::ResumeSession,
            encode(serde_json::to_value(ResumeSessionParams {
                idle_seconds: *idle_seconds,
            }))?,
        ),
        Commands::Compromise { reason } => (
            Method::MarkCompromised,
            encode(serde_json::to_value(MarkCompromisedParams {
                reason: reason.clone(),
            }))?,
        ),
        Commands::Abandon => (Method::AbandonSession, None),
        Commands::SkipBreak => (Method::SkipBreak, None),
        Commands::Status => (Method::GetState, None),
        Commands::Health => (Method::GetHealth, None),
        Commands::Backup {
            action: BackupAction::Show,
        } => (Method::GetBackup, None),
        Commands::Backup {
            action: BackupAction::Delete,
        } => (Method::DeleteBackup, None),
    })
}

fn summarize(command: &Commands, data: &Value) -> String {
    let now = Utc::now();
    match command {
        Commands::Start { .. } => format!("Started. {}", render::session_line(&data["session"], now)),
        Commands::Pause => format!("Paused. {}", render::session_line(&data["session"], now)),
        Commands::Resume { .. } => {
            format!("Resumed. {}", render::session_line(&data["session"], now))
        }
        Commands::Compromise { .. } => render::session_line(&data["session"], now),
        Commands::Abandon => {
            let seconds = data["active_seconds"].as_u64().unwrap_or(0);
            format!("Session abandoned after {} focused minutes", seconds / 60)
        }
        Commands::SkipBreak => "Break skipped".to_string(),
        Commands::Status => render::status(data, now),
        Commands::Health => format!(
            "focus-daemon {} (pid {}, protocol {})",
            data["version"].as_str().unwrap_or("?"),
            data["pid"],
            data["protocol_version"],
        ),
        Commands::Backup {
            action: BackupAction::Show,
        } => render::backup(data),
        Commands::Backup {
            action: BackupAction::Delete,
        } => "Backup deleted".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_maps_to_protocol_params() {
        let cli = Cli::try_parse_from([
            "focus",
            "start",
            "--minutes",
            "45",
            "--task",
            "t-1",
            "--auto-complete",
        ])
        .unwrap();
        let (method, params) = request_for(&cli.command).unwrap();
        assert_eq!(method, Method::StartSession);
        assert_eq!(
            params,
            Some(json!({"duration_minutes": 45, "task_ref": "t-1", "auto_complete_task": true}))
        );
    }

    #[test]
    fn start_rejects_out_of_range_minutes() {
        assert!(Cli::try_parse_from(["focus", "start", "--minutes", "200"]).is_err());
        assert!(Cli::try_parse_from(["focus", "start", "--auto-complete"]).is_err());
    }

    #[test]
    fn bare_commands_send_no_params() {
        let cli = Cli::try_parse_from(["focus", "backup", "delete"]).unwrap();
        assert_eq!(
            request_for(&cli.command).unwrap(),
            (Method::DeleteBackup, None)
        );

        let cli = Cli::try_parse_from(["focus", "resume"]).unwrap();
        assert_eq!(
            request_for(&cli.command).unwrap(),
            (Method::ResumeSession, Some(json!({})))
        );
    }

    #[test]
    fn abandon_summary_reports_minutes() {
        let text = summarize(&Commands::Abandon, &json!({"active_seconds": 610}));
        assert_eq!(text, "Session abandoned after 10 focused minutes");
    }
}
