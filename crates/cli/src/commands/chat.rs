//! Interactive console over the intake workflow.
//!
//! Each line is one user message. `/approve` approves a session waiting at
//! the gate and `/quit` ends the console; the session itself stays stored
//! and can be resumed later with `--thread-id`.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::Level;
use uuid::Uuid;

use freightdesk_agent::{RuntimeError, TurnResponse, WorkflowRuntime};
use freightdesk_core::config::AppConfig;
use freightdesk_core::domain::session::SessionId;
use freightdesk_core::flows::WorkflowError;
use freightdesk_db::{connect_with_settings, migrations, SqlSessionRepository};

use crate::commands::{async_runtime, load_config, CommandResult};

const APPROVE_COMMAND: &str = "/approve";
const QUIT_COMMANDS: [&str; 2] = ["/quit", "/exit"];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsoleSummary {
    pub turns: usize,
    pub submitted: bool,
    pub paused: bool,
}

pub fn run(thread_id: Option<String>, quote_id: Option<String>) -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    init_stderr_logging(&config);
    let runtime = match async_runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let session_id = thread_id
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
        .map(SessionId)
        .unwrap_or_else(|| SessionId(format!("session_{}", chrono::Utc::now().timestamp())));

    let result = runtime.block_on(async {
        let workflow = open_workflow(&config).await?;
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        writeln!(stdout, "session {session_id} (type /approve at the review step, /quit to leave)")?;
        console(&workflow, &session_id, quote_id.as_deref(), stdin.lock(), &mut stdout).await
    });

    match result {
        Ok(summary) => CommandResult::success_with_data(
            "chat",
            format!("chat session `{session_id}` closed"),
            Some(json!({
                "thread_id": session_id.as_str(),
                "turns": summary.turns,
                "submitted": summary.submitted,
                "paused": summary.paused,
            })),
        ),
        Err(error) => CommandResult::failure("chat", "chat_runtime", error.to_string(), 4),
    }
}

async fn open_workflow(config: &AppConfig) -> Result<WorkflowRuntime> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await?;
    migrations::run_pending(&pool).await?;
    let repository = Arc::new(SqlSessionRepository::new(pool));
    Ok(WorkflowRuntime::from_config(config, repository)?)
}

/// Drives the workflow from `input` until it is exhausted or a quit command
/// arrives. Turn failures are printed and the console keeps going.
pub async fn console<R: BufRead, W: Write>(
    workflow: &WorkflowRuntime,
    session_id: &SessionId,
    quote_id: Option<&str>,
    input: R,
    output: &mut W,
) -> Result<ConsoleSummary> {
    let mut summary = ConsoleSummary::default();

    for line in input.lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if QUIT_COMMANDS.contains(&text) {
            break;
        }

        let correlation_id = format!("cli-{}", Uuid::new_v4());
        let turn = if text == APPROVE_COMMAND {
            workflow.approve(session_id, &correlation_id).await
        } else {
            workflow.submit_message(session_id, text, quote_id, &correlation_id).await
        };

        match turn {
            Ok(turn) => {
                summary.turns += 1;
                summary.submitted |= turn.payload.is_some();
                summary.paused = turn.is_paused;
                render_turn(&turn, output)?;
            }
            Err(RuntimeError::Workflow(WorkflowError::NotAwaitingApproval { .. })) => {
                writeln!(output, "nothing to approve yet; keep describing the shipment")?;
            }
            Err(error) => {
                writeln!(output, "error: {error}")?;
            }
        }
    }

    Ok(summary)
}

fn render_turn<W: Write>(turn: &TurnResponse, output: &mut W) -> io::Result<()> {
    writeln!(output, "assistant: {}", turn.response)?;
    if turn.is_paused {
        let data = serde_json::to_string_pretty(&turn.extracted_data)
            .unwrap_or_else(|_| "{}".to_owned());
        writeln!(output, "{data}")?;
        writeln!(output, "(waiting for review: {APPROVE_COMMAND} to submit, or send a correction)")?;
    }
    Ok(())
}

fn init_stderr_logging(config: &AppConfig) {
    let level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_max_level(level)
        .compact()
        .try_init();
}
