use serde_json::{json, Value};

use freightdesk_core::domain::session::SessionId;
use freightdesk_db::{
    connect_with_settings, SessionRepository, SessionSnapshot, SqlSessionRepository,
    TransitionRecord,
};

use crate::commands::{async_runtime, load_config, CommandResult};

pub fn run(thread_id: &str) -> CommandResult {
    let config = match load_config("inspect") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("inspect") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let session_id = SessionId::from(thread_id.trim());

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let repository = SqlSessionRepository::new(pool.clone());
        let loaded = async {
            let snapshot = repository.load(&session_id).await?;
            let transitions = repository.list_transitions(&session_id).await?;
            Ok::<_, freightdesk_db::RepositoryError>((snapshot, transitions))
        }
        .await;
        pool.close().await;
        loaded.map_err(|error| ("repository", error.to_string(), 5u8))
    });

    match result {
        Ok((Some(snapshot), transitions)) => CommandResult::success_with_data(
            "inspect",
            format!("session `{}` at version {}", snapshot.session_id, snapshot.version),
            Some(describe(&snapshot, &transitions)),
        ),
        Ok((None, _)) => CommandResult::failure(
            "inspect",
            "not_found",
            format!("no stored session `{session_id}`"),
            6,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("inspect", error_class, message, exit_code)
        }
    }
}

/// Operator view of a session; the cached form schema is summarized, not dumped.
pub fn describe(snapshot: &SessionSnapshot, transitions: &[TransitionRecord]) -> Value {
    let state = &snapshot.state;
    json!({
        "session_id": snapshot.session_id.as_str(),
        "version": snapshot.version,
        "pending_node": snapshot.pending_node.map(|node| node.as_str()),
        "is_approved": state.is_approved,
        "message_count": state.messages.len(),
        "form_schema": state.form_schema.as_ref().map(|schema| json!({
            "endpoint": format!("{} {}", schema.endpoint.method, schema.endpoint.path),
            "required_fields": schema.required_fields.len(),
            "optional_fields": schema.optional_fields.len(),
        })),
        "extracted_data": state.extracted_data,
        "missing_fields": state.missing_fields,
        "created_at": snapshot.created_at.to_rfc3339(),
        "updated_at": snapshot.updated_at.to_rfc3339(),
        "transitions": transitions.iter().map(|record| json!({
            "from": record.from_node.as_str(),
            "to": record.to.to_string(),
            "reason": record.reason.as_str(),
            "correlation_id": record.correlation_id,
            "occurred_at": record.occurred_at.to_rfc3339(),
        })).collect::<Vec<_>>(),
    })
}
