use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use freightdesk_core::domain::session::{ConversationState, SessionId};
use freightdesk_core::flows::{NextStep, TransitionReason, WorkflowNode};

use super::{RepositoryError, SessionRepository, SessionSnapshot, TransitionRecord};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of stored sessions; also serves as a readiness check.
    pub async fn count_sessions(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_session")
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("invalid session count: {count}")))
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                session_id,
                state_json,
                pending_node,
                version,
                created_at,
                updated_at
             FROM conversation_session
             WHERE session_id = ?",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(snapshot_from_row).transpose()
    }

    async fn save(
        &self,
        snapshot: &SessionSnapshot,
        transitions: &[TransitionRecord],
    ) -> Result<u32, RepositoryError> {
        let state_json = serde_json::to_string(&snapshot.state)
            .map_err(|error| RepositoryError::Encode(error.to_string()))?;
        let next_version = snapshot.version + 1;
        let conflict = || RepositoryError::VersionConflict {
            session_id: snapshot.session_id.to_string(),
            expected: snapshot.version,
        };

        let mut tx = self.pool.begin().await?;

        let written = if snapshot.is_new() {
            sqlx::query(
                "INSERT INTO conversation_session (
                    session_id,
                    state_json,
                    pending_node,
                    version,
                    created_at,
                    updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(session_id) DO NOTHING",
            )
            .bind(snapshot.session_id.as_str())
            .bind(&state_json)
            .bind(snapshot.pending_node.map(|node| node.as_str()))
            .bind(i64::from(next_version))
            .bind(snapshot.created_at.to_rfc3339())
            .bind(snapshot.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(
                "UPDATE conversation_session SET
                    state_json = ?,
                    pending_node = ?,
                    version = ?,
                    updated_at = ?
                 WHERE session_id = ? AND version = ?",
            )
            .bind(&state_json)
            .bind(snapshot.pending_node.map(|node| node.as_str()))
            .bind(i64::from(next_version))
            .bind(snapshot.updated_at.to_rfc3339())
            .bind(snapshot.session_id.as_str())
            .bind(i64::from(snapshot.version))
            .execute(&mut *tx)
            .await?
        };

        if written.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(conflict());
        }

        for transition in transitions {
            sqlx::query(
                "INSERT INTO workflow_transition (
                    session_id,
                    from_node,
                    to_node,
                    reason,
                    correlation_id,
                    occurred_at
                 ) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(transition.session_id.as_str())
            .bind(transition.from_node.as_str())
            .bind(transition.to.to_string())
            .bind(transition.reason.as_str())
            .bind(&transition.correlation_id)
            .bind(transition.occurred_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(next_version)
    }

    async fn list_transitions(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<TransitionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                session_id,
                from_node,
                to_node,
                reason,
                correlation_id,
                occurred_at
             FROM workflow_transition
             WHERE session_id = ?
             ORDER BY id ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }
}

fn snapshot_from_row(row: SqliteRow) -> Result<SessionSnapshot, RepositoryError> {
    let state_json = row.try_get::<String, _>("state_json")?;
    let state = serde_json::from_str::<ConversationState>(&state_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid state_json: {error}")))?;
    let pending_node = row
        .try_get::<Option<String>, _>("pending_node")?
        .map(|value| parse_node("pending_node", &value))
        .transpose()?;

    Ok(SessionSnapshot {
        session_id: SessionId(row.try_get("session_id")?),
        state,
        pending_node,
        version: parse_u32("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<TransitionRecord, RepositoryError> {
    let to_raw = row.try_get::<String, _>("to_node")?;
    let to = NextStep::parse(&to_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown to_node `{to_raw}`")))?;
    let reason_raw = row.try_get::<String, _>("reason")?;
    let reason = TransitionReason::parse(&reason_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown reason `{reason_raw}`")))?;

    Ok(TransitionRecord {
        session_id: SessionId(row.try_get("session_id")?),
        from_node: parse_node("from_node", &row.try_get::<String, _>("from_node")?)?,
        to,
        reason,
        correlation_id: row.try_get("correlation_id")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

fn parse_node(column: &str, value: &str) -> Result<WorkflowNode, RepositoryError> {
    WorkflowNode::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown workflow node in `{column}`: `{value}`")))
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
