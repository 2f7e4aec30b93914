use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use freightdesk_db::DbPool;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    if !ready {
        warn!(event_name = "system.health.degraded", detail = %database.detail, "database check failed");
    }

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "freightdesk intake runtime initialized".to_string(),
        },
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    let sessions =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM conversation_session").fetch_one(pool);
    match sessions.await {
        Ok(count) => HealthCheck {
            status: "ready",
            detail: format!("session store reachable ({count} sessions)"),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("session store check failed: {error}") }
        }
    }
}
