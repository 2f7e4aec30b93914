use std::sync::Arc;

use freightdesk_agent::{RuntimeError, WorkflowRuntime};
use freightdesk_core::config::{AppConfig, ConfigError};
use freightdesk_db::{connect_with_settings, migrations, DbPool, SqlSessionRepository};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<WorkflowRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("workflow runtime could not be built: {0}")]
    Runtime(#[source] RuntimeError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let repository = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let runtime =
        WorkflowRuntime::from_config(&config, repository).map_err(BootstrapError::Runtime)?;
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        target_path = %runtime.settings().target_path,
        "workflow runtime wired"
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}

#[cfg(test)]
mod tests {
    use freightdesk_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    fn overrides(database_url: &str, api_key: Option<&str>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                server_api_key: api_key.map(str::to_string),
                discovery_schema_url: Some("http://pricing.test/swagger/v1/swagger.json".to_string()),
                quote_api_price_url: Some("http://pricing.test/API/Price/GetPrice2".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_api_key() {
        let result = bootstrap(overrides("sqlite::memory:", None)).await;

        let message = result.err().expect("missing key is fatal").to_string();
        assert!(message.contains("server.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_pricing_endpoint() {
        let mut options = overrides("sqlite::memory:", Some("secret"));
        options.overrides.quote_api_price_url = None;

        let message = bootstrap(options).await.err().expect("missing endpoint is fatal").to_string();
        assert!(message.contains("quote_api.price_url"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_runtime() {
        let app = bootstrap(overrides("sqlite::memory:?cache=shared", Some("secret")))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('conversation_session', 'workflow_transition')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("session tables should exist after bootstrap");
        assert_eq!(table_count, 2);
        assert_eq!(app.runtime.settings().target_path, "/API/Price/GetPrice2");

        app.db_pool.close().await;
    }
}
