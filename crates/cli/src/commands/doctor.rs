use freightdesk_agent::{LoginCheck, OpenApiSchemaDiscovery, QuoteApiClient, SchemaDiscovery};
use freightdesk_core::config::{AppConfig, LoadOptions};
use freightdesk_db::{connect_with_settings, SqlSessionRepository};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 when every non-skipped check passes, 1 otherwise.
pub fn run(json_output: bool, offline: bool) -> CommandResult {
    let report = build_report(offline);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(offline: bool) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.extend(run_async_checks(&config, offline));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["session_store", "schema_discovery", "quote_api_login"] {
                checks.push(DoctorCheck::skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let healthy = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn run_async_checks(config: &AppConfig, offline: bool) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return ["session_store", "schema_discovery", "quote_api_login"]
                .into_iter()
                .map(|name| DoctorCheck::fail(name, details.clone()))
                .collect();
        }
    };

    runtime.block_on(async {
        let database = check_session_store(config).await;
        if offline {
            return vec![
                database,
                DoctorCheck::skipped("schema_discovery", "skipped in offline mode"),
                DoctorCheck::skipped("quote_api_login", "skipped in offline mode"),
            ];
        }
        vec![database, check_schema_discovery(config).await, check_quote_api_login(config).await]
    })
}

async fn check_session_store(config: &AppConfig) -> DoctorCheck {
    let pool = match connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    {
        Ok(pool) => pool,
        Err(error) => {
            return DoctorCheck::fail("session_store", format!("failed to connect to database: {error}"))
        }
    };

    let sessions = SqlSessionRepository::new(pool.clone()).count_sessions().await;
    pool.close().await;

    match sessions {
        Ok(count) => DoctorCheck::pass(
            "session_store",
            format!("connected using `{}`; {count} stored sessions", config.database.url),
        ),
        Err(error) => DoctorCheck::fail(
            "session_store",
            format!("connected but the session table is unavailable (run `freightdesk migrate`): {error}"),
        ),
    }
}

async fn check_schema_discovery(config: &AppConfig) -> DoctorCheck {
    let discovery = match OpenApiSchemaDiscovery::from_config(&config.discovery) {
        Ok(discovery) => discovery,
        Err(error) => return DoctorCheck::fail("schema_discovery", error.to_string()),
    };

    match discovery.discover(&config.discovery.target_path).await {
        Ok(schema) => DoctorCheck::pass(
            "schema_discovery",
            format!(
                "{} {} exposes {} required and {} optional fields",
                schema.endpoint.method,
                schema.endpoint.path,
                schema.required_fields.len(),
                schema.optional_fields.len()
            ),
        ),
        Err(error) => DoctorCheck::fail("schema_discovery", error.to_string()),
    }
}

async fn check_quote_api_login(config: &AppConfig) -> DoctorCheck {
    let client = match QuoteApiClient::from_config(&config.quote_api) {
        Ok(client) => client,
        Err(error) => return DoctorCheck::fail("quote_api_login", error.to_string()),
    };

    match client.check_login().await {
        Ok(LoginCheck::Anonymous) => DoctorCheck::pass(
            "quote_api_login",
            "no quote API credentials configured; quotes are sent without login",
        ),
        Ok(LoginCheck::Authenticated { masked_token }) => {
            DoctorCheck::pass("quote_api_login", format!("login succeeded (token {masked_token})"))
        }
        Err(error) => DoctorCheck::fail("quote_api_login", error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
