use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use freightdesk_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE, ENV_PREFIX};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct ConfigEntry {
    key: &'static str,
    value: String,
}

impl ConfigEntry {
    fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self { key, value: value.into() }
    }

    /// `llm.api_key` -> `FREIGHTDESK_LLM_API_KEY`
    fn env_key(&self) -> String {
        format!("{ENV_PREFIX}{}", self.key.replace('.', "_").to_ascii_uppercase())
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(&entry, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", entry.key, entry.value));
    }
    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<ConfigEntry> {
    vec![
        ConfigEntry::new("database.url", config.database.url.clone()),
        ConfigEntry::new("database.max_connections", config.database.max_connections.to_string()),
        ConfigEntry::new("database.timeout_secs", config.database.timeout_secs.to_string()),
        ConfigEntry::new("server.bind_address", config.server.bind_address.clone()),
        ConfigEntry::new("server.port", config.server.port.to_string()),
        ConfigEntry::new("server.api_key", redact_secret(Some(&config.server.api_key))),
        ConfigEntry::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        ConfigEntry::new("discovery.schema_url", or_unset(config.discovery.schema_url.as_deref())),
        ConfigEntry::new("discovery.target_path", config.discovery.target_path.clone()),
        ConfigEntry::new("discovery.timeout_secs", config.discovery.timeout_secs.to_string()),
        ConfigEntry::new("llm.provider", config.llm.provider.as_str()),
        ConfigEntry::new("llm.model", config.llm.model.clone()),
        ConfigEntry::new("llm.base_url", config.llm_base_url()),
        ConfigEntry::new("llm.api_key", redact_secret(config.llm.api_key.as_ref())),
        ConfigEntry::new("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ConfigEntry::new("llm.max_retries", config.llm.max_retries.to_string()),
        ConfigEntry::new("quote_api.base_url", or_unset(config.quote_api.base_url.as_deref())),
        ConfigEntry::new("quote_api.price_url", or_unset(config.quote_api.price_url.as_deref())),
        ConfigEntry::new("quote_api.username", or_unset(config.quote_api.username.as_deref())),
        ConfigEntry::new("quote_api.password", redact_secret(config.quote_api.password.as_ref())),
        ConfigEntry::new("quote_api.timeout_secs", config.quote_api.timeout_secs.to_string()),
        ConfigEntry::new("workflow.history_window", config.workflow.history_window.to_string()),
        ConfigEntry::new("logging.level", config.logging.level.clone()),
        ConfigEntry::new("logging.format", format!("{:?}", config.logging.format).to_lowercase()),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), Path::new("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    entry: &ConfigEntry,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = entry.env_key();
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, entry.key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn or_unset(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim()) {
        None | Some("") => "<unset>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
