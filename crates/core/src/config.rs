use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PREFIX: &str = "FREIGHTDESK_";
pub const DEFAULT_CONFIG_FILE: &str = "freightdesk.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
    pub llm: LlmConfig,
    pub quote_api: QuoteApiConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Shared secret callers present in the `X-API-Key` header.
    pub api_key: SecretString,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// URL of the OpenAPI document describing the pricing backend.
    pub schema_url: Option<String>,
    pub target_path: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct QuoteApiConfig {
    /// Origin used for the sign-in call; no sign-in happens when unset.
    pub base_url: Option<String>,
    pub price_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub login_timeout_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Number of trailing messages handed to the extractor.
    pub history_window: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub server_api_key: Option<String>,
    pub server_port: Option<u16>,
    pub discovery_schema_url: Option<String>,
    pub quote_api_price_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://freightdesk.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                api_key: String::new().into(),
                graceful_shutdown_secs: 15,
            },
            discovery: DiscoveryConfig {
                schema_url: None,
                target_path: "/API/Price/GetPrice2".to_string(),
                timeout_secs: 15,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some(LlmProvider::Ollama.default_base_url().to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            quote_api: QuoteApiConfig {
                base_url: None,
                price_url: None,
                username: None,
                password: None,
                login_timeout_secs: 10,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig { history_window: 6 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// The extractor endpoint, falling back to the provider's default.
    pub fn llm_base_url(&self) -> &str {
        self.llm.base_url.as_deref().unwrap_or_else(|| self.llm.provider.default_base_url())
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(api_key) = server.api_key {
                self.server.api_key = secret_value(api_key);
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(discovery) = patch.discovery {
            if let Some(schema_url) = discovery.schema_url {
                self.discovery.schema_url = Some(schema_url);
            }
            if let Some(target_path) = discovery.target_path {
                self.discovery.target_path = target_path;
            }
            if let Some(timeout_secs) = discovery.timeout_secs {
                self.discovery.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(quote_api) = patch.quote_api {
            if let Some(base_url) = quote_api.base_url {
                self.quote_api.base_url = Some(base_url);
            }
            if let Some(price_url) = quote_api.price_url {
                self.quote_api.price_url = Some(price_url);
            }
            if let Some(username) = quote_api.username {
                self.quote_api.username = Some(username);
            }
            if let Some(password) = quote_api.password {
                self.quote_api.password = Some(secret_value(password));
            }
            if let Some(login_timeout_secs) = quote_api.login_timeout_secs {
                self.quote_api.login_timeout_secs = login_timeout_secs;
            }
            if let Some(timeout_secs) = quote_api.timeout_secs {
                self.quote_api.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(history_window) = workflow.history_window {
                self.workflow.history_window = history_window;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FREIGHTDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FREIGHTDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("FREIGHTDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FREIGHTDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FREIGHTDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FREIGHTDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FREIGHTDESK_SERVER_PORT") {
            self.server.port = parse_u16("FREIGHTDESK_SERVER_PORT", &value)?;
        }
        let api_key =
            read_env("FREIGHTDESK_SERVER_API_KEY").or_else(|| read_env("FREIGHTDESK_API_KEY"));
        if let Some(value) = api_key {
            self.server.api_key = secret_value(value);
        }
        if let Some(value) = read_env("FREIGHTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FREIGHTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FREIGHTDESK_DISCOVERY_SCHEMA_URL") {
            self.discovery.schema_url = Some(value);
        }
        if let Some(value) = read_env("FREIGHTDESK_DISCOVERY_TARGET_PATH") {
            self.discovery.target_path = value;
        }
        if let Some(value) = read_env("FREIGHTDESK_DISCOVERY_TIMEOUT_SECS") {
            self.discovery.timeout_secs = parse_u64("FREIGHTDESK_DISCOVERY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FREIGHTDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("FREIGHTDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FREIGHTDESK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("FREIGHTDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("FREIGHTDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("FREIGHTDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FREIGHTDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("FREIGHTDESK_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("FREIGHTDESK_QUOTE_API_BASE_URL") {
            self.quote_api.base_url = Some(value);
        }
        if let Some(value) = read_env("FREIGHTDESK_QUOTE_API_PRICE_URL") {
            self.quote_api.price_url = Some(value);
        }
        if let Some(value) = read_env("FREIGHTDESK_QUOTE_API_USERNAME") {
            self.quote_api.username = Some(value);
        }
        if let Some(value) = read_env("FREIGHTDESK_QUOTE_API_PASSWORD") {
            self.quote_api.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("FREIGHTDESK_QUOTE_API_LOGIN_TIMEOUT_SECS") {
            self.quote_api.login_timeout_secs =
                parse_u64("FREIGHTDESK_QUOTE_API_LOGIN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FREIGHTDESK_QUOTE_API_TIMEOUT_SECS") {
            self.quote_api.timeout_secs = parse_u64("FREIGHTDESK_QUOTE_API_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FREIGHTDESK_WORKFLOW_HISTORY_WINDOW") {
            self.workflow.history_window =
                parse_usize("FREIGHTDESK_WORKFLOW_HISTORY_WINDOW", &value)?;
        }

        let log_level =
            read_env("FREIGHTDESK_LOGGING_LEVEL").or_else(|| read_env("FREIGHTDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FREIGHTDESK_LOGGING_FORMAT").or_else(|| read_env("FREIGHTDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(api_key) = overrides.server_api_key {
            self.server.api_key = secret_value(api_key);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(schema_url) = overrides.discovery_schema_url {
            self.discovery.schema_url = Some(schema_url);
        }
        if let Some(price_url) = overrides.quote_api_price_url {
            self.quote_api.price_url = Some(price_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_discovery(&self.discovery)?;
        validate_llm(&self.llm)?;
        validate_quote_api(&self.quote_api)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), Path::new("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    if url.is_empty() {
        return Err(ConfigError::Validation(
            "database.url is required (set FREIGHTDESK_DATABASE_URL)".to_string(),
        ));
    }
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "server.api_key is required (set FREIGHTDESK_SERVER_API_KEY); clients send it in the X-API-Key header"
                .to_string(),
        ));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_discovery(discovery: &DiscoveryConfig) -> Result<(), ConfigError> {
    match discovery.schema_url.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(ConfigError::Validation(
                "discovery.schema_url is required (set FREIGHTDESK_DISCOVERY_SCHEMA_URL to the pricing API's OpenAPI document)"
                    .to_string(),
            ));
        }
        Some(url) if !is_http_url(url) => {
            return Err(ConfigError::Validation(
                "discovery.schema_url must start with http:// or https://".to_string(),
            ));
        }
        Some(_) => {}
    }

    if !discovery.target_path.starts_with('/') {
        return Err(ConfigError::Validation(
            "discovery.target_path must be an absolute path such as `/API/Price/GetPrice2`"
                .to_string(),
        ));
    }

    if discovery.timeout_secs == 0 || discovery.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "discovery.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_quote_api(quote_api: &QuoteApiConfig) -> Result<(), ConfigError> {
    match quote_api.price_url.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(ConfigError::Validation(
                "quote_api.price_url is required (set FREIGHTDESK_QUOTE_API_PRICE_URL)".to_string(),
            ));
        }
        Some(url) if !is_http_url(url) => {
            return Err(ConfigError::Validation(
                "quote_api.price_url must start with http:// or https://".to_string(),
            ));
        }
        Some(_) => {}
    }

    if let Some(base_url) = &quote_api.base_url {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(
                "quote_api.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if quote_api.username.is_some() {
        if quote_api.base_url.is_none() {
            return Err(ConfigError::Validation(
                "quote_api.base_url is required when quote_api.username is set".to_string(),
            ));
        }
        if quote_api.password.is_none() {
            return Err(ConfigError::Validation(
                "quote_api.password is required when quote_api.username is set".to_string(),
            ));
        }
    }

    if quote_api.timeout_secs == 0 || quote_api.login_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "quote_api timeouts must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.history_window == 0 {
        return Err(ConfigError::Validation(
            "workflow.history_window must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    discovery: Option<DiscoveryPatch>,
    llm: Option<LlmPatch>,
    quote_api: Option<QuoteApiPatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    api_key: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscoveryPatch {
    schema_url: Option<String>,
    target_path: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteApiPatch {
    base_url: Option<String>,
    price_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    login_timeout_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    history_window: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
