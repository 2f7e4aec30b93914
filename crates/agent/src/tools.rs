use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use freightdesk_core::catalog::{CatalogError, FieldCatalogBuilder};
use freightdesk_core::config::{DiscoveryConfig, QuoteApiConfig};
use freightdesk_core::domain::schema::FormSchema;
use freightdesk_core::payload::QuotePayload;

pub const LOGIN_PATH: &str = "/API/Account/SignInAsync";

/// Keys a login response may carry the bearer token under, in lookup order.
const TOKEN_KEYS: [&str; 4] = ["token", "accessToken", "jwt", "jwToken"];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("schema discovery is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("schema request failed: {0}")]
    Request(String),
    #[error("schema endpoint `{url}` returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("schema document is not valid JSON: {0}")]
    InvalidDocument(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("quote API is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("login failed: {0}")]
    Login(String),
    #[error("quote request failed: {0}")]
    Request(String),
    #[error("quote API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Source of the form schema for the pricing endpoint.
#[async_trait]
pub trait SchemaDiscovery: Send + Sync {
    async fn discover(&self, target_path: &str) -> Result<FormSchema, DiscoveryError>;
}

/// Sink for approved quote payloads. Returns the pricing API's answer as text.
#[async_trait]
pub trait QuoteSubmitter: Send + Sync {
    async fn submit(&self, payload: &QuotePayload) -> Result<String, SubmissionError>;
}

pub struct OpenApiSchemaDiscovery {
    client: reqwest::Client,
    schema_url: String,
}

impl OpenApiSchemaDiscovery {
    pub fn new(schema_url: impl Into<String>, timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DiscoveryError::Client(error.to_string()))?;
        Ok(Self { client, schema_url: schema_url.into() })
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let schema_url = config
            .schema_url
            .as_deref()
            .ok_or(DiscoveryError::NotConfigured("discovery.schema_url is not set"))?;
        Self::new(schema_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn schema_url(&self) -> &str {
        &self.schema_url
    }
}

#[async_trait]
impl SchemaDiscovery for OpenApiSchemaDiscovery {
    async fn discover(&self, target_path: &str) -> Result<FormSchema, DiscoveryError> {
        info!(
            event_name = "discovery.fetch_started",
            schema_url = %self.schema_url,
            target_path,
            "fetching OpenAPI document"
        );

        let response = self
            .client
            .get(&self.schema_url)
            .send()
            .await
            .map_err(|error| DiscoveryError::Request(error.to_string()))?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status {
                url: self.schema_url.clone(),
                status: response.status().as_u16(),
            });
        }

        let document = response
            .json::<Value>()
            .await
            .map_err(|error| DiscoveryError::InvalidDocument(error.to_string()))?;
        let schema = form_schema_from_document(&document, target_path)?;

        info!(
            event_name = "discovery.fetch_completed",
            required = schema.required_fields.len(),
            optional = schema.optional_fields.len(),
            "form schema discovered"
        );
        Ok(schema)
    }
}

/// Flattens the request body of `target_path` and applies the required-field
/// overrides.
pub fn form_schema_from_document(
    document: &Value,
    target_path: &str,
) -> Result<FormSchema, DiscoveryError> {
    Ok(FieldCatalogBuilder::new(document).build(target_path)?.into_form_schema())
}

/// Result of logging in to the quote API without submitting anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginCheck {
    /// No credentials configured; quotes are posted without a bearer token.
    Anonymous,
    Authenticated { masked_token: String },
}

struct Credentials {
    login_url: String,
    username: String,
    password: SecretString,
}

/// HTTP client for the pricing API, with optional bearer-token login.
pub struct QuoteApiClient {
    client: reqwest::Client,
    price_url: String,
    credentials: Option<Credentials>,
    login_timeout: Duration,
}

impl QuoteApiClient {
    pub fn new(price_url: impl Into<String>, timeout: Duration) -> Result<Self, SubmissionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SubmissionError::Client(error.to_string()))?;
        Ok(Self {
            client,
            price_url: price_url.into(),
            credentials: None,
            login_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_login(
        mut self,
        base_url: &str,
        username: impl Into<String>,
        password: SecretString,
        login_timeout: Duration,
    ) -> Self {
        self.credentials = Some(Credentials {
            login_url: format!("{}{LOGIN_PATH}", base_url.trim_end_matches('/')),
            username: username.into(),
            password,
        });
        self.login_timeout = login_timeout;
        self
    }

    pub fn from_config(config: &QuoteApiConfig) -> Result<Self, SubmissionError> {
        let price_url = config
            .price_url
            .as_deref()
            .ok_or(SubmissionError::NotConfigured("quote_api.price_url is not set"))?;
        let client = Self::new(price_url, Duration::from_secs(config.timeout_secs))?;

        let Some(username) = config.username.as_deref() else {
            return Ok(client);
        };
        let base_url = config
            .base_url
            .as_deref()
            .ok_or(SubmissionError::NotConfigured("quote_api.base_url is required for login"))?;
        let password = config
            .password
            .clone()
            .ok_or(SubmissionError::NotConfigured("quote_api.password is required for login"))?;

        Ok(client.with_login(
            base_url,
            username,
            password,
            Duration::from_secs(config.login_timeout_secs),
        ))
    }

    /// Logs in with the configured credentials and reports the outcome.
    pub async fn check_login(&self) -> Result<LoginCheck, SubmissionError> {
        let Some(credentials) = &self.credentials else {
            return Ok(LoginCheck::Anonymous);
        };
        let token = self.login(credentials).await?;
        info!(event_name = "quote_api.login_checked", "quote API login succeeded");
        Ok(LoginCheck::Authenticated { masked_token: mask_token(&token) })
    }

    async fn login(&self, credentials: &Credentials) -> Result<String, SubmissionError> {
        let response = self
            .client
            .post(&credentials.login_url)
            .timeout(self.login_timeout)
            .json(&json!({
                "userID": credentials.username,
                "password": credentials.password.expose_secret(),
            }))
            .send()
            .await
            .map_err(|error| SubmissionError::Login(error.to_string()))?;
        if !response.status().is_success() {
            return Err(SubmissionError::Login(format!("HTTP {}", response.status().as_u16())));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|error| SubmissionError::Login(format!("unreadable response: {error}")))?;
        token_from_login_response(&body)
            .ok_or_else(|| SubmissionError::Login("response did not contain a token".to_owned()))
    }
}

#[async_trait]
impl QuoteSubmitter for QuoteApiClient {
    async fn submit(&self, payload: &QuotePayload) -> Result<String, SubmissionError> {
        let token = match &self.credentials {
            Some(credentials) => Some(self.login(credentials).await?),
            None => None,
        };

        let mut request = self.client.post(&self.price_url).json(payload);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response =
            request.send().await.map_err(|error| SubmissionError::Request(error.to_string()))?;
        let status = response.status();
        let body =
            response.text().await.map_err(|error| SubmissionError::Request(error.to_string()))?;
        if !status.is_success() {
            warn!(
                event_name = "submission.http_error",
                status = status.as_u16(),
                "quote API rejected the request"
            );
            return Err(SubmissionError::Status { status: status.as_u16(), body });
        }

        Ok(render_quote_result(&body))
    }
}

pub fn token_from_login_response(body: &Value) -> Option<String> {
    TOKEN_KEYS
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .find(|token| !token.is_empty())
        .map(str::to_owned)
}

/// First ten and last five characters; short tokens are fully hidden.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 15 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{head}...{tail}")
}

/// Pretty-prints JSON bodies; anything else is returned trimmed.
pub fn render_quote_result(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| body.trim().to_owned())
}
