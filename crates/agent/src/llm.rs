use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use freightdesk_core::config::AppConfig;
use freightdesk_core::domain::session::{ChatMessage, ChatRole};

pub const RESPONSE_SCHEMA_NAME: &str = "freight_quote_fields";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("extraction request failed: {0}")]
    Request(String),
    #[error("extraction provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("extraction provider returned no content")]
    EmptyResponse,
    #[error("extraction output is not a JSON object: {0}")]
    InvalidOutput(String),
    #[error("extraction did not finish within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("no form schema is cached for this session")]
    NoFormSchema,
}

impl ExtractionError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// One structured-extraction call: instructions, the JSON schema the output
/// must satisfy, and the conversation window to read from.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionRequest {
    pub instructions: String,
    pub schema: Value,
    pub history: Vec<ChatMessage>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns the raw JSON object produced by the model. Normalization
    /// against the form schema happens in the caller.
    async fn extract(&self, request: &ExtractionRequest) -> Result<Value, ExtractionError>;
}

/// Chat-completions client for OpenAI and OpenAI-compatible servers
/// (Ollama exposes the same route under `/v1`).
pub struct OpenAiCompatibleExtractor {
    client: reqwest::Client,
    completions_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl OpenAiCompatibleExtractor {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ExtractionError::Client(error.to_string()))?;
        Ok(Self {
            client,
            completions_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
            max_retries: 0,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ExtractionError> {
        Ok(Self::new(
            config.llm_base_url(),
            config.llm.model.clone(),
            config.llm.api_key.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        )?
        .with_max_retries(config.llm.max_retries))
    }

    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }

    async fn send_once(&self, body: &Value) -> Result<Value, ExtractionError> {
        let mut request = self.client.post(&self.completions_url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| ExtractionError::Request(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status { status: status.as_u16(), body });
        }

        let completion = response
            .json::<ChatCompletion>()
            .await
            .map_err(|error| ExtractionError::InvalidOutput(error.to_string()))?;
        parse_completion(completion)
    }
}

#[async_trait]
impl Extractor for OpenAiCompatibleExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Value, ExtractionError> {
        let body = build_request_body(&self.model, request);
        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(value) => {
                    debug!(event_name = "extraction.completed", attempt, "structured output received");
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "extraction.retry",
                        attempt,
                        error = %error,
                        "retrying extraction call"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub fn build_request_body(model: &str, request: &ExtractionRequest) -> Value {
    let mut messages = Vec::with_capacity(request.history.len() + 1);
    messages.push(json!({"role": "system", "content": request.instructions}));
    messages.extend(request.history.iter().map(|message| {
        let role = match message.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        json!({"role": role, "content": message.content})
    }));

    json!({
        "model": model,
        "messages": messages,
        "temperature": 0,
        "stream": false,
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": RESPONSE_SCHEMA_NAME,
                "strict": true,
                "schema": request.schema,
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn parse_completion(completion: ChatCompletion) -> Result<Value, ExtractionError> {
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(ExtractionError::EmptyResponse)?;
    parse_structured_content(&content)
}

/// Parses model output into a JSON object, tolerating a surrounding
/// markdown code fence.
pub fn parse_structured_content(content: &str) -> Result<Value, ExtractionError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|inner| inner.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value = serde_json::from_str::<Value>(unfenced)
        .map_err(|error| ExtractionError::InvalidOutput(error.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ExtractionError::InvalidOutput(format!("expected an object, got `{value}`")))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{
        build_request_body, parse_completion, parse_structured_content, ChatCompletion,
        ExtractionError, ExtractionRequest, OpenAiCompatibleExtractor,
    };
    use freightdesk_core::domain::session::ChatMessage;

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            instructions: "Fill the form.".to_owned(),
            schema: json!({"type": "object", "properties": {}}),
            history: vec![
                ChatMessage::user("ship a 50kg box"),
                ChatMessage::assistant("Details updated."),
            ],
        }
    }

    #[test]
    fn request_body_uses_strict_json_schema_response_format() {
        let body = build_request_body("llama3.1", &request());

        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "ship a 50kg box"}));
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(body["response_format"]["json_schema"]["schema"]["type"], "object");
    }

    #[test]
    fn fenced_and_plain_objects_parse() {
        let plain = parse_structured_content("{\"floor_no\": 2}").expect("plain object");
        assert_eq!(plain, json!({"floor_no": 2}));

        let fenced =
            parse_structured_content("```json\n{\"floor_no\": 3}\n```").expect("fenced object");
        assert_eq!(fenced, json!({"floor_no": 3}));
    }

    #[test]
    fn non_object_output_is_rejected() {
        assert!(matches!(
            parse_structured_content("[1, 2]"),
            Err(ExtractionError::InvalidOutput(_))
        ));
        assert!(matches!(
            parse_structured_content("not json"),
            Err(ExtractionError::InvalidOutput(_))
        ));
    }

    #[test]
    fn completion_without_content_is_empty_response() {
        let completion: ChatCompletion =
            serde_json::from_value(json!({"choices": [{"message": {"content": null}}]}))
                .expect("valid completion");
        assert!(matches!(parse_completion(completion), Err(ExtractionError::EmptyResponse)));

        let completion: ChatCompletion =
            serde_json::from_value(json!({"choices": []})).expect("valid completion");
        assert!(matches!(parse_completion(completion), Err(ExtractionError::EmptyResponse)));
    }

    #[test]
    fn retry_policy_covers_transport_and_server_errors_only() {
        assert!(ExtractionError::Request("reset".to_owned()).is_retryable());
        assert!(ExtractionError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(ExtractionError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!ExtractionError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!ExtractionError::EmptyResponse.is_retryable());
    }

    #[test]
    fn completions_url_is_joined_onto_base() {
        let extractor = OpenAiCompatibleExtractor::new(
            "http://localhost:11434/v1/",
            "llama3.1",
            None,
            Duration::from_secs(5),
        )
        .expect("client builds");
        assert_eq!(extractor.completions_url(), "http://localhost:11434/v1/chat/completions");
    }
}
