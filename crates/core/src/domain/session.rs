use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::schema::FormSchema;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("session_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Durable per-session state shared by every workflow node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub form_schema: Option<FormSchema>,
    #[serde(default)]
    pub extracted_data: Map<String, Value>,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub submitted_payload: Option<Value>,
}

impl ConversationState {
    pub fn has_cached_schema(&self) -> bool {
        self.form_schema.as_ref().is_some_and(FormSchema::has_required_fields)
    }

    pub fn latest_user_message(&self) -> Option<&str> {
        self.latest_with_role(ChatRole::User)
    }

    pub fn latest_assistant_message(&self) -> Option<&str> {
        self.latest_with_role(ChatRole::Assistant)
    }

    fn latest_with_role(&self, role: ChatRole) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == role)
            .map(|message| message.content.as_str())
    }

    /// The trailing `window` messages handed to the extractor.
    pub fn recent_messages(&self, window: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    /// Folds a node's output into the state. Messages append, the schema
    /// is only accepted while no schema with required fields is cached, and
    /// every other present field replaces the prior value.
    pub fn apply(&mut self, delta: StateDelta) {
        self.messages.extend(delta.messages);
        if let Some(schema) = delta.form_schema {
            if !self.has_cached_schema() {
                self.form_schema = Some(schema);
            }
        }
        if let Some(extracted_data) = delta.extracted_data {
            self.extracted_data = extracted_data;
        }
        if let Some(missing_fields) = delta.missing_fields {
            self.missing_fields = missing_fields;
        }
        if let Some(is_approved) = delta.is_approved {
            self.is_approved = is_approved;
        }
        if let Some(payload) = delta.submitted_payload {
            self.submitted_payload = Some(payload);
        }
    }
}

/// Partial update returned by a workflow node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateDelta {
    pub messages: Vec<ChatMessage>,
    pub form_schema: Option<FormSchema>,
    pub extracted_data: Option<Map<String, Value>>,
    pub missing_fields: Option<Vec<String>>,
    pub is_approved: Option<bool>,
    pub submitted_payload: Option<Value>,
}

impl StateDelta {
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_form_schema(mut self, schema: FormSchema) -> Self {
        self.form_schema = Some(schema);
        self
    }

    pub fn with_extracted_data(mut self, data: Map<String, Value>) -> Self {
        self.extracted_data = Some(data);
        self
    }

    pub fn with_missing_fields(mut self, missing_fields: Vec<String>) -> Self {
        self.missing_fields = Some(missing_fields);
        self
    }

    pub fn with_approval(mut self, is_approved: bool) -> Self {
        self.is_approved = Some(is_approved);
        self
    }

    pub fn with_submitted_payload(mut self, payload: Value) -> Self {
        self.submitted_payload = Some(payload);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
