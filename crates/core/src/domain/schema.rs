use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key prefix for fields that belong to a shipment item record.
pub const ITEM_FIELD_PREFIX: &str = "items[].";
/// Key fragment shared by the origin/destination block of the quote request.
pub const BASIC_INFO_GROUP: &str = "quotebasicinfo";
pub const GROUP_MARKER: &str = "[]";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    #[serde(untagged)]
    Other(String),
}

impl FieldType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let label = humanize_field_name(&name);
        Self {
            name,
            label,
            field_type,
            required: false,
            description: String::new(),
            example: None,
            format_regex: None,
            options: None,
            item_type: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_item_field(&self) -> bool {
        self.name.starts_with(ITEM_FIELD_PREFIX)
    }

    /// Belongs to a list group such as `items[]` or `quotebasicinfo[]`.
    pub fn is_grouped(&self) -> bool {
        self.name.contains(GROUP_MARKER)
    }

    /// Final segment of the flattened name.
    pub fn leaf_name(&self) -> &str {
        leaf_segment(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub path: String,
    pub method: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormSchema {
    pub required_fields: Vec<FieldDescriptor>,
    pub optional_fields: Vec<FieldDescriptor>,
    pub endpoint: EndpointInfo,
}

impl FormSchema {
    /// Partitions strictly on each descriptor's `required` flag.
    pub fn from_fields(fields: Vec<FieldDescriptor>, endpoint: EndpointInfo) -> Self {
        let (required_fields, optional_fields) =
            fields.into_iter().partition(|field| field.required);
        Self { required_fields, optional_fields, endpoint }
    }

    pub fn has_required_fields(&self) -> bool {
        !self.required_fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.required_fields.iter().chain(self.optional_fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().find(|field| field.name == name)
    }
}

pub fn leaf_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// `quotebasicinfo[].pickup_zip_code` -> `Pickup Zip Code`.
pub fn humanize_field_name(name: &str) -> String {
    leaf_segment(name)
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
