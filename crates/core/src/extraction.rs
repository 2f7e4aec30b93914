//! Key-driven description of what the extractor may return, derived from a
//! [`FormSchema`] and evaluated directly against JSON maps.

use serde_json::{json, Map, Number, Value};

use crate::domain::codes::{strip_code_description, CategoryField};
use crate::domain::schema::{leaf_segment, FieldDescriptor, FieldType, FormSchema, ITEM_FIELD_PREFIX};

/// Key under which shipment items are kept as a list of records.
pub const ITEMS_KEY: &str = "items";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Number,
    Boolean,
    Text,
    Code(CategoryField),
}

impl ValueKind {
    pub fn for_descriptor(descriptor: &FieldDescriptor) -> Self {
        if let Some(category) = CategoryField::from_field_name(&descriptor.name) {
            return Self::Code(category);
        }
        match descriptor.field_type {
            FieldType::Integer => Self::Integer,
            FieldType::Number => Self::Number,
            FieldType::Boolean => Self::Boolean,
            _ => Self::Text,
        }
    }

    fn json_schema(&self, description: &str) -> Value {
        let mut schema = match self {
            Self::Integer => json!({ "type": ["integer", "null"] }),
            Self::Number => json!({ "type": ["number", "null"] }),
            Self::Boolean => json!({ "type": ["boolean", "null"] }),
            Self::Text => json!({ "type": ["string", "null"] }),
            Self::Code(category) => {
                let mut codes: Vec<Value> =
                    category.codes().iter().map(|(code, _)| json!(code)).collect();
                codes.push(Value::Null);
                json!({ "type": ["string", "null"], "enum": codes })
            }
        };
        if !description.is_empty() {
            schema["description"] = json!(description);
        }
        schema
    }

    /// Returns `None` for nulls, blanks and values that do not fit the kind.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => None,
            (Self::Integer, Value::Number(number)) => Some(integral(number)),
            (Self::Integer, Value::String(raw)) => {
                let raw = raw.trim();
                raw.parse::<i64>().map(Value::from).ok().or_else(|| {
                    raw.parse::<f64>().ok().and_then(Number::from_f64).map(|n| integral(&n))
                })
            }
            (Self::Number, Value::Number(_)) => Some(value.clone()),
            (Self::Number, Value::String(raw)) => {
                raw.trim().parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
            }
            (Self::Boolean, Value::Bool(_)) => Some(value.clone()),
            (Self::Boolean, Value::String(raw)) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(Value::Bool(true)),
                "false" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Text, Value::String(raw)) => {
                let raw = raw.trim();
                (!raw.is_empty()).then(|| Value::String(raw.to_owned()))
            }
            (Self::Text, Value::Number(number)) => Some(Value::String(number.to_string())),
            (Self::Text, Value::Bool(flag)) => Some(Value::String(flag.to_string())),
            (Self::Code(_), Value::String(raw)) => {
                let code = strip_code_description(raw);
                (!code.is_empty()).then(|| Value::String(code.to_owned()))
            }
            _ => None,
        }
    }
}

fn integral(number: &Number) -> Value {
    match (number.as_i64(), number.as_f64()) {
        (Some(whole), _) => Value::from(whole),
        (None, Some(float)) if float.fract() == 0.0 => Value::from(float as i64),
        _ => Value::Number(number.clone()),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelField {
    pub name: String,
    pub kind: ValueKind,
    pub description: String,
}

impl ModelField {
    fn from_descriptor(name: &str, descriptor: &FieldDescriptor) -> Self {
        Self {
            name: name.to_owned(),
            kind: ValueKind::for_descriptor(descriptor),
            description: descriptor.description.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionModel {
    top_level: Vec<ModelField>,
    item_fields: Vec<ModelField>,
}

impl ExtractionModel {
    pub fn from_schema(schema: &FormSchema) -> Self {
        let mut model = Self::default();
        for descriptor in schema.fields() {
            match descriptor.name.strip_prefix(ITEM_FIELD_PREFIX) {
                Some(item_name) => {
                    if model.item_field(item_name).is_none() {
                        model.item_fields.push(ModelField::from_descriptor(item_name, descriptor));
                    }
                }
                None => {
                    if !model.top_level.iter().any(|field| field.name == descriptor.name) {
                        model
                            .top_level
                            .push(ModelField::from_descriptor(&descriptor.name, descriptor));
                    }
                }
            }
        }
        model
    }

    pub fn top_level_fields(&self) -> &[ModelField] {
        &self.top_level
    }

    pub fn item_fields(&self) -> &[ModelField] {
        &self.item_fields
    }

    pub fn item_field(&self, name: &str) -> Option<&ModelField> {
        self.item_fields.iter().find(|field| field.name == name)
    }

    /// Exact name first, then an unambiguous match on the final segment so
    /// `pickup_zip_code` lands on `quotebasicinfo[].pickup_zip_code`.
    pub fn top_level_field(&self, key: &str) -> Option<&ModelField> {
        if let Some(field) = self.top_level.iter().find(|field| field.name == key) {
            return Some(field);
        }
        let mut aliases = self.top_level.iter().filter(|field| leaf_segment(&field.name) == key);
        match (aliases.next(), aliases.next()) {
            (Some(field), None) => Some(field),
            _ => None,
        }
    }

    /// JSON Schema for structured output. Every property is nullable and
    /// listed as required, items are an array of item records.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.top_level {
            properties.insert(field.name.clone(), field.kind.json_schema(&field.description));
        }
        if !self.item_fields.is_empty() {
            let mut item_properties = Map::new();
            for field in &self.item_fields {
                item_properties
                    .insert(field.name.clone(), field.kind.json_schema(&field.description));
            }
            let item_required: Vec<Value> = item_properties.keys().map(|key| json!(key)).collect();
            properties.insert(
                ITEMS_KEY.to_owned(),
                json!({
                    "type": ["array", "null"],
                    "description": "One entry per distinct shipment item.",
                    "items": {
                        "type": "object",
                        "properties": item_properties,
                        "required": item_required,
                        "additionalProperties": false
                    }
                }),
            );
        }
        let required: Vec<Value> = properties.keys().map(|key| json!(key)).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }

    /// Evaluates an extraction record against the model. Nulls and unknown
    /// keys are dropped, values are coerced to their kind, and flat
    /// `items[].x` keys (scalar or parallel arrays) fold into the `items` list.
    pub fn normalize(&self, raw: &Value) -> Map<String, Value> {
        let mut normalized = Map::new();
        let Some(record) = raw.as_object() else {
            return normalized;
        };

        let mut items: Vec<Map<String, Value>> = record
            .get(ITEMS_KEY)
            .and_then(Value::as_array)
            .map(|entries| {
                entries.iter().filter_map(Value::as_object).map(|item| self.normalize_item(item)).collect()
            })
            .unwrap_or_default();

        for (key, value) in record {
            if key == ITEMS_KEY {
                continue;
            }
            if let Some(item_name) = key.strip_prefix(ITEM_FIELD_PREFIX) {
                let Some(field) = self.item_field(item_name) else {
                    continue;
                };
                let values: Vec<&Value> = match value {
                    Value::Array(values) => values.iter().collect(),
                    scalar => vec![scalar],
                };
                for (index, value) in values.into_iter().enumerate() {
                    let Some(coerced) = field.kind.coerce(value) else {
                        continue;
                    };
                    while items.len() <= index {
                        items.push(Map::new());
                    }
                    items[index].entry(field.name.clone()).or_insert(coerced);
                }
                continue;
            }
            if let Some(field) = self.top_level_field(key) {
                if let Some(coerced) = field.kind.coerce(value) {
                    normalized.insert(field.name.clone(), coerced);
                }
            }
        }

        items.retain(|item| !item.is_empty());
        if !items.is_empty() {
            normalized.insert(
                ITEMS_KEY.to_owned(),
                Value::Array(items.into_iter().map(Value::Object).collect()),
            );
        }
        normalized
    }

    fn normalize_item(&self, item: &Map<String, Value>) -> Map<String, Value> {
        item.iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(ITEM_FIELD_PREFIX).unwrap_or(key);
                let field = self.item_field(name)?;
                field.kind.coerce(value).map(|coerced| (field.name.clone(), coerced))
            })
            .collect()
    }
}
