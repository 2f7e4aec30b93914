//! Flattens an OpenAPI request schema into [`FieldDescriptor`]s.
//!
//! Nested objects are encoded as `parent.child`, arrays of objects as
//! `list[].child`. `allOf` branches are merged into the parent prefix.

use serde_json::Value;
use thiserror::Error;

use crate::domain::schema::{
    humanize_field_name, EndpointInfo, FieldDescriptor, FieldType, FormSchema,
};

pub const DEFAULT_TARGET_PATH: &str = "/API/Price/GetPrice2";
pub const DEFAULT_METHOD: &str = "POST";

static EMPTY_SCHEMA: Value = Value::Null;

/// Fields the pricing backend rejects without, whatever the document says.
pub const FORCED_REQUIRED_FIELDS: [&str; 6] = [
    "quotebasicinfo[].pickup_zip_code",
    "quotebasicinfo[].delivery_zip_code",
    "quotebasicinfo[].service_level",
    "items[].quantity",
    "items[].estimated_weight",
    "items[].value_",
];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("schema document is empty")]
    EmptyDocument,
    #[error("no JSON request schema declared for {method} {path}")]
    RootSchemaNotFound { method: String, path: String },
    #[error("request schema for {method} {path} yielded no fields")]
    NoFields { method: String, path: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldCatalog {
    pub endpoint: EndpointInfo,
    pub fields: Vec<FieldDescriptor>,
}

impl FieldCatalog {
    /// Applies the forced-required override and partitions by flag.
    pub fn into_form_schema(mut self) -> FormSchema {
        apply_required_overrides(&mut self.fields);
        FormSchema::from_fields(self.fields, self.endpoint)
    }
}

pub fn apply_required_overrides(fields: &mut [FieldDescriptor]) {
    for field in fields.iter_mut() {
        if FORCED_REQUIRED_FIELDS.contains(&field.name.as_str()) {
            field.required = true;
        }
    }
}

pub struct FieldCatalogBuilder<'a> {
    document: &'a Value,
}

impl<'a> FieldCatalogBuilder<'a> {
    pub fn new(document: &'a Value) -> Self {
        Self { document }
    }

    /// Locates the JSON request body of `POST target_path` and flattens it.
    pub fn build(&self, target_path: &str) -> Result<FieldCatalog, CatalogError> {
        if self.document.is_null()
            || self.document.as_object().is_some_and(serde_json::Map::is_empty)
        {
            return Err(CatalogError::EmptyDocument);
        }

        let not_found = || CatalogError::RootSchemaNotFound {
            method: DEFAULT_METHOD.to_owned(),
            path: target_path.to_owned(),
        };
        let root = self
            .document
            .get("paths")
            .and_then(|paths| paths.get(target_path))
            .and_then(|operation| operation.get("post"))
            .and_then(|post| post.pointer("/requestBody/content/application~1json/schema"))
            .ok_or_else(not_found)?;
        if let Some(reference) = root.get("$ref").and_then(Value::as_str) {
            if self.resolve(reference).is_none() {
                return Err(not_found());
            }
        }

        let fields = self.flatten(root);
        if fields.is_empty() {
            return Err(CatalogError::NoFields {
                method: DEFAULT_METHOD.to_owned(),
                path: target_path.to_owned(),
            });
        }

        Ok(FieldCatalog {
            endpoint: EndpointInfo {
                path: target_path.to_owned(),
                method: DEFAULT_METHOD.to_owned(),
            },
            fields,
        })
    }

    /// Flattens any schema node, following references against the document.
    pub fn flatten(&self, schema: &Value) -> Vec<FieldDescriptor> {
        let mut fields = Vec::new();
        let mut path = Vec::new();
        self.walk(schema, "", &mut path, &mut fields);
        fields
    }

    fn resolve(&self, reference: &str) -> Option<&'a Value> {
        let pointer = reference.strip_prefix('#')?;
        self.document.pointer(pointer)
    }

    /// Follows a `$ref` on `schema`, refusing refs already on the walk path.
    /// Returns the resolved node and the ref that was entered, if any.
    fn enter<'s>(&self, schema: &'s Value, path: &[String]) -> Option<(&'s Value, Option<String>)>
    where
        'a: 's,
    {
        match schema.get("$ref").and_then(Value::as_str) {
            Some(reference) => {
                if path.iter().any(|entered| entered == reference) {
                    return None;
                }
                let resolved = self.resolve(reference).unwrap_or(&EMPTY_SCHEMA);
                Some((resolved, Some(reference.to_owned())))
            }
            None => Some((schema, None)),
        }
    }

    fn walk(
        &self,
        schema: &Value,
        prefix: &str,
        path: &mut Vec<String>,
        out: &mut Vec<FieldDescriptor>,
    ) {
        let Some((schema, entered)) = self.enter(schema, path) else {
            return;
        };
        if let Some(reference) = &entered {
            path.push(reference.clone());
        }

        if let Some(branches) = schema.get("allOf").and_then(Value::as_array) {
            for branch in branches {
                self.walk(branch, prefix, path, out);
            }
        }

        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                let is_required = required.contains(&name.as_str());
                self.walk_property(name, property, prefix, is_required, path, out);
            }
        }

        if entered.is_some() {
            path.pop();
        }
    }

    fn walk_property(
        &self,
        name: &str,
        property: &Value,
        prefix: &str,
        required: bool,
        path: &mut Vec<String>,
        out: &mut Vec<FieldDescriptor>,
    ) {
        let full_name = format!("{prefix}{name}");
        let resolved = self.enter(property, path).map(|(node, _)| node);
        let recursive = resolved.is_none();
        let resolved = resolved.unwrap_or(property);

        if !recursive {
            if resolved.get("allOf").is_some() || resolved.get("properties").is_some() {
                self.walk(property, &format!("{full_name}."), path, out);
                return;
            }

            if resolved.get("type").and_then(Value::as_str) == Some("array") {
                if let Some(items) = resolved.get("items") {
                    let item_schema = self.enter(items, path).map(|(node, _)| node);
                    if item_schema.is_some_and(|node| {
                        node.get("properties").is_some() || node.get("allOf").is_some()
                    }) {
                        self.walk(items, &format!("{full_name}[]."), path, out);
                        return;
                    }
                }
            }
        }

        out.push(describe_leaf(&full_name, name, resolved, required));
    }
}

fn describe_leaf(full_name: &str, name: &str, schema: &Value, required: bool) -> FieldDescriptor {
    let field_type = FieldType::parse(schema.get("type").and_then(Value::as_str).unwrap_or("object"));
    let mut descriptor = FieldDescriptor::new(full_name, field_type).required(required);

    descriptor.label = schema
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| humanize_field_name(name));
    descriptor.description =
        schema.get("description").and_then(Value::as_str).unwrap_or_default().to_owned();
    descriptor.example = schema.get("example").cloned();
    descriptor.format_regex = schema
        .get("pattern")
        .or_else(|| schema.get("format"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    descriptor.options = schema.get("enum").and_then(Value::as_array).cloned();
    if descriptor.field_type == FieldType::Array {
        descriptor.item_type = schema
            .get("items")
            .and_then(|items| items.get("type"))
            .and_then(Value::as_str)
            .map(str::to_owned);
    }
    descriptor
}
