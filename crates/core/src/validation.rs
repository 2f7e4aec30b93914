//! Deterministic completeness and code-set checks over extracted data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::codes::{strip_code_description, CategoryField};
use crate::domain::schema::{humanize_field_name, FormSchema, BASIC_INFO_GROUP};
use crate::domain::values::is_present;
use crate::extraction::ITEMS_KEY;

/// Words that signal the user wants to move on.
pub const CONFIRMATION_WORDS: [&str; 6] = ["save", "ok", "good", "yes", "correct", "proceed"];

pub const MISSING_ITEMS_MESSAGE: &str = "Shipment Items details are missing.";

const VOLUME_FIELDS: [&str; 2] = ["user_cu_feet", "total_cubic_feet"];
const DIMENSION_FIELDS: [&str; 3] = ["dim_length", "dim_width", "dim_height"];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub missing_fields: Vec<String>,
    /// The latest message confirmed a complete record. Reported for audit
    /// only; gate readiness depends on `missing_fields` alone.
    pub confirmed: bool,
}

impl ValidationReport {
    pub fn is_gate_ready(&self) -> bool {
        self.missing_fields.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct IntakeValidator;

impl IntakeValidator {
    /// Checks `data` against the schema and normalizes coded values in place.
    pub fn validate(
        &self,
        data: &mut Map<String, Value>,
        schema: Option<&FormSchema>,
        latest_user_message: Option<&str>,
    ) -> ValidationReport {
        let mut missing_fields = Vec::new();

        if let Some(schema) = schema {
            // Item and basic-info group fields are covered by the item and code checks.
            for field in schema.required_fields.iter().filter(|field| !field.is_grouped()) {
                if is_blank(data.get(&field.name)) {
                    missing_fields.push(format!("{} is missing.", humanize_field_name(&field.name)));
                }
            }
        }

        let item_count = validate_items(data, &mut missing_fields);

        for category in CategoryField::ALL {
            let plain = category.field_name().to_owned();
            let grouped = format!("{BASIC_INFO_GROUP}[].{}", category.field_name());
            let key = [plain, grouped].into_iter().find(|key| is_present(data.get(key)));
            if let Some(key) = key {
                if let Some(invalid) = normalize_code(category, data, &key) {
                    missing_fields.push(format!("Invalid {}: '{invalid}'.", category.field_name()));
                }
            }
        }

        let confirmed = missing_fields.is_empty()
            && item_count > 0
            && latest_user_message.is_some_and(contains_confirmation);

        ValidationReport { missing_fields, confirmed }
    }
}

fn validate_items(data: &mut Map<String, Value>, missing_fields: &mut Vec<String>) -> usize {
    let items = match data.get_mut(ITEMS_KEY) {
        Some(Value::Array(items)) => items,
        _ => {
            missing_fields.push(MISSING_ITEMS_MESSAGE.to_owned());
            return 0;
        }
    };
    if items.is_empty() {
        missing_fields.push(MISSING_ITEMS_MESSAGE.to_owned());
        return 0;
    }

    for (index, item) in items.iter_mut().enumerate() {
        let number = index + 1;
        let Some(item) = item.as_object_mut() else {
            missing_fields.push(format!("Item {number}: Weight is missing."));
            missing_fields.push(format!("Item {number}: Quantity is missing."));
            missing_fields.push(format!("Item {number}: Dimensions or Volume missing."));
            continue;
        };

        let mut invalid_codes = Vec::new();
        for category in CategoryField::ALL {
            let key = category.field_name();
            if is_present(item.get(key)) {
                if let Some(invalid) = normalize_code(category, item, key) {
                    invalid_codes.push((category, invalid));
                }
            }
        }

        if !is_present(item.get("estimated_weight")) {
            missing_fields.push(format!("Item {number}: Weight is missing."));
        }
        if !is_present(item.get("quantity")) {
            missing_fields.push(format!("Item {number}: Quantity is missing."));
        }
        let has_volume = VOLUME_FIELDS.iter().any(|key| is_present(item.get(*key)));
        let has_dimensions = DIMENSION_FIELDS.iter().all(|key| is_present(item.get(*key)));
        if !has_volume && !has_dimensions {
            missing_fields.push(format!("Item {number}: Dimensions or Volume missing."));
        }
        for (category, invalid) in invalid_codes {
            missing_fields
                .push(format!("Item {number}: Invalid {}: '{invalid}'.", category.field_name()));
        }
    }

    items.len()
}

/// Rewrites the coded value under `key` without its description suffix and
/// returns the cleaned value when it is outside the code set.
fn normalize_code(
    category: CategoryField,
    record: &mut Map<String, Value>,
    key: &str,
) -> Option<String> {
    let raw = match record.get(key)? {
        Value::String(raw) => raw.clone(),
        Value::Array(values) => match values.first() {
            Some(Value::String(raw)) => raw.clone(),
            Some(other) => other.to_string(),
            None => return None,
        },
        other => other.to_string(),
    };
    let cleaned = strip_code_description(&raw).to_owned();
    if matches!(record.get(key), Some(Value::String(_))) {
        record.insert(key.to_owned(), Value::String(cleaned.clone()));
    }
    (!category.accepts(&cleaned)).then_some(cleaned)
}

fn contains_confirmation(message: &str) -> bool {
    let message = message.to_lowercase();
    CONFIRMATION_WORDS.iter().any(|word| message.contains(word))
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}


#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{IntakeValidator, MISSING_ITEMS_MESSAGE};
    use crate::catalog::{FieldCatalogBuilder, DEFAULT_TARGET_PATH};
    use crate::domain::schema::{EndpointInfo, FieldDescriptor, FieldType, FormSchema};

    fn schema() -> FormSchema {
        FormSchema::from_fields(
            vec![
                FieldDescriptor::new("quotebasicinfo[].pickup_zip_code", FieldType::String)
                    .required(true),
                FieldDescriptor::new("quotebasicinfo[].service_level", FieldType::String)
                    .required(true),
                FieldDescriptor::new("items[].estimated_weight", FieldType::Number).required(true),
                FieldDescriptor::new("floor_no", FieldType::Integer),
            ],
            EndpointInfo { path: "/API/Price/GetPrice2".to_owned(), method: "POST".to_owned() },
        )
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("test data is an object")
    }

    fn complete_item() -> Value {
        json!({ "estimated_weight": 50, "quantity": 1, "user_cu_feet": 4 })
    }

    #[test]
    fn zero_items_always_reports_missing_items() {
        let mut record = data(json!({ "quotebasicinfo[].pickup_zip_code": "10001", "items": [] }));
        let report = IntakeValidator.validate(&mut record, Some(&schema()), Some("yes"));

        assert_eq!(report.missing_fields, vec![MISSING_ITEMS_MESSAGE.to_owned()]);
        assert!(!report.is_gate_ready());
        assert!(!report.confirmed);
    }

    #[test]
    fn required_top_level_fields_use_humanized_names() {
        let mut with_date = schema();
        with_date
            .required_fields
            .push(FieldDescriptor::new("pickup_date", FieldType::String).required(true));
        let mut record = data(json!({ "pickup_date": "  ", "items": [complete_item()] }));
        let report = IntakeValidator.validate(&mut record, Some(&with_date), None);

        assert_eq!(report.missing_fields, vec!["Pickup Date is missing.".to_owned()]);
    }

    #[test]
    fn required_list_group_fields_are_left_to_the_item_and_code_checks() {
        let mut record = data(json!({ "items": [complete_item()] }));
        let report = IntakeValidator.validate(&mut record, Some(&schema()), None);

        assert!(report.missing_fields.is_empty(), "{:?}", report.missing_fields);
        assert!(report.is_gate_ready());
    }

    #[test]
    fn item_weight_and_quantity_must_be_non_zero() {
        let mut record = data(json!({
            "quotebasicinfo[].pickup_zip_code": "10001",
            "items": [{ "estimated_weight": 0, "quantity": null, "user_cu_feet": 2 }]
        }));
        let report = IntakeValidator.validate(&mut record, Some(&schema()), None);

        assert_eq!(
            report.missing_fields,
            vec!["Item 1: Weight is missing.".to_owned(), "Item 1: Quantity is missing.".to_owned()]
        );
    }

    #[test]
    fn volume_or_all_three_dimensions_clear_the_size_check() {
        let validator = IntakeValidator;
        let base = json!({ "quotebasicinfo[].pickup_zip_code": "10001" });
        let check = |item: Value| {
            let mut record = data(base.clone());
            record.insert("items".to_owned(), json!([item]));
            validator.validate(&mut record, Some(&schema()), None).missing_fields
        };

        assert_eq!(
            check(json!({ "estimated_weight": 5, "quantity": 1, "dim_length": 10, "dim_width": 10 })),
            vec!["Item 1: Dimensions or Volume missing.".to_owned()]
        );
        assert!(check(json!({
            "estimated_weight": 5, "quantity": 1, "dim_length": 10, "dim_width": 10, "dim_height": 4
        }))
        .is_empty());
        assert!(check(json!({ "estimated_weight": 5, "quantity": 1, "total_cubic_feet": 3 })).is_empty());
    }

    #[test]
    fn out_of_set_codes_are_reported_with_their_value() {
        let mut record = data(json!({
            "quotebasicinfo[].pickup_zip_code": "10001",
            "quotebasicinfo[].service_level": "Express",
            "items": [complete_item()]
        }));
        let report = IntakeValidator.validate(&mut record, Some(&schema()), None);

        assert_eq!(report.missing_fields, vec!["Invalid service_level: 'Express'.".to_owned()]);
    }

    #[test]
    fn in_set_codes_pass_with_or_without_description_suffix() {
        let mut record = data(json!({
            "quotebasicinfo[].pickup_zip_code": "10001",
            "pickup_type_code": "bp (Business Pickup)",
            "service_level": "ROC",
            "items": [{
                "estimated_weight": 5, "quantity": 1, "user_cu_feet": 2,
                "packing_details": "bwc (Blanket Wrapped by Carrier)"
            }]
        }));
        let report = IntakeValidator.validate(&mut record, Some(&schema()), None);

        assert!(report.missing_fields.is_empty(), "{:?}", report.missing_fields);
        assert_eq!(record["pickup_type_code"], json!("bp"));
        assert_eq!(record["items"][0]["packing_details"], json!("bwc"));
    }

    #[test]
    fn invalid_item_packing_is_prefixed_with_item_number() {
        let mut record = data(json!({
            "quotebasicinfo[].pickup_zip_code": "10001",
            "items": [complete_item(), {
                "estimated_weight": 5, "quantity": 1, "user_cu_feet": 2, "packing_details": "box"
            }]
        }));
        let report = IntakeValidator.validate(&mut record, Some(&schema()), None);

        assert_eq!(report.missing_fields, vec!["Item 2: Invalid packing_details: 'box'.".to_owned()]);
    }

    #[test]
    fn confirmation_marks_complete_records_only() {
        let validator = IntakeValidator;
        let mut complete =
            data(json!({ "quotebasicinfo[].pickup_zip_code": "10001", "items": [complete_item()] }));
        let report = validator.validate(&mut complete, Some(&schema()), Some("Looks GOOD, proceed"));
        assert!(report.is_gate_ready());
        assert!(report.confirmed);

        let mut empty = data(json!({ "quotebasicinfo[].pickup_zip_code": "10001" }));
        let report = validator.validate(&mut empty, Some(&schema()), Some("yes"));
        assert!(!report.is_gate_ready());
        assert!(!report.confirmed);
    }

    #[test]
    fn catalog_output_with_forced_group_fields_is_gate_ready() {
        let document = json!({
            "paths": { "/API/Price/GetPrice2": { "post": { "requestBody": { "content": {
                "application/json": { "schema": {
                    "type": "object",
                    "required": ["key"],
                    "properties": {
                        "key": { "type": "string" },
                        "quotebasicinfo": { "type": "array", "items": { "type": "object", "properties": {
                            "pickup_zip_code": { "type": "string" },
                            "service_level": { "type": "string" }
                        } } },
                        "items": { "type": "array", "items": { "type": "object", "properties": {
                            "estimated_weight": { "type": "number" },
                            "quantity": { "type": "integer" }
                        } } }
                    }
                } }
            } } } } }
        });
        let schema = FieldCatalogBuilder::new(&document)
            .build(DEFAULT_TARGET_PATH)
            .expect("catalog builds")
            .into_form_schema();
        assert!(schema.field("quotebasicinfo[].service_level").is_some_and(|field| field.required));

        let mut record = data(json!({ "key": "Q-1", "items": [complete_item()] }));
        let report = IntakeValidator.validate(&mut record, Some(&schema), None);
        assert!(report.is_gate_ready(), "{:?}", report.missing_fields);

        let mut unkeyed = data(json!({ "items": [complete_item()] }));
        let report = IntakeValidator.validate(&mut unkeyed, Some(&schema), None);
        assert_eq!(report.missing_fields, vec!["Key is missing.".to_owned()]);
    }

    #[test]
    fn validates_without_a_schema() {
        let mut record = data(json!({ "items": [complete_item()] }));
        let report = IntakeValidator.validate(&mut record, None, None);
        assert!(report.is_gate_ready());
        assert!(!report.confirmed);
    }
}
