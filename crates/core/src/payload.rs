//! Maps accumulated extraction data onto the pricing backend's request body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::codes::strip_code_description;
use crate::domain::schema::{leaf_segment, BASIC_INFO_GROUP};
use crate::domain::values::is_truthy;
use crate::extraction::ITEMS_KEY;

pub const CHANNEL_ID: &str = "WEBQ2";
pub const LOGIN_USER: i64 = 12708;
pub const ORDER_TYPE: i64 = 10000;
pub const MAX_ITEM_WEIGHT: i64 = 10;
pub const FURNITURE_TYPE: &str = "OTH";
pub const DIMENSION_UNIT: &str = "IN";
pub const DEFAULT_WEIGHT_UNIT: &str = "lb";
pub const DEFAULT_PACKING: &str = "ps";
pub const DEFAULT_SERVICE_LEVEL: &str = "WG";
pub const DEFAULT_PICKUP_TYPE: &str = "bp";

const ITEM_MARKER: &str = "items[]";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("field `{field}` expects a number but got {value}")]
    InvalidNumber { field: String, value: String },
    #[error("item {index} is not a record")]
    InvalidItem { index: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub pickup_zip_code: String,
    pub pickup_military_base: bool,
    pub delivery_zip_code: String,
    pub delivery_military_base: bool,
    pub service_level: String,
    pub pickup_type_code: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayloadItem {
    pub furniture_type: String,
    pub quantity: i64,
    pub assembly_time: i64,
    #[serde(rename = "value_")]
    pub value: f64,
    pub packing_details: String,
    pub estimated_weight: f64,
    pub estimated_weight_unit: String,
    pub dim_length: f64,
    pub dim_width: f64,
    pub dim_height: f64,
    pub dim_unit: String,
    pub user_cu_feet: f64,
}

/// Request body for the pricing call. Field spellings, including the
/// `aviod_*` flags, are the downstream contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotePayload {
    pub quotebasicinfo: Vec<BasicInfo>,
    pub floor_no: i64,
    pub seats: i64,
    pub order_type: i64,
    pub max_item_weight: i64,
    pub max_item_one_side_dim: i64,
    pub client_identifier: String,
    pub elevator_available: bool,
    pub insurance_required: bool,
    pub items: Vec<PayloadItem>,
    pub key: String,
    pub mainkey: String,
    pub channel_id: String,
    pub loginuser: i64,
    pub aviod_ferry: bool,
    pub aviod_outsource: bool,
    pub aviod_pickup_radius: bool,
}

impl QuotePayload {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Clone, Debug, Default)]
pub struct PayloadTransformer;

impl PayloadTransformer {
    pub fn transform(&self, data: &Map<String, Value>) -> Result<QuotePayload, TransformError> {
        let mut basic: BTreeMap<String, &Value> = BTreeMap::new();
        let mut flat_items: BTreeMap<usize, Map<String, Value>> = BTreeMap::new();

        for (key, value) in data {
            if key.contains(BASIC_INFO_GROUP) && !key.contains(ITEMS_KEY) {
                basic.insert(leaf_segment(key).to_owned(), value);
            } else if key.contains(ITEM_MARKER) {
                let field = leaf_segment(key);
                match value {
                    Value::Array(values) => {
                        for (index, value) in values.iter().enumerate() {
                            flat_items.entry(index).or_default().insert(field.to_owned(), value.clone());
                        }
                    }
                    scalar => {
                        flat_items.entry(0).or_default().insert(field.to_owned(), scalar.clone());
                    }
                }
            } else {
                basic.insert(key.clone(), value);
            }
        }
        let get = |key: &str| basic.get(key).copied().filter(|value| !value.is_null());

        let items = if !flat_items.is_empty() {
            flat_items.values().map(transform_item).collect::<Result<Vec<_>, _>>()?
        } else if let Some(Value::Array(entries)) = get(ITEMS_KEY) {
            entries
                .iter()
                .enumerate()
                .map(|(index, entry)| {
                    entry
                        .as_object()
                        .ok_or(TransformError::InvalidItem { index: index + 1 })
                        .and_then(transform_item)
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        let pickup_type = first_truthy(&[get("pickup_type"), get("pickup_type_code")])
            .map(text)
            .unwrap_or_else(|| DEFAULT_PICKUP_TYPE.to_owned());
        let service_level = match get("service_level") {
            Some(Value::Array(levels)) => levels.first().map(text),
            Some(level) => Some(text(level)),
            None => None,
        }
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVICE_LEVEL.to_owned());
        let key = get("key").map(text).unwrap_or_default();

        Ok(QuotePayload {
            quotebasicinfo: vec![BasicInfo {
                pickup_zip_code: get("pickup_zip_code").map(text).unwrap_or_default(),
                pickup_military_base: false,
                delivery_zip_code: get("delivery_zip_code").map(text).unwrap_or_default(),
                delivery_military_base: false,
                service_level,
                pickup_type_code: pickup_type.to_uppercase(),
            }],
            floor_no: integer(
                "floor_no",
                first_truthy(&[get("floor_number"), get("floor_no")]),
                0,
            )?,
            seats: 0,
            order_type: ORDER_TYPE,
            max_item_weight: MAX_ITEM_WEIGHT,
            max_item_one_side_dim: 0,
            client_identifier: String::new(),
            elevator_available: false,
            insurance_required: true,
            items,
            mainkey: key.clone(),
            key,
            channel_id: CHANNEL_ID.to_owned(),
            loginuser: LOGIN_USER,
            aviod_ferry: false,
            aviod_outsource: false,
            aviod_pickup_radius: false,
        })
    }
}

fn transform_item(item: &Map<String, Value>) -> Result<PayloadItem, TransformError> {
    let get = |key: &str| item.get(key).filter(|value| !value.is_null());
    let either = |primary: &str, fallback: &str| first_truthy(&[get(primary), get(fallback)]);

    Ok(PayloadItem {
        furniture_type: FURNITURE_TYPE.to_owned(),
        quantity: integer("quantity", get("quantity"), 1)?,
        assembly_time: integer("assembly_time", either("assembly_time", "assemble_time"), 0)?,
        value: float("value_", get("value_"), 1.0)?,
        packing_details: get("packing_details")
            .map(|value| strip_code_description(&text(value)).to_owned())
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| DEFAULT_PACKING.to_owned()),
        estimated_weight: float("estimated_weight", get("estimated_weight"), 1.0)?,
        estimated_weight_unit: get("estimated_weight_unit")
            .map(text)
            .unwrap_or_else(|| DEFAULT_WEIGHT_UNIT.to_owned()),
        dim_length: float("dim_length", either("dim_length", "length"), 0.0)?,
        dim_width: float("dim_width", either("dim_width", "width"), 0.0)?,
        dim_height: float("dim_height", either("dim_height", "height"), 0.0)?,
        dim_unit: DIMENSION_UNIT.to_owned(),
        user_cu_feet: float("user_cu_feet", either("user_cu_feet", "total_cubic_feet"), 0.0)?,
    })
}

/// First candidate that is present and not zero, blank or false; falls
/// back to the last present candidate so a bad value still surfaces.
fn first_truthy<'v>(candidates: &[Option<&'v Value>]) -> Option<&'v Value> {
    candidates
        .iter()
        .flatten()
        .copied()
        .find(|value| is_truthy(value))
        .or_else(|| candidates.iter().rev().flatten().copied().next())
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn float(field: &str, value: Option<&Value>, default: f64) -> Result<f64, TransformError> {
    let Some(value) = value else {
        return Ok(default);
    };
    let parsed = match value {
        Value::Null => Some(default),
        Value::Number(number) => number.as_f64(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::String(raw) if raw.trim().is_empty() => Some(default),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        Value::Array(_) | Value::Object(_) => None,
    };
    parsed.ok_or_else(|| TransformError::InvalidNumber {
        field: field.to_owned(),
        value: value.to_string(),
    })
}

/// Whole numbers pass through, anything else goes via [`float`] and truncates.
fn integer(field: &str, value: Option<&Value>, default: i64) -> Result<i64, TransformError> {
    let whole = value.and_then(|value| match value {
        Value::Number(number) => number.as_i64(),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    });
    match whole {
        Some(whole) => Ok(whole),
        None => float(field, value, default as f64).map(|number| number.trunc() as i64),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{PayloadTransformer, TransformError, CHANNEL_ID};

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("test data is an object")
    }

    #[test]
    fn maps_structured_items_and_basic_info() {
        let payload = PayloadTransformer
            .transform(&data(json!({
                "quotebasicinfo[].pickup_zip_code": "10001",
                "quotebasicinfo[].delivery_zip_code": "94105",
                "quotebasicinfo[].service_level": "ROC",
                "pickup_type_code": "rp",
                "floor_no": 3,
                "key": "Q-77",
                "items": [
                    { "quantity": 2, "estimated_weight": 40.5, "user_cu_feet": 12, "packing_details": "cc" },
                    { "estimated_weight": "15", "length": 10, "width": 20, "height": 30, "assemble_time": 2 }
                ]
            })))
            .expect("transform succeeds");

        let basic = &payload.quotebasicinfo[0];
        assert_eq!(basic.pickup_zip_code, "10001");
        assert_eq!(basic.delivery_zip_code, "94105");
        assert_eq!(basic.service_level, "ROC");
        assert_eq!(basic.pickup_type_code, "RP");
        assert_eq!(payload.floor_no, 3);
        assert_eq!(payload.key, "Q-77");
        assert_eq!(payload.mainkey, "Q-77");
        assert_eq!(payload.channel_id, CHANNEL_ID);

        assert_eq!(payload.items.len(), 2);
        assert_eq!(payload.items[0].quantity, 2);
        assert_eq!(payload.items[0].packing_details, "cc");
        assert_eq!(payload.items[0].user_cu_feet, 12.0);
        assert_eq!(payload.items[1].quantity, 1);
        assert_eq!(payload.items[1].estimated_weight, 15.0);
        assert_eq!(payload.items[1].dim_height, 30.0);
        assert_eq!(payload.items[1].assembly_time, 2);
        assert_eq!(payload.items[1].packing_details, "ps");
        assert_eq!(payload.items[1].estimated_weight_unit, "lb");
    }

    #[test]
    fn flat_item_keys_take_precedence_and_align_by_index() {
        let payload = PayloadTransformer
            .transform(&data(json!({
                "items[].quantity": [2, 1],
                "items[].estimated_weight": [30, 15],
                "items": [{ "quantity": 9 }]
            })))
            .expect("transform succeeds");

        let pairs: Vec<(i64, f64)> =
            payload.items.iter().map(|item| (item.quantity, item.estimated_weight)).collect();
        assert_eq!(pairs, vec![(2, 30.0), (1, 15.0)]);
    }

    #[test]
    fn blank_candidates_fall_through_to_the_next_alias() {
        let payload = PayloadTransformer
            .transform(&data(json!({
                "pickup_type": "  ",
                "pickup_type_code": "cp",
                "items": [{ "estimated_weight": 5, "length": "  ", "dim_length": 12 }]
            })))
            .expect("transform succeeds");

        assert_eq!(payload.quotebasicinfo[0].pickup_type_code, "CP");
        assert_eq!(payload.items[0].dim_length, 12.0);
    }

    #[test]
    fn defaults_fill_every_field() {
        let payload = PayloadTransformer.transform(&Map::new()).expect("empty data transforms");
        let value = payload.to_value();

        assert_eq!(value["quotebasicinfo"][0]["service_level"], json!("WG"));
        assert_eq!(value["quotebasicinfo"][0]["pickup_type_code"], json!("BP"));
        assert_eq!(value["items"], json!([]));
        assert_eq!(value["order_type"], json!(10000));
        assert_eq!(value["loginuser"], json!(12708));
        assert_eq!(value["insurance_required"], json!(true));
        assert_eq!(value["aviod_pickup_radius"], json!(false));
        assert_eq!(value["key"], json!(""));
    }

    #[test]
    fn scalar_item_keys_become_a_single_item_with_value_suffix() {
        let payload = PayloadTransformer
            .transform(&data(json!({ "items[].estimated_weight": 50, "items[].value_": 250 })))
            .expect("transform succeeds");

        let item = payload.to_value()["items"][0].clone();
        assert_eq!(item["estimated_weight"], json!(50.0));
        assert_eq!(item["value_"], json!(250.0));
        assert_eq!(item["quantity"], json!(1));
        assert_eq!(item["dim_unit"], json!("IN"));
    }

    #[test]
    fn service_level_list_uses_first_entry() {
        let payload = PayloadTransformer
            .transform(&data(json!({ "service_level": ["TRHD", "DS"], "floor_number": "2" })))
            .expect("transform succeeds");
        assert_eq!(payload.quotebasicinfo[0].service_level, "TRHD");
        assert_eq!(payload.floor_no, 2);
    }

    #[test]
    fn uncoercible_numbers_are_errors() {
        let error = PayloadTransformer
            .transform(&data(json!({ "items": [{ "quantity": "a few" }] })))
            .expect_err("quantity cannot be coerced");
        assert_eq!(
            error,
            TransformError::InvalidNumber { field: "quantity".to_owned(), value: "\"a few\"".to_owned() }
        );

        let error = PayloadTransformer
            .transform(&data(json!({ "items": ["sofa"] })))
            .expect_err("items must be records");
        assert_eq!(error, TransformError::InvalidItem { index: 1 });
    }
}
