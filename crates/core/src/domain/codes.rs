use serde::{Deserialize, Serialize};

/// The three fields whose values are drawn from closed code sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryField {
    ServiceLevel,
    PackingDetails,
    PickupTypeCode,
}

const SERVICE_LEVEL_CODES: &[(&str, &str)] = &[
    ("WG", "White Glove"),
    ("ROC", "Room of Choice"),
    ("TRHD", "Threshold"),
    ("DS", "Door Step Delivery"),
];

const PACKING_DETAILS_CODES: &[(&str, &str)] = &[
    ("ps", "Packed by Shipper"),
    ("pc", "Packed by Carrier"),
    ("cc", "Crated by Carrier"),
    ("bwc", "Blanket Wrapped by Carrier"),
    ("pcc", "Packed & Crated by Carrier"),
];

const PICKUP_TYPE_CODES: &[(&str, &str)] = &[
    ("bp", "Business Pickup"),
    ("rp", "Residential Pickup"),
    ("dd", "Drop-off at Metro Destination Terminal"),
    ("do", "Drop-off at Metro Origin Terminal"),
    ("mw", "Release from Metro Warehouse"),
];

impl CategoryField {
    pub const ALL: [CategoryField; 3] =
        [CategoryField::ServiceLevel, CategoryField::PackingDetails, CategoryField::PickupTypeCode];

    pub fn field_name(&self) -> &'static str {
        match self {
            Self::ServiceLevel => "service_level",
            Self::PackingDetails => "packing_details",
            Self::PickupTypeCode => "pickup_type_code",
        }
    }

    /// Matches on the final segment of a flattened name, so
    /// `quotebasicinfo[].service_level` resolves like `service_level`.
    pub fn from_field_name(name: &str) -> Option<Self> {
        let leaf = name.rsplit('.').next().unwrap_or(name);
        Self::ALL.into_iter().find(|field| field.field_name() == leaf)
    }

    pub fn codes(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::ServiceLevel => SERVICE_LEVEL_CODES,
            Self::PackingDetails => PACKING_DETAILS_CODES,
            Self::PickupTypeCode => PICKUP_TYPE_CODES,
        }
    }

    pub fn accepts(&self, code: &str) -> bool {
        self.codes().iter().any(|(candidate, _)| *candidate == code)
    }

    /// `"WG (White Glove), ROC (Room of Choice), ..."` for prompts and follow-ups.
    pub fn option_hint(&self) -> String {
        self.codes()
            .iter()
            .map(|(code, description)| format!("{code} ({description})"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Drops a trailing `" (description)"` the extractor sometimes echoes back
/// from the option hints: `"bp (Business Pickup)"` becomes `"bp"`.
pub fn strip_code_description(value: &str) -> &str {
    match value.split_once(" (") {
        Some((code, _)) => code.trim(),
        None => value.trim(),
    }
}
