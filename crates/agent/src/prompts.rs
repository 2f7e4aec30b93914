use freightdesk_core::domain::schema::leaf_segment;
use freightdesk_core::extraction::{ExtractionModel, ModelField, ValueKind, ITEMS_KEY};

pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You fill in a freight quote request form from a shipping conversation.

Category fields:
1. Fields marked USE CODES ONLY accept exactly one of the listed short codes.
2. Codes never cross categories. A packing code is never a pickup type and a pickup code is never a service level.
3. When the user's wording fits none of the codes for that field, return null. Do not guess.

Values:
- Convert kilograms to pounds (x 2.20462) and centimetres to inches (/ 2.54).
- Otherwise copy numbers exactly as the user gave them.
- When the user gives a volume in cubic feet, set user_cu_feet and leave the dimensions null.
- Return null for anything the conversation does not state.

Return only the JSON object.";

pub const MULTI_ITEM_RULES: &str = "\
Multiple items:
1. Separate items described by the user become separate entries in the items list.
2. Never merge separate items into one entry by raising its quantity.
3. Every entry in the items list carries its own weight, value, quantity and dimensions.";

/// One line per form field, with the code list for category fields.
pub fn field_guide(model: &ExtractionModel) -> Vec<String> {
    let top_level = model.top_level_fields().iter().map(|field| guide_line(field, false));
    let items = model.item_fields().iter().map(|field| guide_line(field, true));
    top_level.chain(items).collect()
}

fn guide_line(field: &ModelField, in_items: bool) -> String {
    let mut line = format!("- {} ({})", leaf_segment(&field.name), kind_label(&field.kind));
    if in_items {
        line.push_str(&format!(" [per entry in `{ITEMS_KEY}`]"));
    }
    if let ValueKind::Code(category) = field.kind {
        let codes: Vec<String> = category
            .codes()
            .iter()
            .map(|(code, description)| format!("{code}: {description}"))
            .collect();
        line.push_str(&format!(" | USE CODES ONLY: [{}]", codes.join(", ")));
    }
    if !field.description.is_empty() {
        line.push_str(&format!(" | {}", field.description));
    }
    line
}

fn kind_label(kind: &ValueKind) -> &'static str {
    match kind {
        ValueKind::Integer => "integer",
        ValueKind::Number => "number",
        ValueKind::Boolean => "boolean",
        ValueKind::Text => "string",
        ValueKind::Code(_) => "code",
    }
}

pub fn extraction_instructions(model: &ExtractionModel) -> String {
    format!(
        "{EXTRACTION_SYSTEM_PROMPT}\n\n{MULTI_ITEM_RULES}\n\nFields:\n{}",
        field_guide(model).join("\n")
    )
}
