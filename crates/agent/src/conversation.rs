//! Fixed assistant texts and the deterministic follow-up composed when
//! validation leaves fields missing.

use freightdesk_core::domain::codes::CategoryField;
use freightdesk_core::domain::session::ConversationState;

pub const DETAILS_UPDATED: &str = "Details updated.";
pub const EXTRACTION_FALLBACK: &str =
    "Thanks, I could not pick out any new shipment details from that message.";
pub const REVIEW_REQUIRED: &str = "Review required. Please check extracted data.";
pub const PROCESSING_COMPLETE: &str = "Processing complete.";
pub const SUBMISSION_SUCCESS: &str = "Order successfully generated!";

const CLARIFICATION_HEADER: &str = "I still need a few details before I can prepare your quote:";

/// One bullet per missing entry; entries naming a coded field carry the
/// accepted codes.
pub fn clarification_message(missing_fields: &[String]) -> String {
    if missing_fields.is_empty() {
        return "Could you share the remaining shipment details?".to_owned();
    }

    let mut lines = Vec::with_capacity(missing_fields.len() + 1);
    lines.push(CLARIFICATION_HEADER.to_owned());
    for issue in missing_fields {
        let mut line = format!("- {issue}");
        if let Some(category) = mentioned_category(issue) {
            line.push_str(&format!(" Options: {}", category.option_hint()));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn mentioned_category(issue: &str) -> Option<CategoryField> {
    let normalized = issue.to_ascii_lowercase().replace(' ', "_");
    CategoryField::ALL.into_iter().find(|category| normalized.contains(category.field_name()))
}

pub fn submission_success_message(quote_result: &str) -> String {
    format!("{SUBMISSION_SUCCESS}\n\nQuote Result:\n{quote_result}")
}

pub fn submission_failure_message(reason: &str) -> String {
    format!(
        "The quote could not be submitted: {reason}. Your details are saved; send another message to try again."
    )
}

/// Text returned to the caller for the turn that just ran.
pub fn response_text(state: &ConversationState, is_paused: bool) -> String {
    if is_paused {
        return REVIEW_REQUIRED.to_owned();
    }
    match state.messages.last() {
        Some(message) if !message.content.trim().is_empty() => message.content.clone(),
        _ => PROCESSING_COMPLETE.to_owned(),
    }
}
