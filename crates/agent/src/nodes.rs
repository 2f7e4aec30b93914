//! The six intake nodes. Each reads the current state and returns a
//! [`StateDelta`]; routing between them lives in `freightdesk_core::flows`.

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use freightdesk_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use freightdesk_core::domain::session::{ChatMessage, ConversationState, StateDelta};
use freightdesk_core::extraction::ExtractionModel;
use freightdesk_core::flows::WorkflowNode;
use freightdesk_core::payload::PayloadTransformer;
use freightdesk_core::validation::IntakeValidator;

use crate::conversation::{
    clarification_message, submission_failure_message, submission_success_message,
    DETAILS_UPDATED, EXTRACTION_FALLBACK,
};
use crate::guardrails::GuardrailPolicy;
use crate::llm::{ExtractionError, ExtractionRequest, Extractor};
use crate::prompts::extraction_instructions;
use crate::runtime::RuntimeSettings;
use crate::tools::{DiscoveryError, QuoteSubmitter, SchemaDiscovery};

/// Failures that abort a turn. Extraction and submission problems are
/// reported inside the conversation instead.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("schema discovery did not finish within {timeout_secs}s")]
    DiscoveryTimeout { timeout_secs: u64 },
}

pub struct NodeContext<'a> {
    pub discovery: &'a dyn SchemaDiscovery,
    pub extractor: &'a dyn Extractor,
    pub submitter: &'a dyn QuoteSubmitter,
    pub audit_sink: &'a dyn AuditSink,
    pub audit: &'a AuditContext,
    pub guardrails: &'a GuardrailPolicy,
    pub settings: &'a RuntimeSettings,
}

pub async fn execute(
    node: WorkflowNode,
    state: &ConversationState,
    context: &NodeContext<'_>,
) -> Result<StateDelta, NodeError> {
    debug!(
        event_name = "workflow.node_started",
        correlation_id = %context.audit.correlation_id,
        node = node.as_str(),
        "executing node"
    );
    match node {
        WorkflowNode::Discover => discover(state, context).await,
        WorkflowNode::Extract => Ok(extract(state, context).await),
        WorkflowNode::Validate => Ok(validate(state, context)),
        WorkflowNode::Clarify => Ok(clarify(state)),
        WorkflowNode::Gate => Ok(gate(state, context)),
        WorkflowNode::Submit => Ok(submit(state, context).await),
    }
}

pub async fn discover(
    state: &ConversationState,
    context: &NodeContext<'_>,
) -> Result<StateDelta, NodeError> {
    if state.has_cached_schema() {
        debug!(event_name = "discovery.cache_hit", "form schema already cached");
        return Ok(StateDelta::default());
    }

    let limit = context.settings.discovery_timeout;
    let discovered = timeout(limit, context.discovery.discover(&context.settings.target_path))
        .await
        .map_err(|_| NodeError::DiscoveryTimeout { timeout_secs: limit.as_secs() })
        .and_then(|result| result.map_err(NodeError::from));

    match discovered {
        Ok(schema) => {
            context.audit_sink.emit(
                context
                    .audit
                    .event("discovery.schema_cached", AuditCategory::Discovery, AuditOutcome::Success)
                    .with_metadata("required_fields", schema.required_fields.len().to_string())
                    .with_metadata("optional_fields", schema.optional_fields.len().to_string()),
            );
            Ok(StateDelta::default().with_form_schema(schema))
        }
        Err(error) => {
            context.audit_sink.emit(
                context
                    .audit
                    .event("discovery.failed", AuditCategory::Discovery, AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            );
            Err(error)
        }
    }
}

pub async fn extract(state: &ConversationState, context: &NodeContext<'_>) -> StateDelta {
    match extract_fields(state, context).await {
        Ok(merged) => {
            context.audit_sink.emit(
                context
                    .audit
                    .event("extraction.merged", AuditCategory::Extraction, AuditOutcome::Success)
                    .with_metadata("fields", merged.len().to_string()),
            );
            StateDelta::default()
                .with_extracted_data(merged)
                .with_message(ChatMessage::assistant(DETAILS_UPDATED))
        }
        Err(error) => {
            warn!(
                event_name = "extraction.failed",
                correlation_id = %context.audit.correlation_id,
                error = %error,
                "extraction failed; keeping prior data"
            );
            context.audit_sink.emit(
                context
                    .audit
                    .event("extraction.failed", AuditCategory::Extraction, AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            );
            StateDelta::default().with_message(ChatMessage::assistant(EXTRACTION_FALLBACK))
        }
    }
}

async fn extract_fields(
    state: &ConversationState,
    context: &NodeContext<'_>,
) -> Result<Map<String, Value>, ExtractionError> {
    let schema = state.form_schema.as_ref().ok_or(ExtractionError::NoFormSchema)?;
    let model = ExtractionModel::from_schema(schema);
    let request = ExtractionRequest {
        instructions: extraction_instructions(&model),
        schema: model.to_json_schema(),
        history: state.recent_messages(context.settings.history_window).to_vec(),
    };

    let limit = context.settings.extraction_timeout;
    let raw = timeout(limit, context.extractor.extract(&request))
        .await
        .map_err(|_| ExtractionError::Timeout { timeout_secs: limit.as_secs() })??;

    let mut extracted = model.normalize(&raw);
    for stripped in context.guardrails.sanitize(&mut extracted, &state.extracted_data) {
        warn!(
            event_name = "guardrail.key_stripped",
            correlation_id = %context.audit.correlation_id,
            key = %stripped.key,
            reason_code = stripped.reason_code,
            "dropped reserved key from extraction output"
        );
    }

    let mut merged = state.extracted_data.clone();
    merged.extend(extracted);
    Ok(merged)
}

pub fn validate(state: &ConversationState, context: &NodeContext<'_>) -> StateDelta {
    let mut data = state.extracted_data.clone();
    let report = IntakeValidator.validate(
        &mut data,
        state.form_schema.as_ref(),
        state.latest_user_message(),
    );

    let outcome =
        if report.is_gate_ready() { AuditOutcome::Success } else { AuditOutcome::Rejected };
    context.audit_sink.emit(
        context
            .audit
            .event("validation.completed", AuditCategory::Validation, outcome)
            .with_metadata("missing_fields", report.missing_fields.len().to_string())
            .with_metadata("confirmed", report.confirmed.to_string()),
    );

    StateDelta::default().with_extracted_data(data).with_missing_fields(report.missing_fields)
}

pub fn clarify(state: &ConversationState) -> StateDelta {
    StateDelta::default()
        .with_message(ChatMessage::assistant(clarification_message(&state.missing_fields)))
}

pub fn gate(state: &ConversationState, context: &NodeContext<'_>) -> StateDelta {
    let outcome = if state.is_approved { AuditOutcome::Success } else { AuditOutcome::Rejected };
    context.audit_sink.emit(context.audit.event("gate.evaluated", AuditCategory::Gate, outcome));
    StateDelta::default()
}

/// Consumes the approval whatever happens next, so a failed submission has
/// to pass the gate again.
pub async fn submit(state: &ConversationState, context: &NodeContext<'_>) -> StateDelta {
    let delta = StateDelta::default().with_approval(false);

    let payload = match PayloadTransformer.transform(&state.extracted_data) {
        Ok(payload) => payload,
        Err(error) => {
            emit_submission(context, AuditOutcome::Failed, &error.to_string());
            return delta
                .with_message(ChatMessage::assistant(submission_failure_message(&error.to_string())));
        }
    };
    let delta = delta.with_submitted_payload(payload.to_value());

    let limit = context.settings.submission_timeout;
    match timeout(limit, context.submitter.submit(&payload)).await {
        Ok(Ok(quote_result)) => {
            info!(
                event_name = "submission.completed",
                correlation_id = %context.audit.correlation_id,
                items = payload.items.len(),
                "quote submitted"
            );
            emit_submission(context, AuditOutcome::Success, "submitted");
            delta.with_message(ChatMessage::assistant(submission_success_message(&quote_result)))
        }
        Ok(Err(error)) => {
            warn!(
                event_name = "submission.failed",
                correlation_id = %context.audit.correlation_id,
                error = %error,
                "quote submission failed"
            );
            emit_submission(context, AuditOutcome::Failed, &error.to_string());
            delta.with_message(ChatMessage::assistant(submission_failure_message(&error.to_string())))
        }
        Err(_) => {
            let reason =
                format!("the pricing service did not answer within {}s", limit.as_secs());
            warn!(
                event_name = "submission.timed_out",
                correlation_id = %context.audit.correlation_id,
                "quote submission timed out"
            );
            emit_submission(context, AuditOutcome::Failed, &reason);
            delta.with_message(ChatMessage::assistant(submission_failure_message(&reason)))
        }
    }
}

fn emit_submission(context: &NodeContext<'_>, outcome: AuditOutcome, detail: &str) {
    context.audit_sink.emit(
        context
            .audit
            .event("submission.attempted", AuditCategory::Submission, outcome)
            .with_metadata("detail", detail),
    );
}
