use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;

use freightdesk_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use freightdesk_core::catalog::DEFAULT_TARGET_PATH;
use freightdesk_core::config::AppConfig;
use freightdesk_core::domain::session::{ChatMessage, SessionId, StateDelta};
use freightdesk_core::errors::{ApplicationError, DomainError};
use freightdesk_core::flows::{
    IntakeWorkflow, NextStep, RouteContext, WorkflowEngine, WorkflowError, WorkflowNode,
};
use freightdesk_db::{RepositoryError, SessionRepository, SessionSnapshot, TransitionRecord};

use crate::conversation::response_text;
use crate::guardrails::GuardrailPolicy;
use crate::llm::{Extractor, OpenAiCompatibleExtractor};
use crate::nodes::{self, NodeContext, NodeError};
use crate::tools::{
    DiscoveryError, OpenApiSchemaDiscovery, QuoteApiClient, QuoteSubmitter, SchemaDiscovery,
};

/// Reserved extracted-data key carrying the caller's quote id.
pub const SEED_KEY_FIELD: &str = "key";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("workflow runtime is missing its {0}")]
    MissingCollaborator(&'static str),
    #[error("workflow runtime configuration is invalid: {0}")]
    Configuration(String),
}

impl From<RuntimeError> for ApplicationError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Workflow(error) => DomainError::Workflow(error).into(),
            RuntimeError::Node(NodeError::Discovery(DiscoveryError::Catalog(error))) => {
                DomainError::Catalog(error).into()
            }
            RuntimeError::Node(error) => Self::Discovery(error.to_string()),
            RuntimeError::Repository(error) => Self::Persistence(error.to_string()),
            RuntimeError::MissingCollaborator(_) | RuntimeError::Configuration(_) => {
                Self::Configuration(error.to_string())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub target_path: String,
    /// Trailing messages handed to the extractor.
    pub history_window: usize,
    pub discovery_timeout: Duration,
    pub extraction_timeout: Duration,
    pub submission_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            target_path: DEFAULT_TARGET_PATH.to_owned(),
            history_window: 6,
            discovery_timeout: Duration::from_secs(15),
            extraction_timeout: Duration::from_secs(60),
            submission_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            target_path: config.discovery.target_path.clone(),
            history_window: config.workflow.history_window,
            discovery_timeout: Duration::from_secs(config.discovery.timeout_secs),
            extraction_timeout: Duration::from_secs(config.llm.timeout_secs),
            submission_timeout: Duration::from_secs(config.quote_api.timeout_secs),
        }
    }
}

/// Result of one `submit_message` or `approve` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnResponse {
    pub session_id: SessionId,
    pub response: String,
    pub is_paused: bool,
    /// The node the session is suspended in front of, if any.
    pub current_node: Option<WorkflowNode>,
    pub extracted_data: Map<String, Value>,
    pub missing_fields: Vec<String>,
    /// The submitted payload, only on the turn that ran the submission.
    pub payload: Option<Value>,
}

/// Writes audit events to the `tracing` pipeline.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            session_id = event.session_id.as_ref().map(SessionId::as_str).unwrap_or("-"),
            category = ?event.category,
            outcome = ?event.outcome,
            actor = %event.actor,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

/// One async mutex per session id; a turn holds its session's lock from load
/// to commit.
#[derive(Default)]
struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(session_id.0.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct WorkflowRuntime {
    repository: Arc<dyn SessionRepository>,
    discovery: Arc<dyn SchemaDiscovery>,
    extractor: Arc<dyn Extractor>,
    submitter: Arc<dyn QuoteSubmitter>,
    audit_sink: Arc<dyn AuditSink>,
    guardrails: GuardrailPolicy,
    settings: RuntimeSettings,
    engine: WorkflowEngine<IntakeWorkflow>,
    session_locks: SessionLocks,
}

impl WorkflowRuntime {
    pub fn builder() -> WorkflowRuntimeBuilder {
        WorkflowRuntimeBuilder::default()
    }

    /// Wires the HTTP collaborators described by `config`.
    pub fn from_config(
        config: &AppConfig,
        repository: Arc<dyn SessionRepository>,
    ) -> Result<Self, RuntimeError> {
        let discovery = OpenApiSchemaDiscovery::from_config(&config.discovery)
            .map_err(|error| RuntimeError::Configuration(error.to_string()))?;
        let extractor = OpenAiCompatibleExtractor::from_config(config)
            .map_err(|error| RuntimeError::Configuration(error.to_string()))?;
        let submitter = QuoteApiClient::from_config(&config.quote_api)
            .map_err(|error| RuntimeError::Configuration(error.to_string()))?;

        Self::builder()
            .repository(repository)
            .discovery(Arc::new(discovery))
            .extractor(Arc::new(extractor))
            .submitter(Arc::new(submitter))
            .settings(RuntimeSettings::from_config(config))
            .build()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Appends a user message and runs the graph: from the start for new or
    /// idle sessions, from the gate (as a rejection) for suspended ones.
    pub async fn submit_message(
        &self,
        session_id: &SessionId,
        text: &str,
        seed_key: Option<&str>,
        correlation_id: &str,
    ) -> Result<TurnResponse, RuntimeError> {
        let _turn = self.session_locks.acquire(session_id).await;
        let audit = AuditContext::new(Some(session_id.clone()), correlation_id, "user");

        let mut snapshot = self
            .repository
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionSnapshot::new(session_id.clone(), Utc::now()));
        let start = self.engine.resume_point(snapshot.pending_node)?;

        let mut intake = StateDelta::default().with_message(ChatMessage::user(text));
        if snapshot.is_new() {
            self.audit_sink.emit(audit.event(
                "session.created",
                AuditCategory::Ingress,
                AuditOutcome::Success,
            ));
            if let Some(seed_key) = seed_key.map(str::trim).filter(|key| !key.is_empty()) {
                let mut seeded = snapshot.state.extracted_data.clone();
                seeded.insert(SEED_KEY_FIELD.to_owned(), Value::String(seed_key.to_owned()));
                intake = intake.with_extracted_data(seeded);
                info!(
                    event_name = "session.key_seeded",
                    correlation_id,
                    session_id = %session_id,
                    "seeded quote key into new session"
                );
            }
        }
        if start == WorkflowNode::Gate {
            intake = intake.with_approval(false);
            self.audit_sink.emit(audit.event(
                "gate.rejected_by_message",
                AuditCategory::Gate,
                AuditOutcome::Rejected,
            ));
        }
        snapshot.state.apply(intake);

        info!(
            event_name = "workflow.turn_started",
            correlation_id,
            session_id = %session_id,
            start_node = start.as_str(),
            "processing message"
        );
        self.run_turn(snapshot, start, &audit).await
    }

    /// Flips the approval flag of a session suspended before the gate and
    /// resumes it through submission. Anything else is rejected untouched.
    pub async fn approve(
        &self,
        session_id: &SessionId,
        correlation_id: &str,
    ) -> Result<TurnResponse, RuntimeError> {
        let _turn = self.session_locks.acquire(session_id).await;
        let audit = AuditContext::new(Some(session_id.clone()), correlation_id, "approver");

        let loaded = self.repository.load(session_id).await?;
        let pending = loaded.as_ref().and_then(|snapshot| snapshot.pending_node);
        let checked = self
            .engine
            .require_awaiting_approval(pending)
            .and_then(|()| loaded.ok_or(WorkflowError::NotAwaitingApproval { pending }));
        let mut snapshot = match checked {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.audit_sink.emit(
                    audit
                        .event("gate.approval_rejected", AuditCategory::Gate, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
                return Err(error.into());
            }
        };

        let start = self.engine.resume_point(snapshot.pending_node)?;
        snapshot.state.apply(StateDelta::default().with_approval(true));
        self.audit_sink.emit(audit.event("gate.approved", AuditCategory::Gate, AuditOutcome::Success));
        info!(
            event_name = "workflow.approval_received",
            correlation_id,
            session_id = %session_id,
            "resuming at gate"
        );
        self.run_turn(snapshot, start, &audit).await
    }

    async fn run_turn(
        &self,
        mut snapshot: SessionSnapshot,
        start: WorkflowNode,
        audit: &AuditContext,
    ) -> Result<TurnResponse, RuntimeError> {
        let context = NodeContext {
            discovery: self.discovery.as_ref(),
            extractor: self.extractor.as_ref(),
            submitter: self.submitter.as_ref(),
            audit_sink: self.audit_sink.as_ref(),
            audit,
            guardrails: &self.guardrails,
            settings: &self.settings,
        };

        let mut transitions = Vec::new();
        let mut submitted = false;
        let mut node = start;
        let pending = loop {
            let delta = nodes::execute(node, &snapshot.state, &context).await?;
            snapshot.state.apply(delta);
            submitted |= node == WorkflowNode::Submit;

            let outcome = self.engine.route_with_audit(
                &node,
                &RouteContext::from_state(&snapshot.state),
                self.audit_sink.as_ref(),
                audit,
            )?;
            transitions.push(TransitionRecord {
                session_id: snapshot.session_id.clone(),
                from_node: outcome.from,
                to: outcome.to,
                reason: outcome.reason,
                correlation_id: audit.correlation_id.clone(),
                occurred_at: Utc::now(),
            });

            match outcome.to {
                NextStep::End => break None,
                NextStep::Node(next) if self.engine.interrupts_before(&next) => {
                    self.audit_sink.emit(
                        audit
                            .event("workflow.suspended", AuditCategory::Workflow, AuditOutcome::Suspended)
                            .with_metadata("before", next.as_str()),
                    );
                    break Some(next);
                }
                NextStep::Node(next) => node = next,
            }
        };

        snapshot.pending_node = pending;
        snapshot.updated_at = Utc::now();
        let version = self.repository.save(&snapshot, &transitions).await?;
        info!(
            event_name = "workflow.turn_committed",
            correlation_id = %audit.correlation_id,
            session_id = %snapshot.session_id,
            version,
            transitions = transitions.len(),
            paused = pending.is_some(),
            "turn committed"
        );

        let is_paused = pending.is_some();
        Ok(TurnResponse {
            response: response_text(&snapshot.state, is_paused),
            session_id: snapshot.session_id,
            is_paused,
            current_node: pending,
            payload: if submitted { snapshot.state.submitted_payload.clone() } else { None },
            extracted_data: snapshot.state.extracted_data,
            missing_fields: snapshot.state.missing_fields,
        })
    }
}

#[derive(Default)]
pub struct WorkflowRuntimeBuilder {
    repository: Option<Arc<dyn SessionRepository>>,
    discovery: Option<Arc<dyn SchemaDiscovery>>,
    extractor: Option<Arc<dyn Extractor>>,
    submitter: Option<Arc<dyn QuoteSubmitter>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    guardrails: Option<GuardrailPolicy>,
    settings: Option<RuntimeSettings>,
}

impl WorkflowRuntimeBuilder {
    pub fn repository(mut self, repository: Arc<dyn SessionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn SchemaDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn submitter(mut self, submitter: Arc<dyn QuoteSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(audit_sink);
        self
    }

    pub fn guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> Result<WorkflowRuntime, RuntimeError> {
        Ok(WorkflowRuntime {
            repository: self.repository.ok_or(RuntimeError::MissingCollaborator("session repository"))?,
            discovery: self.discovery.ok_or(RuntimeError::MissingCollaborator("schema discovery"))?,
            extractor: self.extractor.ok_or(RuntimeError::MissingCollaborator("extractor"))?,
            submitter: self.submitter.ok_or(RuntimeError::MissingCollaborator("quote submitter"))?,
            audit_sink: self.audit_sink.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            guardrails: self.guardrails.unwrap_or_default(),
            settings: self.settings.unwrap_or_default(),
            engine: WorkflowEngine::default(),
            session_locks: SessionLocks::default(),
        })
    }
}
