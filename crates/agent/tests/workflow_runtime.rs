use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use freightdesk_agent::conversation::{EXTRACTION_FALLBACK, REVIEW_REQUIRED};
use freightdesk_agent::llm::{ExtractionError, ExtractionRequest, Extractor};
use freightdesk_agent::nodes::NodeError;
use freightdesk_agent::runtime::{RuntimeError, RuntimeSettings, WorkflowRuntime};
use freightdesk_agent::tools::{
    form_schema_from_document, DiscoveryError, QuoteSubmitter, SchemaDiscovery, SubmissionError,
};
use freightdesk_core::audit::InMemoryAuditSink;
use freightdesk_core::catalog::DEFAULT_TARGET_PATH;
use freightdesk_core::domain::schema::{EndpointInfo, FieldDescriptor, FieldType, FormSchema};
use freightdesk_core::domain::session::{ChatRole, SessionId};
use freightdesk_core::flows::{NextStep, TransitionReason, WorkflowError, WorkflowNode};
use freightdesk_core::payload::QuotePayload;
use freightdesk_core::validation::MISSING_ITEMS_MESSAGE;
use freightdesk_db::{InMemorySessionRepository, SessionRepository};

struct ScriptedDiscovery {
    schema: FormSchema,
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl SchemaDiscovery for ScriptedDiscovery {
    async fn discover(&self, _target_path: &str) -> Result<FormSchema, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DiscoveryError::Request("connection refused".to_owned()));
        }
        Ok(self.schema.clone())
    }
}

#[derive(Default)]
struct ScriptedExtractor {
    outputs: Mutex<VecDeque<Result<Value, ExtractionError>>>,
    requests: Mutex<Vec<ExtractionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedExtractor {
    fn with_outputs(outputs: Vec<Result<Value, ExtractionError>>) -> Self {
        Self { outputs: Mutex::new(outputs.into()), ..Self::default() }
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Value, ExtractionError> {
        self.requests.lock().expect("requests lock").push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outputs.lock().expect("outputs lock").pop_front().unwrap_or_else(|| Ok(json!({})))
    }
}

#[derive(Default)]
struct RecordingSubmitter {
    fail: bool,
    payloads: Mutex<Vec<QuotePayload>>,
}

#[async_trait]
impl QuoteSubmitter for RecordingSubmitter {
    async fn submit(&self, payload: &QuotePayload) -> Result<String, SubmissionError> {
        self.payloads.lock().expect("payloads lock").push(payload.clone());
        if self.fail {
            return Err(SubmissionError::Status { status: 502, body: "bad gateway".to_owned() });
        }
        Ok("{\"price\": 99.5}".to_owned())
    }
}

struct Harness {
    runtime: WorkflowRuntime,
    repository: Arc<InMemorySessionRepository>,
    discovery: Arc<ScriptedDiscovery>,
    extractor: Arc<ScriptedExtractor>,
    submitter: Arc<RecordingSubmitter>,
    audit: InMemoryAuditSink,
}

struct HarnessOptions {
    schema: FormSchema,
    outputs: Vec<Result<Value, ExtractionError>>,
    discovery_fails: bool,
    submission_fails: bool,
    extractor_delay: Option<Duration>,
    settings: RuntimeSettings,
}

impl HarnessOptions {
    fn new(outputs: Vec<Result<Value, ExtractionError>>) -> Self {
        Self {
            schema: weight_only_schema(),
            outputs,
            discovery_fails: false,
            submission_fails: false,
            extractor_delay: None,
            settings: RuntimeSettings::default(),
        }
    }

    fn build(self) -> Harness {
        let repository = Arc::new(InMemorySessionRepository::default());
        let discovery = Arc::new(ScriptedDiscovery {
            schema: self.schema,
            fail: self.discovery_fails,
            calls: AtomicUsize::new(0),
        });
        let extractor = Arc::new(ScriptedExtractor {
            delay: self.extractor_delay,
            ..ScriptedExtractor::with_outputs(self.outputs)
        });
        let submitter =
            Arc::new(RecordingSubmitter { fail: self.submission_fails, ..Default::default() });
        let audit = InMemoryAuditSink::default();

        let runtime = WorkflowRuntime::builder()
            .repository(repository.clone())
            .discovery(discovery.clone())
            .extractor(extractor.clone())
            .submitter(submitter.clone())
            .audit_sink(Arc::new(audit.clone()))
            .settings(self.settings)
            .build()
            .expect("runtime builds");

        Harness { runtime, repository, discovery, extractor, submitter, audit }
    }
}

fn endpoint() -> EndpointInfo {
    EndpointInfo { path: "/API/Price/GetPrice2".to_owned(), method: "POST".to_owned() }
}

fn weight_only_schema() -> FormSchema {
    FormSchema::from_fields(
        vec![
            FieldDescriptor::new("items[].estimated_weight", FieldType::Number).required(true),
            FieldDescriptor::new("items[].quantity", FieldType::Integer),
            FieldDescriptor::new("items[].user_cu_feet", FieldType::Number),
            FieldDescriptor::new("key", FieldType::String),
        ],
        endpoint(),
    )
}

fn one_box(weight: f64) -> Value {
    json!({ "items": [{ "estimated_weight": weight, "quantity": 1, "user_cu_feet": 3 }] })
}

#[tokio::test]
async fn new_session_suspends_before_gate_and_approval_submits() {
    let harness = HarnessOptions::new(vec![Ok(one_box(110.23))]).build();
    let session = SessionId::from("session_e2e");

    let paused = harness
        .runtime
        .submit_message(&session, "ship 50kg box", None, "req-1")
        .await
        .expect("first turn");

    assert!(paused.is_paused);
    assert_eq!(paused.current_node, Some(WorkflowNode::Gate));
    assert_eq!(paused.response, REVIEW_REQUIRED);
    assert!(paused.missing_fields.is_empty());
    assert!(paused.payload.is_none());
    assert_eq!(paused.extracted_data["items"][0]["estimated_weight"], json!(110.23));

    let stored = harness.repository.load(&session).await.expect("load").expect("saved");
    assert!(!stored.state.is_approved);
    assert_eq!(stored.pending_node, Some(WorkflowNode::Gate));
    assert!(harness.submitter.payloads.lock().expect("payloads").is_empty());

    let submitted = harness.runtime.approve(&session, "req-2").await.expect("approve");

    assert!(!submitted.is_paused);
    assert_eq!(submitted.current_node, None);
    assert!(submitted.response.starts_with("Order successfully generated!\n\nQuote Result:\n"));
    assert!(submitted.response.ends_with("{\"price\": 99.5}"));
    let payload = submitted.payload.expect("payload returned on submission turn");
    assert_eq!(payload["items"][0]["estimated_weight"], json!(110.23));
    assert_eq!(payload["items"][0]["value_"], json!(1.0));
    assert_eq!(payload["channel_id"], json!("WEBQ2"));

    let stored = harness.repository.load(&session).await.expect("load").expect("saved");
    assert!(!stored.state.is_approved, "submission consumes the approval");
    assert_eq!(stored.pending_node, None);
    assert_eq!(harness.submitter.payloads.lock().expect("payloads").len(), 1);

    let transitions = harness.repository.list_transitions(&session).await.expect("transitions");
    let path: Vec<(WorkflowNode, NextStep)> =
        transitions.iter().map(|record| (record.from_node, record.to)).collect();
    assert_eq!(
        path,
        vec![
            (WorkflowNode::Discover, NextStep::Node(WorkflowNode::Extract)),
            (WorkflowNode::Extract, NextStep::Node(WorkflowNode::Validate)),
            (WorkflowNode::Validate, NextStep::Node(WorkflowNode::Gate)),
            (WorkflowNode::Gate, NextStep::Node(WorkflowNode::Submit)),
            (WorkflowNode::Submit, NextStep::End),
        ]
    );

    let events = harness.audit.event_types();
    assert!(events.contains(&"workflow.suspended".to_owned()));
    assert!(events.contains(&"gate.approved".to_owned()));
    assert!(events.contains(&"submission.attempted".to_owned()));
}

#[tokio::test]
async fn cached_schema_skips_discovery_on_later_turns() {
    let harness = HarnessOptions::new(vec![Ok(json!({})), Ok(json!({}))]).build();
    let session = SessionId::from("session_cache");

    for (text, correlation_id) in [("hello", "req-1"), ("still there?", "req-2")] {
        let turn = harness
            .runtime
            .submit_message(&session, text, None, correlation_id)
            .await
            .expect("turn");
        assert!(!turn.is_paused);
        assert_eq!(turn.missing_fields, vec![MISSING_ITEMS_MESSAGE.to_owned()]);
        assert!(turn.response.contains(MISSING_ITEMS_MESSAGE));
    }

    assert_eq!(harness.discovery.calls.load(Ordering::SeqCst), 1);
    let stored = harness.repository.load(&session).await.expect("load").expect("saved");
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn approve_outside_gate_is_rejected_without_mutation() {
    let harness = HarnessOptions::new(vec![Ok(json!({}))]).build();
    let session = SessionId::from("session_not_at_gate");

    let unknown = harness
        .runtime
        .approve(&SessionId::from("session_missing"), "req-0")
        .await
        .err()
        .expect("unknown session cannot be approved");
    assert!(matches!(
        unknown,
        RuntimeError::Workflow(WorkflowError::NotAwaitingApproval { pending: None })
    ));
    assert!(harness
        .repository
        .load(&SessionId::from("session_missing"))
        .await
        .expect("load")
        .is_none());

    harness.runtime.submit_message(&session, "hi", None, "req-1").await.expect("turn");
    let before = harness.repository.load(&session).await.expect("load").expect("saved");
    let transitions_before =
        harness.repository.list_transitions(&session).await.expect("transitions").len();

    let error = harness.runtime.approve(&session, "req-2").await.err().expect("not at gate");
    assert!(matches!(error, RuntimeError::Workflow(WorkflowError::NotAwaitingApproval { .. })));

    let after = harness.repository.load(&session).await.expect("load").expect("saved");
    assert_eq!(before, after);
    assert_eq!(
        harness.repository.list_transitions(&session).await.expect("transitions").len(),
        transitions_before
    );
    assert!(harness.audit.event_types().contains(&"gate.approval_rejected".to_owned()));
}

#[tokio::test]
async fn message_at_gate_rejects_and_resumes_from_gate() {
    let harness = HarnessOptions::new(vec![Ok(one_box(110.23)), Ok(one_box(132.28))]).build();
    let session = SessionId::from("session_reject");

    harness.runtime.submit_message(&session, "ship 50kg box", None, "req-1").await.expect("turn");
    let second = harness
        .runtime
        .submit_message(&session, "actually it weighs 60kg", None, "req-2")
        .await
        .expect("rejection turn");

    assert!(second.is_paused);
    assert_eq!(second.extracted_data["items"][0]["estimated_weight"], json!(132.28));
    assert_eq!(harness.discovery.calls.load(Ordering::SeqCst), 1);
    assert!(harness.submitter.payloads.lock().expect("payloads").is_empty());

    let transitions = harness.repository.list_transitions(&session).await.expect("transitions");
    let resumed: Vec<_> =
        transitions.iter().skip(3).map(|record| (record.from_node, record.reason)).collect();
    assert_eq!(
        resumed,
        vec![
            (WorkflowNode::Gate, TransitionReason::NotApproved),
            (WorkflowNode::Extract, TransitionReason::Sequential),
            (WorkflowNode::Validate, TransitionReason::FieldsComplete),
        ]
    );

    let requests = harness.extractor.requests.lock().expect("requests");
    let last_history = &requests.last().expect("second extraction").history;
    assert_eq!(last_history.last().map(|message| message.role), Some(ChatRole::User));
}

#[tokio::test]
async fn discovery_failure_aborts_the_turn_without_writing() {
    let mut options = HarnessOptions::new(Vec::new());
    options.discovery_fails = true;
    let harness = options.build();
    let session = SessionId::from("session_discovery_down");

    let error = harness
        .runtime
        .submit_message(&session, "ship a box", None, "req-1")
        .await
        .err()
        .expect("discovery failure is fatal");

    assert!(matches!(error, RuntimeError::Node(NodeError::Discovery(_))));
    assert!(harness.repository.load(&session).await.expect("load").is_none());
    assert!(harness.audit.event_types().contains(&"discovery.failed".to_owned()));
}

#[tokio::test]
async fn extraction_failure_and_timeout_are_absorbed() {
    let mut options = HarnessOptions::new(vec![Err(ExtractionError::EmptyResponse)]);
    options.extractor_delay = Some(Duration::from_millis(5));
    options.settings =
        RuntimeSettings { extraction_timeout: Duration::from_secs(5), ..RuntimeSettings::default() };
    let harness = options.build();
    let session = SessionId::from("session_extract_fail");

    let turn =
        harness.runtime.submit_message(&session, "ship a box", None, "req-1").await.expect("turn");
    assert_eq!(turn.missing_fields, vec![MISSING_ITEMS_MESSAGE.to_owned()]);
    assert!(turn.extracted_data.is_empty());

    let stored = harness.repository.load(&session).await.expect("load").expect("saved");
    assert!(stored.state.messages.iter().any(|message| message.content == EXTRACTION_FALLBACK));

    let mut slow = HarnessOptions::new(vec![Ok(one_box(110.23))]);
    slow.extractor_delay = Some(Duration::from_millis(500));
    slow.settings = RuntimeSettings {
        extraction_timeout: Duration::from_millis(20),
        ..RuntimeSettings::default()
    };
    let slow = slow.build();

    let turn =
        slow.runtime.submit_message(&session, "ship a box", None, "req-2").await.expect("turn");
    assert!(!turn.is_paused, "timed-out extraction leaves the record incomplete");
    assert!(turn.extracted_data.is_empty());
}

#[tokio::test]
async fn seeded_key_survives_extraction_and_reaches_payload() {
    let mut output = one_box(110.23);
    output["key"] = json!("Q-999");
    output["is_approved"] = json!(true);
    let harness = HarnessOptions::new(vec![Ok(output)]).build();
    let session = SessionId::from("session_seeded");

    let paused = harness
        .runtime
        .submit_message(&session, "ship 50kg box", Some("Q-100"), "req-1")
        .await
        .expect("turn");
    assert_eq!(paused.extracted_data["key"], json!("Q-100"));
    assert!(paused.extracted_data.get("is_approved").is_none());

    let stored = harness.repository.load(&session).await.expect("load").expect("saved");
    assert!(!stored.state.is_approved);

    let submitted = harness.runtime.approve(&session, "req-2").await.expect("approve");
    let payload = submitted.payload.expect("payload");
    assert_eq!(payload["key"], json!("Q-100"));
    assert_eq!(payload["mainkey"], json!("Q-100"));
}

#[tokio::test]
async fn submission_failure_is_reported_and_session_stays_resumable() {
    let mut options = HarnessOptions::new(vec![Ok(one_box(110.23)), Ok(one_box(110.23))]);
    options.submission_fails = true;
    let harness = options.build();
    let session = SessionId::from("session_submit_fail");

    harness.runtime.submit_message(&session, "ship 50kg box", None, "req-1").await.expect("turn");
    let failed = harness.runtime.approve(&session, "req-2").await.expect("approve runs");

    assert!(!failed.is_paused);
    assert!(failed.response.contains("could not be submitted"));
    assert!(failed.response.contains("502"));
    assert!(failed.payload.is_some());

    let stored = harness.repository.load(&session).await.expect("load").expect("saved");
    assert!(!stored.state.is_approved);
    assert_eq!(stored.pending_node, None);

    let again = harness
        .runtime
        .submit_message(&session, "please try again", None, "req-3")
        .await
        .expect("new pass");
    assert!(again.is_paused);
    assert_eq!(harness.discovery.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_turns_on_one_session_are_serialized() {
    let harness = HarnessOptions::new(vec![Ok(json!({})), Ok(json!({}))]).build();
    let session = SessionId::from("session_concurrent");

    let (first, second) = tokio::join!(
        harness.runtime.submit_message(&session, "first", None, "req-1"),
        harness.runtime.submit_message(&session, "second", None, "req-2"),
    );
    first.expect("first turn");
    second.expect("second turn");

    let stored = harness.repository.load(&session).await.expect("load").expect("saved");
    assert_eq!(stored.version, 2);
    let user_messages =
        stored.state.messages.iter().filter(|message| message.role == ChatRole::User).count();
    assert_eq!(user_messages, 2);
    assert_eq!(harness.discovery.calls.load(Ordering::SeqCst), 1);
}

fn pricing_document() -> Value {
    json!({
        "paths": {
            "/API/Price/GetPrice2": {
                "post": {
                    "requestBody": {
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/PriceRequest" }
                            }
                        }
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "PriceRequest": {
                    "type": "object",
                    "properties": {
                        "key": { "type": "string" },
                        "floor_no": { "type": "integer" },
                        "quotebasicinfo": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "pickup_zip_code": { "type": "string" },
                                    "delivery_zip_code": { "type": "string" },
                                    "service_level": { "type": "string" }
                                }
                            }
                        },
                        "items": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "estimated_weight": { "type": "number" },
                                    "quantity": { "type": "integer" },
                                    "user_cu_feet": { "type": "number" },
                                    "value_": { "type": "number" }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

#[tokio::test]
async fn discovered_catalog_with_basic_info_group_reaches_the_gate() {
    let schema = form_schema_from_document(&pricing_document(), DEFAULT_TARGET_PATH)
        .expect("catalog builds from the pricing document");
    let required: Vec<&str> =
        schema.required_fields.iter().map(|field| field.name.as_str()).collect();
    assert!(required.contains(&"quotebasicinfo[].pickup_zip_code"));
    assert!(required.contains(&"quotebasicinfo[].service_level"));

    let harness = HarnessOptions { schema, ..HarnessOptions::new(vec![Ok(one_box(50.0))]) }.build();
    let session = SessionId::from("session_discovered_catalog");

    let paused = harness
        .runtime
        .submit_message(&session, "ship 50kg box", None, "req-1")
        .await
        .expect("turn succeeds");
    assert!(paused.missing_fields.is_empty(), "{:?}", paused.missing_fields);
    assert!(paused.is_paused);
    assert_eq!(paused.current_node, Some(WorkflowNode::Gate));

    let submitted = harness.runtime.approve(&session, "req-2").await.expect("approval submits");
    let payload = submitted.payload.expect("payload on submission turn");
    assert_eq!(payload["quotebasicinfo"][0]["service_level"], json!("WG"));
    assert_eq!(payload["items"][0]["estimated_weight"], json!(50.0));
}
