//! Agent runtime for the freight quote intake workflow.
//!
//! The runtime drives one conversation turn at a time through the intake
//! graph (`Discover -> Extract -> Validate -> Clarify | Gate -> Submit`),
//! calling out to three collaborators:
//!
//! - [`tools::SchemaDiscovery`] fetches the pricing API's OpenAPI document
//!   and flattens it into a form schema.
//! - [`llm::Extractor`] turns the recent conversation into structured data
//!   constrained by the form schema.
//! - [`tools::QuoteSubmitter`] sends the approved payload to the pricing API.
//!
//! The LLM only ever fills in form fields. It can never approve a quote or
//! overwrite the session key; see [`guardrails`].

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod nodes;
pub mod prompts;
pub mod runtime;
pub mod tools;

pub use llm::{ExtractionError, ExtractionRequest, Extractor, OpenAiCompatibleExtractor};
pub use runtime::{
    RuntimeError, RuntimeSettings, TracingAuditSink, TurnResponse, WorkflowRuntime,
    WorkflowRuntimeBuilder,
};
pub use tools::{
    DiscoveryError, LoginCheck, OpenApiSchemaDiscovery, QuoteApiClient, QuoteSubmitter,
    SchemaDiscovery, SubmissionError,
};
