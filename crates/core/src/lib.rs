//! Domain core for the freight quote intake agent: configuration, error
//! taxonomy, conversation state, and the deterministic stages of the
//! intake workflow.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod extraction;
pub mod flows;
pub mod payload;
pub mod validation;

pub use catalog::{CatalogError, FieldCatalog, FieldCatalogBuilder};
pub use domain::codes::CategoryField;
pub use domain::schema::{EndpointInfo, FieldDescriptor, FieldType, FormSchema};
pub use domain::session::{ChatMessage, ChatRole, ConversationState, SessionId, StateDelta};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use extraction::{ExtractionModel, ValueKind};
pub use flows::{WorkflowEngine, WorkflowError, WorkflowNode};
pub use payload::{PayloadTransformer, QuotePayload, TransformError};
pub use validation::{IntakeValidator, ValidationReport};
