pub mod engine;
pub mod states;

pub use engine::{IntakeWorkflow, WorkflowDefinition, WorkflowEngine, WorkflowError};
pub use states::{NextStep, RouteContext, TransitionOutcome, TransitionReason, WorkflowNode};
