use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::session::ConversationState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowNode {
    Discover,
    Extract,
    Validate,
    Clarify,
    Gate,
    Submit,
}

impl WorkflowNode {
    pub const ALL: [WorkflowNode; 6] = [
        WorkflowNode::Discover,
        WorkflowNode::Extract,
        WorkflowNode::Validate,
        WorkflowNode::Clarify,
        WorkflowNode::Gate,
        WorkflowNode::Submit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Extract => "extract",
            Self::Validate => "validate",
            Self::Clarify => "clarify",
            Self::Gate => "gate",
            Self::Submit => "submit",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|node| node.as_str() == raw)
    }
}

impl fmt::Display for WorkflowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextStep {
    Node(WorkflowNode),
    End,
}

impl NextStep {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "end" => Some(Self::End),
            other => WorkflowNode::parse(other).map(Self::Node),
        }
    }
}

impl fmt::Display for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(node) => node.fmt(f),
            Self::End => f.write_str("end"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionReason {
    Sequential,
    FieldsMissing,
    FieldsComplete,
    Approved,
    NotApproved,
    TurnComplete,
}

impl TransitionReason {
    pub const ALL: [TransitionReason; 6] = [
        TransitionReason::Sequential,
        TransitionReason::FieldsMissing,
        TransitionReason::FieldsComplete,
        TransitionReason::Approved,
        TransitionReason::NotApproved,
        TransitionReason::TurnComplete,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.as_str() == raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::FieldsMissing => "fields_missing",
            Self::FieldsComplete => "fields_complete",
            Self::Approved => "approved",
            Self::NotApproved => "not_approved",
            Self::TurnComplete => "turn_complete",
        }
    }
}

/// What routing reads from the conversation state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteContext {
    pub has_missing_fields: bool,
    pub is_approved: bool,
}

impl RouteContext {
    pub fn from_state(state: &ConversationState) -> Self {
        Self { has_missing_fields: !state.missing_fields.is_empty(), is_approved: state.is_approved }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: WorkflowNode,
    pub to: NextStep,
    pub reason: TransitionReason,
}
