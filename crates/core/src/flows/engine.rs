use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{NextStep, RouteContext, TransitionOutcome, TransitionReason, WorkflowNode};

pub trait WorkflowDefinition {
    fn entry(&self) -> WorkflowNode;
    /// Nodes the run must suspend in front of until an external resume.
    fn interrupts_before(&self, node: &WorkflowNode) -> bool;
    fn route(
        &self,
        from: &WorkflowNode,
        context: &RouteContext,
    ) -> Result<TransitionOutcome, WorkflowError>;
}

/// Discover -> Extract -> Validate -> (Clarify | Gate), Gate -> (Submit | Extract).
#[derive(Clone, Debug, Default)]
pub struct IntakeWorkflow;

impl WorkflowDefinition for IntakeWorkflow {
    fn entry(&self) -> WorkflowNode {
        WorkflowNode::Discover
    }

    fn interrupts_before(&self, node: &WorkflowNode) -> bool {
        *node == WorkflowNode::Gate
    }

    fn route(
        &self,
        from: &WorkflowNode,
        context: &RouteContext,
    ) -> Result<TransitionOutcome, WorkflowError> {
        Ok(route_intake(from, context))
    }
}

pub struct WorkflowEngine<W> {
    workflow: W,
}

impl<W> WorkflowEngine<W>
where
    W: WorkflowDefinition,
{
    pub fn new(workflow: W) -> Self {
        Self { workflow }
    }

    pub fn entry(&self) -> WorkflowNode {
        self.workflow.entry()
    }

    pub fn interrupts_before(&self, node: &WorkflowNode) -> bool {
        self.workflow.interrupts_before(node)
    }

    pub fn route(
        &self,
        from: &WorkflowNode,
        context: &RouteContext,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.workflow.route(from, context)
    }

    pub fn route_with_audit<S>(
        &self,
        from: &WorkflowNode,
        context: &RouteContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.route(from, context);
        match &result {
            Ok(outcome) => sink.emit(
                audit
                    .event("workflow.transition_applied", AuditCategory::Workflow, AuditOutcome::Success)
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.to_string())
                    .with_metadata("reason", outcome.reason.as_str()),
            ),
            Err(error) => sink.emit(
                audit
                    .event("workflow.transition_rejected", AuditCategory::Workflow, AuditOutcome::Rejected)
                    .with_metadata("from", from.as_str())
                    .with_metadata("error", error.to_string()),
            ),
        }
        result
    }

    /// Where a run starts: the suspension point when one is recorded,
    /// otherwise the entry node.
    pub fn resume_point(&self, pending: Option<WorkflowNode>) -> Result<WorkflowNode, WorkflowError> {
        match pending {
            None => Ok(self.entry()),
            Some(node) if self.interrupts_before(&node) => Ok(node),
            Some(node) => Err(WorkflowError::InvalidResumePoint { node }),
        }
    }

    pub fn require_awaiting_approval(
        &self,
        pending: Option<WorkflowNode>,
    ) -> Result<(), WorkflowError> {
        match pending {
            Some(WorkflowNode::Gate) => Ok(()),
            pending => Err(WorkflowError::NotAwaitingApproval { pending }),
        }
    }
}

impl Default for WorkflowEngine<IntakeWorkflow> {
    fn default() -> Self {
        Self::new(IntakeWorkflow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("session is not awaiting approval (pending node: {pending:?})")]
    NotAwaitingApproval { pending: Option<WorkflowNode> },
    #[error("cannot resume at {node}: it is not an interrupt point")]
    InvalidResumePoint { node: WorkflowNode },
}

fn route_intake(from: &WorkflowNode, context: &RouteContext) -> TransitionOutcome {
    use TransitionReason::{Approved, FieldsComplete, FieldsMissing, NotApproved, Sequential, TurnComplete};
    use WorkflowNode::{Clarify, Discover, Extract, Gate, Submit, Validate};

    let (to, reason) = match from {
        Discover => (NextStep::Node(Extract), Sequential),
        Extract => (NextStep::Node(Validate), Sequential),
        Validate if context.has_missing_fields => (NextStep::Node(Clarify), FieldsMissing),
        Validate => (NextStep::Node(Gate), FieldsComplete),
        Gate if context.is_approved => (NextStep::Node(Submit), Approved),
        Gate => (NextStep::Node(Extract), NotApproved),
        Clarify | Submit => (NextStep::End, TurnComplete),
    };

    TransitionOutcome { from: *from, to, reason }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::SessionId;
    use crate::flows::engine::{IntakeWorkflow, WorkflowEngine, WorkflowError};
    use crate::flows::states::{NextStep, RouteContext, TransitionReason, WorkflowNode};

    fn context(has_missing_fields: bool, is_approved: bool) -> RouteContext {
        RouteContext { has_missing_fields, is_approved }
    }

    #[test]
    fn complete_pass_routes_to_the_gate() {
        let engine = WorkflowEngine::default();
        let mut node = engine.entry();
        let mut visited = vec![node];
        let ready = context(false, false);

        while node != WorkflowNode::Gate {
            node = match engine.route(&node, &ready).expect("route").to {
                NextStep::Node(next) => next,
                NextStep::End => panic!("pass ended before the gate"),
            };
            visited.push(node);
        }

        assert_eq!(
            visited,
            vec![WorkflowNode::Discover, WorkflowNode::Extract, WorkflowNode::Validate, WorkflowNode::Gate]
        );
        assert!(engine.interrupts_before(&WorkflowNode::Gate));
        assert!(!engine.interrupts_before(&WorkflowNode::Submit));
    }

    #[test]
    fn missing_fields_route_to_clarify_which_ends_the_turn() {
        let engine = WorkflowEngine::new(IntakeWorkflow);
        let outcome = engine.route(&WorkflowNode::Validate, &context(true, false)).expect("route");
        assert_eq!(outcome.to, NextStep::Node(WorkflowNode::Clarify));
        assert_eq!(outcome.reason, TransitionReason::FieldsMissing);

        let outcome = engine.route(&WorkflowNode::Clarify, &context(true, false)).expect("route");
        assert_eq!(outcome.to, NextStep::End);
    }

    #[test]
    fn gate_routes_on_approval_flag() {
        let engine = WorkflowEngine::default();
        let approved = engine.route(&WorkflowNode::Gate, &context(false, true)).expect("route");
        assert_eq!(approved.to, NextStep::Node(WorkflowNode::Submit));

        let rejected = engine.route(&WorkflowNode::Gate, &context(false, false)).expect("route");
        assert_eq!(rejected.to, NextStep::Node(WorkflowNode::Extract));
        assert_eq!(rejected.reason, TransitionReason::NotApproved);

        let done = engine.route(&WorkflowNode::Submit, &context(false, false)).expect("route");
        assert_eq!(done.to, NextStep::End);
    }

    #[test]
    fn resume_dispatches_strictly_on_pending_node() {
        let engine = WorkflowEngine::default();
        assert_eq!(engine.resume_point(None), Ok(WorkflowNode::Discover));
        assert_eq!(engine.resume_point(Some(WorkflowNode::Gate)), Ok(WorkflowNode::Gate));
        assert_eq!(
            engine.resume_point(Some(WorkflowNode::Validate)),
            Err(WorkflowError::InvalidResumePoint { node: WorkflowNode::Validate })
        );
    }

    #[test]
    fn approval_requires_suspension_at_gate() {
        let engine = WorkflowEngine::default();
        assert!(engine.require_awaiting_approval(Some(WorkflowNode::Gate)).is_ok());
        assert_eq!(
            engine.require_awaiting_approval(None),
            Err(WorkflowError::NotAwaitingApproval { pending: None })
        );
    }

    #[test]
    fn routing_is_deterministic() {
        let engine = WorkflowEngine::default();
        for node in WorkflowNode::ALL {
            for (missing, approved) in [(false, false), (true, false), (false, true)] {
                let ctx = context(missing, approved);
                assert_eq!(engine.route(&node, &ctx), engine.route(&node, &ctx));
            }
        }
    }

    #[test]
    fn transition_emits_audit_event() {
        let engine = WorkflowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .route_with_audit(
                &WorkflowNode::Validate,
                &context(false, false),
                &sink,
                &AuditContext::new(Some(SessionId::from("session_9")), "req-42", "workflow"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].event_type, "workflow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("gate"));
        assert_eq!(events[0].metadata.get("reason").map(String::as_str), Some("fields_complete"));
    }
}
