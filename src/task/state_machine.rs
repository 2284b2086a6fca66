//! Pure lifecycle transition logic.
//!
//! The state machine owns two contracts: which edges exist, and which side
//! effects a legal transition has on the task record (timestamps, progress
//! freeze/completion). It performs no I/O; the orchestrator persists the task
//! and forwards the emitted [`TaskStateTransition`] to the audit sink.

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::task::model::{Actor, Task, TaskState, TaskStateTransition};
use chrono::Utc;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::{error, info};

/// Allowed edges of the task lifecycle. Terminal states map to empty slices.
static ALLOWED_TRANSITIONS: Lazy<HashMap<TaskState, Vec<TaskState>>> = Lazy::new(|| {
    use TaskState::*;
    HashMap::from([
        (Created, vec![Pending, Cancelled]),
        (Pending, vec![InProgress, AwaitingDocuments, Failed, Cancelled]),
        (AwaitingDocuments, vec![InProgress, Cancelled]),
        (InProgress, vec![UnderReview, AwaitingDocuments, Failed, Cancelled]),
        (UnderReview, vec![Completed, Failed, InProgress]),
        (Completed, vec![]),
        (Failed, vec![]),
        (Cancelled, vec![]),
    ])
});

/// Validates and applies lifecycle transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Whether the edge `current -> target` exists. Pure check, never mutates.
    pub fn validate_transition(current: TaskState, target: TaskState) -> bool {
        ALLOWED_TRANSITIONS
            .get(&current)
            .map(|targets| targets.contains(&target))
            .unwrap_or(false)
    }

    /// Apply a transition to the task and emit the audit record.
    ///
    /// Beyond the edge check, leaving AWAITING_DOCUMENTS for IN_PROGRESS and
    /// entering UNDER_REVIEW both require the submitted document kinds to
    /// cover the required set. Entering COMPLETED stamps `completed_at` and
    /// forces progress to 100; FAILED and CANCELLED freeze progress as-is.
    pub fn apply(
        &self,
        task: &mut Task,
        target: TaskState,
        actor: Actor,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> OrchestrationResult<TaskStateTransition> {
        let from = task.state;

        if !Self::validate_transition(from, target) {
            error!(task_id = %task.id, from = %from, to = %target, "invalid transition rejected");
            return Err(OrchestrationError::InvalidTransition { from, to: target });
        }

        let needs_documents = (from == TaskState::AwaitingDocuments
            && target == TaskState::InProgress)
            || target == TaskState::UnderReview;
        if needs_documents {
            let missing = task.missing_documents();
            if !missing.is_empty() {
                error!(
                    task_id = %task.id,
                    from = %from,
                    to = %target,
                    missing = ?missing,
                    "transition rejected, required documents unmet"
                );
                return Err(OrchestrationError::DocumentsMissing { missing });
            }
        }

        task.state = target;
        task.updated_at = Utc::now();
        if target == TaskState::Completed {
            task.progress = 100;
            task.completed_at = Some(task.updated_at);
        }

        info!(task_id = %task.id, from = %from, to = %target, "task state transition");

        Ok(TaskStateTransition {
            task_id: task.id,
            from_state: Some(from),
            to_state: target,
            transitioned_at: task.updated_at,
            transitioned_by: actor,
            context,
        })
    }

    /// Audit record for task creation (no prior state).
    pub fn initial_record(&self, task: &Task, actor: Actor) -> TaskStateTransition {
        TaskStateTransition {
            task_id: task.id,
            from_state: None,
            to_state: task.state,
            transitioned_at: task.created_at,
            transitioned_by: actor,
            context: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::model::{AgentKind, DocumentKind, DocumentRef, TaskSpec};

    fn task_with_documents(required: &[&str], submitted: &[&str]) -> Task {
        let spec = TaskSpec {
            owner_id: "owner-1".to_string(),
            title: "Carte grise".to_string(),
            description: String::new(),
            agent_kind: AgentKind::Mobility,
            priority: None,
            deadline: None,
            required_documents: required.iter().map(|k| DocumentKind::new(*k)).collect(),
        };
        let mut task = Task::from_spec(spec, Utc::now());
        for (i, kind) in submitted.iter().enumerate() {
            task.submitted_documents.push(DocumentRef {
                document_id: format!("doc-{i}"),
                kind: DocumentKind::new(*kind),
                submitted_at: Utc::now(),
            });
        }
        task
    }

    fn advance(task: &mut Task, target: TaskState) {
        StateMachine::new()
            .apply(task, target, Actor::System, serde_json::Map::new())
            .expect("transition should be legal");
    }

    #[test]
    fn test_allowed_edges() {
        use TaskState::*;
        assert!(StateMachine::validate_transition(Created, Pending));
        assert!(StateMachine::validate_transition(Created, Cancelled));
        assert!(StateMachine::validate_transition(Pending, InProgress));
        assert!(StateMachine::validate_transition(Pending, AwaitingDocuments));
        assert!(StateMachine::validate_transition(AwaitingDocuments, InProgress));
        assert!(StateMachine::validate_transition(InProgress, UnderReview));
        assert!(StateMachine::validate_transition(InProgress, AwaitingDocuments));
        assert!(StateMachine::validate_transition(UnderReview, Completed));
        assert!(StateMachine::validate_transition(UnderReview, InProgress));
    }

    #[test]
    fn test_rejected_edges() {
        use TaskState::*;
        assert!(!StateMachine::validate_transition(Created, InProgress));
        assert!(!StateMachine::validate_transition(Created, Completed));
        assert!(!StateMachine::validate_transition(Pending, UnderReview));
        assert!(!StateMachine::validate_transition(AwaitingDocuments, Failed));
        assert!(!StateMachine::validate_transition(AwaitingDocuments, UnderReview));
        assert!(!StateMachine::validate_transition(UnderReview, Cancelled));
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        use TaskState::*;
        for terminal in [Completed, Failed, Cancelled] {
            for target in [
                Created,
                Pending,
                InProgress,
                AwaitingDocuments,
                UnderReview,
                Completed,
                Failed,
                Cancelled,
            ] {
                assert!(
                    !StateMachine::validate_transition(terminal, target),
                    "{terminal} -> {target} must be rejected"
                );
            }
        }
    }

    #[test]
    fn test_apply_rejects_invalid_edge() {
        let mut task = task_with_documents(&[], &[]);
        let result = StateMachine::new().apply(
            &mut task,
            TaskState::Completed,
            Actor::System,
            serde_json::Map::new(),
        );

        assert!(matches!(
            result,
            Err(OrchestrationError::InvalidTransition {
                from: TaskState::Created,
                to: TaskState::Completed,
            })
        ));
        // Task untouched on rejection
        assert_eq!(task.state, TaskState::Created);
    }

    #[test]
    fn test_apply_emits_audit_record() {
        let mut task = task_with_documents(&[], &[]);
        let mut context = serde_json::Map::new();
        context.insert("trigger".to_string(), serde_json::json!("dispatch"));

        let record = StateMachine::new()
            .apply(&mut task, TaskState::Pending, Actor::User, context)
            .unwrap();

        assert_eq!(record.task_id, task.id);
        assert_eq!(record.from_state, Some(TaskState::Created));
        assert_eq!(record.to_state, TaskState::Pending);
        assert_eq!(record.transitioned_by, Actor::User);
        assert_eq!(record.context["trigger"], serde_json::json!("dispatch"));
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn test_leaving_awaiting_documents_requires_complete_set() {
        let mut task = task_with_documents(&["a", "b"], &["a"]);
        advance(&mut task, TaskState::Pending);
        advance(&mut task, TaskState::AwaitingDocuments);

        let result = StateMachine::new().apply(
            &mut task,
            TaskState::InProgress,
            Actor::System,
            serde_json::Map::new(),
        );
        match result {
            Err(OrchestrationError::DocumentsMissing { missing }) => {
                assert_eq!(missing, vec![DocumentKind::new("b")]);
            }
            other => panic!("expected DocumentsMissing, got {other:?}"),
        }
        assert_eq!(task.state, TaskState::AwaitingDocuments);

        // Cancellation is allowed regardless of document completeness
        advance(&mut task, TaskState::Cancelled);
    }

    #[test]
    fn test_entering_under_review_requires_complete_set() {
        let mut task = task_with_documents(&["a"], &[]);
        advance(&mut task, TaskState::Pending);
        advance(&mut task, TaskState::InProgress);

        let result = StateMachine::new().apply(
            &mut task,
            TaskState::UnderReview,
            Actor::System,
            serde_json::Map::new(),
        );
        assert!(matches!(
            result,
            Err(OrchestrationError::DocumentsMissing { .. })
        ));
    }

    #[test]
    fn test_completed_stamps_completion_and_progress() {
        let mut task = task_with_documents(&["a"], &["a"]);
        advance(&mut task, TaskState::Pending);
        advance(&mut task, TaskState::InProgress);
        task.record_progress(80);
        advance(&mut task, TaskState::UnderReview);
        advance(&mut task, TaskState::Completed);

        assert_eq!(task.progress, 100);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_failed_freezes_progress() {
        let mut task = task_with_documents(&[], &[]);
        advance(&mut task, TaskState::Pending);
        advance(&mut task, TaskState::InProgress);
        task.record_progress(55);
        advance(&mut task, TaskState::Failed);

        assert_eq!(task.progress, 55);
        assert!(task.completed_at.is_none());
        task.record_progress(99);
        assert_eq!(task.progress, 55);
    }

    #[test]
    fn test_initial_record_has_no_from_state() {
        let task = task_with_documents(&[], &[]);
        let record = StateMachine::new().initial_record(&task, Actor::User);

        assert_eq!(record.from_state, None);
        assert_eq!(record.to_state, TaskState::Created);
        assert_eq!(record.transitioned_at, task.created_at);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const ALL_STATES: [TaskState; 8] = [
            TaskState::Created,
            TaskState::Pending,
            TaskState::InProgress,
            TaskState::AwaitingDocuments,
            TaskState::UnderReview,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ];

        proptest! {
            /// A random walk of attempted transitions only ever moves the
            /// task along allowed edges, and never leaves a terminal state.
            #[test]
            fn random_walk_stays_on_allowed_edges(targets in prop::collection::vec(0usize..8, 1..40)) {
                let mut task = task_with_documents(&["a"], &["a"]);
                let machine = StateMachine::new();

                for idx in targets {
                    let target = ALL_STATES[idx];
                    let before = task.state;
                    let result = machine.apply(
                        &mut task,
                        target,
                        Actor::System,
                        serde_json::Map::new(),
                    );

                    match result {
                        Ok(record) => {
                            prop_assert!(StateMachine::validate_transition(before, target));
                            prop_assert!(!before.is_terminal());
                            prop_assert_eq!(record.from_state, Some(before));
                            prop_assert_eq!(task.state, target);
                        }
                        Err(_) => prop_assert_eq!(task.state, before),
                    }
                }
            }
        }
    }
}
