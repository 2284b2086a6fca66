//! Core domain types for administrative tasks.
//!
//! A [`Task`] tracks one administrative procedure (a tax declaration, a health
//! reimbursement claim, a vehicle registration...) through a fixed lifecycle.
//! Sensitive payloads never live here: task metadata carries vault record
//! references, the ciphertext stays in [`crate::vault`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Pending,
    InProgress,
    AwaitingDocuments,
    UnderReview,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Terminal states have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::AwaitingDocuments => "awaiting_documents",
            TaskState::UnderReview => "under_review",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority, ordered most urgent first so sorting ascending puts
/// urgent work at the front.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Urgent,
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    /// Derive priority from a deadline: overdue tasks are urgent, then the
    /// bands narrow with time remaining.
    pub fn from_deadline(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(deadline) = deadline else {
            return TaskPriority::Medium;
        };

        let days_remaining = (deadline - now).num_days();
        if deadline < now {
            TaskPriority::Urgent
        } else if days_remaining <= 7 {
            TaskPriority::High
        } else if days_remaining <= 30 {
            TaskPriority::Medium
        } else {
            TaskPriority::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain an agent specializes in. Closed enumeration: registering a handler
/// for a domain outside this set is a compile error, not a runtime surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Fiscal,
    Health,
    Mobility,
    Housing,
    Employment,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Fiscal => "fiscal",
            AgentKind::Health => "health",
            AgentKind::Mobility => "mobility",
            AgentKind::Housing => "housing",
            AgentKind::Employment => "employment",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an administrative document ("avis_imposition", "carte_grise", ...).
///
/// Kinds are stable identifiers shared with the document repository; the task
/// only references them, it never owns document content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKind(String);

impl DocumentKind {
    pub fn new<S: Into<String>>(kind: S) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a submitted document, resolved through the external document
/// repository by stable id, never an ownership pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Identifier in the document repository
    pub document_id: String,
    pub kind: DocumentKind,
    pub submitted_at: DateTime<Utc>,
}

/// Who triggered a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    System,
    User,
}

/// Append-only audit record emitted on every state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStateTransition {
    pub task_id: Uuid,
    /// None for the initial record written at creation
    pub from_state: Option<TaskState>,
    pub to_state: TaskState,
    pub transitioned_at: DateTime<Utc>,
    pub transitioned_by: Actor,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Caller-supplied fields for creating a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub agent_kind: AgentKind,
    /// Explicit priority; derived from the deadline when absent
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub required_documents: BTreeSet<DocumentKind>,
}

/// One administrative work item tracked through the lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub agent_kind: AgentKind,
    pub state: TaskState,
    pub priority: TaskPriority,
    /// 0-100, monotonically non-decreasing until a terminal state freezes it
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub required_documents: BTreeSet<DocumentKind>,
    /// Ordered by submission time
    pub submitted_documents: Vec<DocumentRef>,
    /// Agent-owned scratch space, opaque to the orchestrator
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Build a new task in CREATED state from a validated spec.
    pub fn from_spec(spec: TaskSpec, now: DateTime<Utc>) -> Self {
        let priority = spec
            .priority
            .unwrap_or_else(|| TaskPriority::from_deadline(spec.deadline, now));

        Self {
            id: Uuid::new_v4(),
            owner_id: spec.owner_id,
            title: spec.title,
            description: spec.description,
            agent_kind: spec.agent_kind,
            state: TaskState::Created,
            priority,
            progress: 0,
            created_at: now,
            updated_at: now,
            deadline: spec.deadline,
            completed_at: None,
            error_message: None,
            required_documents: spec.required_documents,
            submitted_documents: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Kinds required but not yet covered by a submitted document.
    pub fn missing_documents(&self) -> Vec<DocumentKind> {
        let submitted: BTreeSet<&DocumentKind> =
            self.submitted_documents.iter().map(|d| &d.kind).collect();
        self.required_documents
            .iter()
            .filter(|kind| !submitted.contains(kind))
            .cloned()
            .collect()
    }

    pub fn has_all_required_documents(&self) -> bool {
        self.missing_documents().is_empty()
    }

    /// Record progress, clamped to 100 and never moving backwards. Frozen in
    /// terminal states.
    pub fn record_progress(&mut self, progress: u8) {
        if self.state.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
    }

    /// Absorb the changes an agent is allowed to make while processing:
    /// progress (monotonic) and metadata. State, identity, and document
    /// requirements stay under orchestrator control.
    pub fn absorb_agent_updates(&mut self, processed: Task) {
        self.record_progress(processed.progress);
        self.metadata = processed.metadata;
    }
}
