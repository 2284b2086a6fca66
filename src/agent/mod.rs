//! Agent capability contract.
//!
//! An agent is the domain-specialized handler for one [`AgentKind`]: it
//! validates the documents a procedure needs, does the domain work, and
//! submits the result to the administrative portal through its connector.
//! Agents do not drive the lifecycle: the orchestrator owns every state
//! transition; agents only report outcomes.

pub mod registry;

pub use registry::AgentRegistry;

use crate::task::model::{AgentKind, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by an agent operation.
///
/// The split is the retry contract: `Transient` covers the network/timeout
/// class the orchestrator retries with backoff, `Permanent` covers portal
/// rejections that retrying cannot fix.
#[derive(Debug, Error)]
pub enum AgentFailure {
    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("permanent failure: {message}")]
    Permanent { message: String },
}

impl AgentFailure {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AgentFailure::Transient { .. })
    }
}

/// Outcome the portal declared for a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReviewOutcome {
    /// Portal accepted the submission; the task can complete
    Accepted,
    /// Portal rejected it; the task fails with the stated reason
    Rejected { reason: String },
    /// Portal has not decided yet; the task stays under review
    Pending,
}

/// Result of a successful portal submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Portal confirmation number, e.g. "DECL2025-1A2B3C4D"
    pub reference: String,
    pub submitted_at: DateTime<Utc>,
    pub outcome: ReviewOutcome,
    /// Portal identifier for traceability ("impots.gouv.fr", "ameli.fr", ...)
    pub portal: Option<String>,
}

/// Stable idempotency token for portal submissions.
///
/// Derived deterministically from the task id, so every retry and every
/// re-dispatch after a restart presents the same token. Agents must map one
/// token to at most one external submission effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionToken(String);

impl SubmissionToken {
    pub fn for_task(task_id: Uuid) -> Self {
        Self(format!("sub-{task_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubmissionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability set every domain handler implements.
///
/// All three operations may suspend on external I/O (document repository,
/// portal connectors); the orchestrator wraps each call in a timeout.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The single domain this agent handles
    fn kind(&self) -> AgentKind;

    /// Check that the task's submitted documents are present and usable.
    /// Returning `Ok(false)` parks the task in AWAITING_DOCUMENTS; it is not
    /// an error.
    async fn validate_documents(&self, task: &Task) -> Result<bool, AgentFailure>;

    /// Perform the domain work and return the updated task (progress,
    /// metadata). The orchestrator absorbs only the fields agents own.
    async fn process_task(&self, task: Task) -> Result<Task, AgentFailure>;

    /// Submit the prepared procedure to the portal. Must be idempotent per
    /// (task id, token): a retried call with the same token yields the same
    /// external effect, never a duplicate submission.
    async fn submit_to_portal(
        &self,
        task: &Task,
        token: &SubmissionToken,
    ) -> Result<SubmissionResult, AgentFailure>;
}
