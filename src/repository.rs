//! Collaborator contracts the core consumes.
//!
//! The engine owns no persistence: tasks live behind [`TaskRepository`] and
//! the transition log behind [`AuditSink`]. Both are abstract and async;
//! production backends are wired in by the hosting service, tests use the
//! in-memory implementations from [`crate::testing::mocks`].

use crate::task::model::{Task, TaskState, TaskStateTransition};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a repository operation.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Storage unreachable or overloaded; retried like any transient failure
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The write conflicts with stored state; not retried
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

/// Failure of an audit append.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink signals back-pressure instead of silently dropping; the
    /// orchestrator retries the append within the dispatch retry budget
    #[error("audit sink back-pressure")]
    Backpressure,

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Task storage. Must provide read-after-write consistency for a single
/// task id.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> Result<(), RepositoryError>;

    async fn update(&self, task: &Task) -> Result<(), RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>, RepositoryError>;

    /// Tasks for one owner, most urgent first then oldest first, optionally
    /// filtered by state.
    async fn tasks_for_owner(
        &self,
        owner_id: &str,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>, RepositoryError>;
}

/// Append-only sink for the task transition log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, transition: &TaskStateTransition) -> Result<(), AuditError>;
}
