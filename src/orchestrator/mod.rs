//! The orchestrator: drives a task from creation to a terminal state.
//!
//! Composes the state machine, the agent registry, and the external
//! repository/audit collaborators. Concurrency contract: parallel across
//! task ids, serialized per task id. A per-task lock is held for the whole
//! dispatch sequence, and a bounded worker pool caps in-flight dispatches
//! system-wide. Every external call is wrapped in a timeout; timeouts and
//! other transient failures are retried with exponential backoff.

pub mod retry;

pub use retry::RetryPolicy;

use crate::agent::{AgentFailure, AgentRegistry, ReviewOutcome, SubmissionToken};
use crate::config::DispatchConfig;
use crate::error::{sanitize_error_message, OrchestrationError, OrchestrationResult};
use crate::repository::{AuditSink, TaskRepository};
use crate::task::model::{Actor, DocumentRef, Task, TaskSpec, TaskState, TaskStateTransition};
use crate::task::StateMachine;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Coordinates agents, persistence, and the lifecycle state machine.
pub struct Orchestrator {
    state_machine: StateMachine,
    registry: Arc<AgentRegistry>,
    repository: Arc<dyn TaskRepository>,
    audit: Arc<dyn AuditSink>,
    /// One lock per task id, held for the whole dispatch (or cancel) sequence
    task_locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    /// Bounds concurrently in-flight dispatches system-wide
    dispatch_slots: Arc<Semaphore>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        repository: Arc<dyn TaskRepository>,
        audit: Arc<dyn AuditSink>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            state_machine: StateMachine::new(),
            registry,
            repository,
            audit,
            task_locks: StdMutex::new(HashMap::new()),
            dispatch_slots: Arc::new(Semaphore::new(config.worker_pool_size)),
            retry: config.retry_policy(),
            call_timeout: config.call_timeout(),
        }
    }

    /// Validate a spec, persist the new task in CREATED state, and
    /// immediately dispatch it. If persistence fails, no task is visible to
    /// the caller.
    pub async fn create_task(&self, spec: TaskSpec) -> OrchestrationResult<Task> {
        validate_spec(&spec)?;

        let task = Task::from_spec(spec, Utc::now());
        self.create_in_repository(&task).await?;
        self.append_audit(&self.state_machine.initial_record(&task, Actor::User))
            .await?;

        info!(
            task_id = %task.id,
            agent_kind = %task.agent_kind,
            priority = %task.priority,
            "task created"
        );

        self.dispatch(task.id).await
    }

    /// Drive a task as far as it can currently go.
    ///
    /// At most one dispatch is in flight per task id: a concurrent call is
    /// rejected with `DispatchInProgress`, not queued. Dispatches beyond the
    /// worker-pool bound wait for a free slot. Resumable from PENDING,
    /// AWAITING_DOCUMENTS, IN_PROGRESS, and UNDER_REVIEW (e.g. after a
    /// restart or a document submission).
    pub async fn dispatch(&self, task_id: Uuid) -> OrchestrationResult<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock
            .try_lock_owned()
            .map_err(|_| OrchestrationError::DispatchInProgress { task_id })?;

        let _permit = self
            .dispatch_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OrchestrationError::internal_error("dispatch worker pool closed"))?;

        self.run_dispatch(task_id).await
    }

    /// Cancel a task from any non-terminal state.
    ///
    /// Waits for the per-task lock, so it never interleaves with an in-flight
    /// dispatch: the cancellation applies before or after the whole dispatch
    /// sequence, never mid-step. Already-successful external submissions are
    /// not revoked.
    pub async fn cancel(&self, task_id: Uuid, actor: Actor) -> OrchestrationResult<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock_owned().await;

        let mut task = self.load_task(task_id).await?;
        if task.state.is_terminal() {
            return Err(OrchestrationError::InvalidTransition {
                from: task.state,
                to: TaskState::Cancelled,
            });
        }

        self.transition(
            &mut task,
            TaskState::Cancelled,
            actor,
            context_entry("trigger", json!("cancellation")),
        )
        .await?;

        Ok(task)
    }

    /// Attach a submitted document to a task. The kind must be one the task
    /// requires. The caller observing the upload triggers a fresh `dispatch`
    /// afterwards; serialization through the per-task lock guarantees the
    /// re-dispatch only runs once any prior dispatch has finished.
    pub async fn attach_document(
        &self,
        task_id: Uuid,
        document: DocumentRef,
    ) -> OrchestrationResult<Task> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock_owned().await;

        let mut task = self.load_task(task_id).await?;
        if task.state.is_terminal() {
            return Err(OrchestrationError::validation(format!(
                "task {task_id} is {} and no longer accepts documents",
                task.state
            )));
        }
        if !task.required_documents.contains(&document.kind) {
            return Err(OrchestrationError::validation(format!(
                "document kind '{}' is not required by task {task_id}",
                document.kind
            )));
        }

        info!(task_id = %task_id, kind = %document.kind, "document attached");
        task.submitted_documents.push(document);
        task.updated_at = Utc::now();
        self.persist(&task).await?;

        Ok(task)
    }

    /// Current state of a task, read through the repository.
    pub async fn task_status(&self, task_id: Uuid) -> OrchestrationResult<Option<Task>> {
        match timeout(self.call_timeout, self.repository.get(task_id)).await {
            Ok(Ok(task)) => Ok(task),
            Ok(Err(error)) => Err(OrchestrationError::repository(error.to_string())),
            Err(_) => Err(OrchestrationError::repository("repository read timed out")),
        }
    }

    /// All tasks of one owner, most urgent first, optionally filtered by
    /// state.
    pub async fn tasks_for_owner(
        &self,
        owner_id: &str,
        state: Option<TaskState>,
    ) -> OrchestrationResult<Vec<Task>> {
        match timeout(self.call_timeout, self.repository.tasks_for_owner(owner_id, state)).await {
            Ok(Ok(tasks)) => Ok(tasks),
            Ok(Err(error)) => Err(OrchestrationError::repository(error.to_string())),
            Err(_) => Err(OrchestrationError::repository("repository read timed out")),
        }
    }

    // ===== dispatch sequence =====

    async fn run_dispatch(&self, task_id: Uuid) -> OrchestrationResult<Task> {
        let mut task = self.load_task(task_id).await?;

        if task.state.is_terminal() {
            return Err(OrchestrationError::validation(format!(
                "task {task_id} is {} and cannot be dispatched",
                task.state
            )));
        }

        if task.state == TaskState::Created {
            self.transition(
                &mut task,
                TaskState::Pending,
                Actor::System,
                context_entry("trigger", json!("dispatch")),
            )
            .await?;
        }

        let agent = match self.registry.resolve(task.agent_kind) {
            Ok(agent) => agent,
            Err(error @ OrchestrationError::AgentNotFound { .. }) => {
                // Configuration error, fatal for the task
                return self.fail_task(task, error.to_string()).await;
            }
            Err(error) => return Err(error),
        };

        // Resuming from UNDER_REVIEW means the work was already submitted:
        // skip straight to re-reading the portal outcome.
        if task.state != TaskState::UnderReview {
            let documents_ok = if task.has_all_required_documents() {
                let validated = self
                    .call_with_retry("validate_documents", || agent.validate_documents(&task))
                    .await;
                match validated {
                    Ok(ok) => ok,
                    Err(error) if task.state == TaskState::AwaitingDocuments => {
                        // No FAILED edge out of AWAITING_DOCUMENTS; record the
                        // error, keep waiting, surface to the caller.
                        task.error_message =
                            Some(sanitize_error_message(&error.to_string()));
                        self.persist(&task).await?;
                        return Err(error);
                    }
                    Err(error) => return self.fail_task(task, error.to_string()).await,
                }
            } else {
                false
            };

            if !documents_ok {
                if task.state != TaskState::AwaitingDocuments {
                    let missing = task.missing_documents();
                    self.transition(
                        &mut task,
                        TaskState::AwaitingDocuments,
                        Actor::System,
                        context_entry(
                            "missing_documents",
                            json!(missing.iter().map(|k| k.as_str()).collect::<Vec<_>>()),
                        ),
                    )
                    .await?;
                }
                info!(task_id = %task.id, "dispatch paused awaiting documents");
                return Ok(task);
            }

            if task.state != TaskState::InProgress {
                self.transition(
                    &mut task,
                    TaskState::InProgress,
                    Actor::System,
                    context_entry("trigger", json!("documents_validated")),
                )
                .await?;
            }

            let process_result = self
                .call_with_retry("process_task", || agent.process_task(task.clone()))
                .await;
            let processed = match process_result {
                Ok(updated) => updated,
                Err(error) => return self.fail_task(task, error.to_string()).await,
            };
            task.absorb_agent_updates(processed);
            self.persist(&task).await?;
        }

        // Stable token: retries and re-dispatches present the same value, so
        // the agent can collapse them into one external submission.
        let token = SubmissionToken::for_task(task.id);
        let submit_result = self
            .call_with_retry("submit_to_portal", || agent.submit_to_portal(&task, &token))
            .await;
        let submission = match submit_result {
            Ok(result) => result,
            Err(error) => return self.fail_task(task, error.to_string()).await,
        };

        task.metadata.insert(
            "submission".to_string(),
            json!({
                "reference": &submission.reference,
                "submitted_at": submission.submitted_at.to_rfc3339(),
                "portal": &submission.portal,
            }),
        );

        if task.state != TaskState::UnderReview {
            self.transition(
                &mut task,
                TaskState::UnderReview,
                Actor::System,
                context_entry("reference", json!(&submission.reference)),
            )
            .await?;
        } else {
            self.persist(&task).await?;
        }

        match submission.outcome {
            ReviewOutcome::Accepted => {
                self.transition(
                    &mut task,
                    TaskState::Completed,
                    Actor::System,
                    context_entry("reference", json!(&submission.reference)),
                )
                .await?;
                info!(task_id = %task.id, reference = %submission.reference, "task completed");
            }
            ReviewOutcome::Rejected { reason } => {
                return self
                    .fail_task(task, format!("portal rejected submission: {reason}"))
                    .await;
            }
            ReviewOutcome::Pending => {
                info!(
                    task_id = %task.id,
                    reference = %submission.reference,
                    "submission pending portal review"
                );
            }
        }

        Ok(task)
    }

    /// Translate a step failure into a FAILED transition with a sanitized
    /// message. The last good progress value is retained.
    async fn fail_task(&self, mut task: Task, message: String) -> OrchestrationResult<Task> {
        let sanitized = sanitize_error_message(&message);
        warn!(task_id = %task.id, error = %sanitized, "task failed");

        task.error_message = Some(sanitized.clone());
        self.transition(
            &mut task,
            TaskState::Failed,
            Actor::System,
            context_entry("error", json!(sanitized)),
        )
        .await?;

        Ok(task)
    }

    /// Apply a state-machine transition, persist the task, and append the
    /// audit record.
    async fn transition(
        &self,
        task: &mut Task,
        target: TaskState,
        actor: Actor,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> OrchestrationResult<()> {
        let record = self.state_machine.apply(task, target, actor, context)?;
        self.persist(task).await?;
        self.append_audit(&record).await?;
        Ok(())
    }

    // ===== collaborator calls (timeout + transient retry) =====

    /// Run an agent operation with the configured timeout, retrying transient
    /// failures with exponential backoff. Permanent failures return
    /// immediately.
    async fn call_with_retry<T, Fut>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Fut,
    ) -> OrchestrationResult<T>
    where
        Fut: Future<Output = Result<T, AgentFailure>>,
    {
        let mut attempt = 0u32;
        loop {
            let failure = match timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(AgentFailure::Permanent { message })) => {
                    return Err(OrchestrationError::permanent(format!(
                        "{operation}: {message}"
                    )));
                }
                Ok(Err(AgentFailure::Transient { message })) => message,
                Err(_) => format!("{operation} timed out"),
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(OrchestrationError::transient(format!(
                    "{operation}: {failure} (retries exhausted after {attempt} attempts)"
                )));
            }

            let delay = self.retry.delay_for(attempt - 1);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn create_in_repository(&self, task: &Task) -> OrchestrationResult<()> {
        match timeout(self.call_timeout, self.repository.create(task)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(OrchestrationError::repository(error.to_string())),
            Err(_) => Err(OrchestrationError::repository("repository create timed out")),
        }
    }

    async fn persist(&self, task: &Task) -> OrchestrationResult<()> {
        let mut attempt = 0u32;
        loop {
            let failure = match timeout(self.call_timeout, self.repository.update(task)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(error)) if !error.is_transient() => {
                    return Err(OrchestrationError::repository(error.to_string()));
                }
                Ok(Err(error)) => error.to_string(),
                Err(_) => "repository update timed out".to_string(),
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(OrchestrationError::repository(failure));
            }
            tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
        }
    }

    /// Audit appends must not be dropped: back-pressure propagates as a
    /// transient error retried within the same backoff budget.
    async fn append_audit(&self, record: &TaskStateTransition) -> OrchestrationResult<()> {
        let mut attempt = 0u32;
        loop {
            let failure = match timeout(self.call_timeout, self.audit.append(record)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(error)) => error.to_string(),
                Err(_) => "audit append timed out".to_string(),
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(OrchestrationError::Audit { message: failure });
            }

            let delay = self.retry.delay_for(attempt - 1);
            warn!(
                task_id = %record.task_id,
                attempt,
                error = %failure,
                "audit append failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn load_task(&self, task_id: Uuid) -> OrchestrationResult<Task> {
        match timeout(self.call_timeout, self.repository.get(task_id)).await {
            Ok(Ok(Some(task))) => Ok(task),
            Ok(Ok(None)) => Err(OrchestrationError::TaskNotFound { task_id }),
            Ok(Err(error)) => Err(OrchestrationError::repository(error.to_string())),
            Err(_) => Err(OrchestrationError::repository("repository read timed out")),
        }
    }

    fn lock_for(&self, task_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.task_locks.lock().unwrap();
        locks
            .entry(task_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Required-field validation for task creation.
fn validate_spec(spec: &TaskSpec) -> OrchestrationResult<()> {
    if spec.title.trim().is_empty() {
        return Err(OrchestrationError::validation("title must not be empty"));
    }
    if spec.owner_id.trim().is_empty() {
        return Err(OrchestrationError::validation("owner_id must not be empty"));
    }
    if spec.required_documents.iter().any(|kind| kind.is_blank()) {
        return Err(OrchestrationError::validation(
            "required document kinds must not be blank",
        ));
    }
    Ok(())
}

fn context_entry(key: &str, value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let mut context = serde_json::Map::new();
    context.insert(key.to_string(), value);
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::model::{AgentKind, DocumentKind};
    use std::collections::BTreeSet;

    fn spec(title: &str, owner: &str) -> TaskSpec {
        TaskSpec {
            owner_id: owner.to_string(),
            title: title.to_string(),
            description: String::new(),
            agent_kind: AgentKind::Fiscal,
            priority: None,
            deadline: None,
            required_documents: BTreeSet::new(),
        }
    }

    #[test]
    fn test_validate_spec_accepts_minimal() {
        assert!(validate_spec(&spec("Déclaration", "owner-1")).is_ok());
    }

    #[test]
    fn test_validate_spec_rejects_blank_title() {
        let result = validate_spec(&spec("   ", "owner-1"));
        assert!(matches!(result, Err(OrchestrationError::Validation { .. })));
    }

    #[test]
    fn test_validate_spec_rejects_blank_owner() {
        let result = validate_spec(&spec("Déclaration", ""));
        assert!(matches!(result, Err(OrchestrationError::Validation { .. })));
    }

    #[test]
    fn test_validate_spec_rejects_blank_document_kind() {
        let mut s = spec("Déclaration", "owner-1");
        s.required_documents.insert(DocumentKind::new("  "));
        let result = validate_spec(&s);
        assert!(matches!(result, Err(OrchestrationError::Validation { .. })));
    }
}
