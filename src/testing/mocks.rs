//! Mock implementations for testing
//!
//! Provides mock Agent, TaskRepository, AuditSink, and VaultStore
//! implementations to enable comprehensive testing without external
//! dependencies.

use crate::agent::{Agent, AgentFailure, ReviewOutcome, SubmissionResult, SubmissionToken};
use crate::repository::{AuditError, AuditSink, RepositoryError, TaskRepository};
use crate::task::model::{AgentKind, Task, TaskState, TaskStateTransition};
use crate::vault::{RecordId, VaultError, VaultRecord, VaultStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Scripted agent for orchestration tests.
///
/// Defaults to the happy path: documents valid, processing bumps progress,
/// submission accepted on the first attempt. Builder methods script failures.
pub struct MockAgent {
    kind: AgentKind,
    documents_valid: bool,
    fail_validate: Option<ScriptedFailure>,
    fail_process: Option<ScriptedFailure>,
    /// Fail submission this many times with a transient error before
    /// succeeding
    transient_submit_failures: AtomicU32,
    permanent_submit_failure: bool,
    /// Outcome the portal currently reports; mutable so tests can move a
    /// pending review to a decision between dispatches
    outcome: std::sync::Mutex<ReviewOutcome>,
    process_progress: u8,
    /// Artificial latency per operation, for concurrency tests
    latency: Duration,
    /// Total submit_to_portal invocations (including failed attempts)
    pub submit_calls: AtomicU32,
    /// One entry per distinct idempotency token = one external effect
    pub submissions: Mutex<HashMap<String, SubmissionResult>>,
}

/// Failure shape scripted into the mock (cloneable, unlike AgentFailure)
#[derive(Clone)]
enum ScriptedFailure {
    Transient(String),
    Permanent(String),
}

impl ScriptedFailure {
    fn to_failure(&self) -> AgentFailure {
        match self {
            ScriptedFailure::Transient(m) => AgentFailure::transient(m.clone()),
            ScriptedFailure::Permanent(m) => AgentFailure::permanent(m.clone()),
        }
    }
}

impl MockAgent {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            documents_valid: true,
            fail_validate: None,
            fail_process: None,
            transient_submit_failures: AtomicU32::new(0),
            permanent_submit_failure: false,
            outcome: std::sync::Mutex::new(ReviewOutcome::Accepted),
            process_progress: 70,
            latency: Duration::ZERO,
            submit_calls: AtomicU32::new(0),
            submissions: Mutex::new(HashMap::new()),
        }
    }

    /// Agent reports the submitted documents as unusable
    pub fn with_documents_invalid(mut self) -> Self {
        self.documents_valid = false;
        self
    }

    pub fn with_validate_failure(mut self, transient: bool, message: &str) -> Self {
        self.fail_validate = Some(if transient {
            ScriptedFailure::Transient(message.to_string())
        } else {
            ScriptedFailure::Permanent(message.to_string())
        });
        self
    }

    pub fn with_process_failure(mut self, transient: bool, message: &str) -> Self {
        self.fail_process = Some(if transient {
            ScriptedFailure::Transient(message.to_string())
        } else {
            ScriptedFailure::Permanent(message.to_string())
        });
        self
    }

    pub fn with_transient_submit_failures(self, count: u32) -> Self {
        self.transient_submit_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_permanent_submit_failure(mut self) -> Self {
        self.permanent_submit_failure = true;
        self
    }

    pub fn with_outcome(self, outcome: ReviewOutcome) -> Self {
        self.set_outcome(outcome);
        self
    }

    /// Change the outcome the portal reports from now on
    pub fn set_outcome(&self, outcome: ReviewOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of distinct external submission effects (one per token)
    pub async fn effect_count(&self) -> usize {
        self.submissions.lock().await.len()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn validate_documents(&self, _task: &Task) -> Result<bool, AgentFailure> {
        tokio::time::sleep(self.latency).await;
        if let Some(failure) = &self.fail_validate {
            return Err(failure.to_failure());
        }
        Ok(self.documents_valid)
    }

    async fn process_task(&self, mut task: Task) -> Result<Task, AgentFailure> {
        tokio::time::sleep(self.latency).await;
        if let Some(failure) = &self.fail_process {
            return Err(failure.to_failure());
        }
        task.record_progress(self.process_progress);
        task.metadata.insert(
            "processed_by".to_string(),
            serde_json::json!(self.kind.as_str()),
        );
        Ok(task)
    }

    async fn submit_to_portal(
        &self,
        task: &Task,
        token: &SubmissionToken,
    ) -> Result<SubmissionResult, AgentFailure> {
        tokio::time::sleep(self.latency).await;
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        if self.permanent_submit_failure {
            return Err(AgentFailure::permanent("portal rejected the form"));
        }

        let remaining = self.transient_submit_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_submit_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(AgentFailure::transient("portal connection reset"));
        }

        let outcome = self.outcome.lock().unwrap().clone();

        // Idempotency: one external effect per token. A replayed token
        // returns the recorded submission, re-read with the portal's current
        // review outcome.
        let mut submissions = self.submissions.lock().await;
        if let Some(existing) = submissions.get(token.as_str()) {
            let mut replay = existing.clone();
            replay.outcome = outcome;
            return Ok(replay);
        }

        let result = SubmissionResult {
            reference: format!("REF-{}", task.id.simple().to_string()[..8].to_uppercase()),
            submitted_at: Utc::now(),
            outcome,
            portal: Some("portal.test".to_string()),
        };
        submissions.insert(token.as_str().to_string(), result.clone());
        Ok(result)
    }
}

/// In-memory task repository with read-after-write consistency.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<Uuid, Task>>,
    /// Fail the next N update calls with a transient error
    transient_update_failures: AtomicU32,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transient_update_failures(self, count: u32) -> Self {
        self.transient_update_failures.store(count, Ordering::SeqCst);
        self
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(RepositoryError::Conflict(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> Result<(), RepositoryError> {
        let remaining = self.transient_update_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_update_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Unavailable(
                "simulated storage outage".to_string(),
            ));
        }

        let mut tasks = self.tasks.lock().await;
        if !tasks.contains_key(&task.id) {
            return Err(RepositoryError::Conflict(format!(
                "task {} does not exist",
                task.id
            )));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn tasks_for_owner(
        &self,
        owner_id: &str,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.lock().await;
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| t.owner_id == owner_id)
            .filter(|t| state.map(|s| t.state == s).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(matching)
    }
}

/// Audit sink recording every transition, optionally failing with
/// back-pressure first.
#[derive(Default)]
pub struct RecordingAuditSink {
    transitions: Mutex<Vec<TaskStateTransition>>,
    backpressure_failures: AtomicU32,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal back-pressure for the next N appends
    pub fn with_backpressure_failures(self, count: u32) -> Self {
        self.backpressure_failures.store(count, Ordering::SeqCst);
        self
    }

    pub async fn transitions(&self) -> Vec<TaskStateTransition> {
        self.transitions.lock().await.clone()
    }

    /// States a task passed through, in order
    pub async fn trail_for(&self, task_id: Uuid) -> Vec<TaskState> {
        self.transitions
            .lock()
            .await
            .iter()
            .filter(|t| t.task_id == task_id)
            .map(|t| t.to_state)
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn append(&self, transition: &TaskStateTransition) -> Result<(), AuditError> {
        let remaining = self.backpressure_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.backpressure_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(AuditError::Backpressure);
        }
        self.transitions.lock().await.push(transition.clone());
        Ok(())
    }
}

/// In-memory vault backing store.
#[derive(Default)]
pub struct MemoryVaultStore {
    records: std::sync::Mutex<HashMap<RecordId, VaultRecord>>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip one ciphertext byte of a stored record (tamper simulation)
    pub fn corrupt(&self, id: &RecordId) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(id) {
            record.ciphertext[0] ^= 0x01;
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn put(&self, record: VaultRecord) -> Result<(), VaultError> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<VaultRecord>, VaultError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, id: &RecordId) -> Result<bool, VaultError> {
        Ok(self.records.lock().unwrap().remove(id).is_some())
    }

    async fn ids_for_owner(&self, owner_id: &str) -> Result<Vec<RecordId>, VaultError> {
        let records = self.records.lock().unwrap();
        let mut ids: Vec<(RecordId, chrono::DateTime<Utc>)> = records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .map(|r| (r.id.clone(), r.created_at))
            .collect();
        ids.sort_by_key(|(_, created_at)| *created_at);
        Ok(ids.into_iter().map(|(id, _)| id).collect())
    }
}

/// Shorthand for wiring a mock agent into a registry
pub fn arc_agent(agent: MockAgent) -> Arc<dyn Agent> {
    Arc::new(agent)
}
