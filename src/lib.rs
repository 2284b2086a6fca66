//! Demarche - Task Orchestration Engine
//!
//! Core engine for automating multi-step administrative procedures: work
//! items ("tasks") are routed to domain-specialized handlers ("agents") under
//! a supervising orchestrator, while sensitive personal data is isolated in a
//! separate encrypted vault.
//!
//! # Overview
//!
//! This crate provides:
//! - A pure lifecycle state machine with a fixed transition graph
//! - A capability-based agent registry (validate / process / submit)
//! - An orchestrator with per-task serialized dispatch, a bounded worker
//!   pool, timeouts, and exponential-backoff retries around external calls
//! - An encrypted data vault (authenticated encryption, versioned keys,
//!   owner-scoped access)
//!
//! HTTP surfaces, dashboards, OCR, and portal connectors are collaborators:
//! they implement the [`repository`] and [`agent`] contracts and call into
//! the orchestrator.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use demarche::agent::AgentRegistry;
//! use demarche::config::EngineConfig;
//! use demarche::orchestrator::Orchestrator;
//! use demarche::task::{AgentKind, TaskSpec};
//! use demarche::testing::mocks::{
//!     arc_agent, InMemoryTaskRepository, MockAgent, RecordingAuditSink,
//! };
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), demarche::error::OrchestrationError> {
//! let config = EngineConfig::default();
//!
//! let registry = Arc::new(AgentRegistry::new());
//! registry.register(arc_agent(MockAgent::new(AgentKind::Fiscal)))?;
//!
//! let orchestrator = Orchestrator::new(
//!     registry,
//!     Arc::new(InMemoryTaskRepository::new()),
//!     Arc::new(RecordingAuditSink::new()),
//!     &config.dispatch,
//! );
//!
//! let task = orchestrator
//!     .create_task(TaskSpec {
//!         owner_id: "owner-1".to_string(),
//!         title: "Déclaration de revenus 2025".to_string(),
//!         description: String::new(),
//!         agent_kind: AgentKind::Fiscal,
//!         priority: None,
//!         deadline: None,
//!         required_documents: BTreeSet::new(),
//!     })
//!     .await?;
//! println!("task {} is {}", task.id, task.state);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod repository;
pub mod task;
pub mod testing;
pub mod vault;

pub use agent::{Agent, AgentFailure, AgentRegistry, ReviewOutcome, SubmissionResult, SubmissionToken};
pub use config::EngineConfig;
pub use error::{OrchestrationError, OrchestrationResult};
pub use orchestrator::{Orchestrator, RetryPolicy};
pub use repository::{AuditSink, TaskRepository};
pub use task::{
    Actor, AgentKind, DocumentKind, DocumentRef, StateMachine, Task, TaskPriority, TaskSpec,
    TaskState, TaskStateTransition,
};
pub use vault::{Classification, DataVault, RecordId, VaultError, VaultRecord, VaultStore};
