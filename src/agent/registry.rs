//! Registry mapping each agent domain to its handler.
//!
//! Registration happens once at startup, before dispatch begins; after that
//! the registry is a read-mostly lookup table safe for unbounded concurrent
//! readers. The registry is an explicitly constructed value injected into the
//! orchestrator, so tests build isolated registries per case.

use crate::agent::Agent;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::task::model::AgentKind;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Thread-safe map of [`AgentKind`] to handler.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentKind, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for its declared kind. Fails with `DuplicateAgent`
    /// if the kind is already taken; use [`replace`](Self::replace) for
    /// hot-reload scenarios.
    pub fn register(&self, agent: Arc<dyn Agent>) -> OrchestrationResult<()> {
        let kind = agent.kind();
        let mut agents = self.agents.write().unwrap();

        if agents.contains_key(&kind) {
            return Err(OrchestrationError::DuplicateAgent { kind });
        }

        agents.insert(kind, agent);
        info!(agent_kind = %kind, "agent registered");
        Ok(())
    }

    /// Replace the handler for a kind, registering it if absent. Takes the
    /// write lock for the swap; in-flight `resolve` calls see either the old
    /// or the new handler, never a torn state.
    pub fn replace(&self, agent: Arc<dyn Agent>) {
        let kind = agent.kind();
        let mut agents = self.agents.write().unwrap();

        if agents.insert(kind, agent).is_some() {
            warn!(agent_kind = %kind, "agent replaced");
        } else {
            info!(agent_kind = %kind, "agent registered");
        }
    }

    /// Look up the handler for a kind.
    pub fn resolve(&self, kind: AgentKind) -> OrchestrationResult<Arc<dyn Agent>> {
        let agents = self.agents.read().unwrap();
        agents
            .get(&kind)
            .cloned()
            .ok_or(OrchestrationError::AgentNotFound { kind })
    }

    pub fn registered_kinds(&self) -> Vec<AgentKind> {
        let agents = self.agents.read().unwrap();
        agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("kinds", &self.registered_kinds())
            .finish()
    }
}
