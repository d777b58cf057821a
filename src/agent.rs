//! Agents and the registry the orchestrator routes to

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::session::SessionContext;
use crate::task::AgentId;

/// A domain capability the orchestrator can route a task to
///
/// Implementations are supplied by the host application. The result shape is
/// agent-specific: plain text (`Value::String`) or any structured value.
#[async_trait]
pub trait Agent: Send + Sync {
    /// One-line description shown to the reasoning service
    fn description(&self) -> &str {
        ""
    }

    /// Handle a query
    async fn invoke(
        &self,
        query: &str,
        session_id: &str,
        context: &SessionContext,
    ) -> anyhow::Result<Value>;
}

/// Handle to a registered agent
#[derive(Clone)]
pub struct AgentHandle {
    id: AgentId,
    inner: Arc<dyn Agent>,
}

impl AgentHandle {
    pub fn new(id: AgentId, agent: Arc<dyn Agent>) -> Self {
        Self { id, inner: agent }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("description", &self.inner.description())
            .finish()
    }
}

impl std::ops::Deref for AgentHandle {
    type Target = dyn Agent;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

/// Maps agent identifiers to agents
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentHandle>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Builder-style registration
    pub fn with_agent(self, id: impl Into<AgentId>, agent: impl Agent + 'static) -> Self {
        self.register(id, Arc::new(agent));
        self
    }

    /// Register an agent, replacing any previous one with the same id
    pub fn register(&self, id: impl Into<AgentId>, agent: Arc<dyn Agent>) -> Option<AgentHandle> {
        let id = id.into();
        let handle = AgentHandle::new(id.clone(), agent);
        let previous = self.agents.write().insert(id.clone(), handle);

        if previous.is_some() {
            debug!(agent = %id, "Replaced registered agent");
        } else {
            info!(agent = %id, "Registered agent");
        }
        previous
    }

    /// Remove an agent
    pub fn unregister(&self, id: &AgentId) -> Option<AgentHandle> {
        self.agents.write().remove(id)
    }

    /// Get an agent by id
    pub fn get(&self, id: &AgentId) -> Option<AgentHandle> {
        self.agents.read().get(id).cloned()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.read().contains_key(id)
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `(id, description)` pairs in sorted order, for prompts
    pub fn catalogue(&self) -> Vec<(AgentId, String)> {
        let agents = self.agents.read();
        let mut entries: Vec<(AgentId, String)> = agents
            .values()
            .map(|h| (h.id().clone(), h.description().to_string()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn description(&self) -> &str {
            "Repeats the query"
        }

        async fn invoke(
            &self,
            query: &str,
            _session_id: &str,
            _context: &SessionContext,
        ) -> anyhow::Result<Value> {
            Ok(Value::String(query.to_string()))
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn test_register_and_get() {
        let registry = AgentRegistry::new().with_agent("search_agent", EchoAgent);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&AgentId::new("search_agent")));
        let handle = registry.get(&AgentId::new("search_agent")).unwrap();
        assert_eq!(handle.id().as_str(), "search_agent");
        assert_eq!(handle.description(), "Repeats the query");
    }

    #[test]
    fn test_register_replaces() {
        let registry = AgentRegistry::new();
        assert!(registry.register("a", Arc::new(EchoAgent)).is_none());
        assert!(registry.register("a", Arc::new(EchoAgent)).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = AgentRegistry::new().with_agent("a", EchoAgent);
        assert!(registry.unregister(&AgentId::new("a")).is_some());
        assert!(registry.unregister(&AgentId::new("a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_catalogue_sorted() {
        let registry = AgentRegistry::new()
            .with_agent("search_agent", EchoAgent)
            .with_agent("client_agent", EchoAgent);

        let names: Vec<String> = registry
            .catalogue()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(names, vec!["client_agent", "search_agent"]);
    }

    #[tokio::test]
    async fn test_invoke_through_handle() {
        let registry = AgentRegistry::new().with_agent("echo", EchoAgent);
        let handle = registry.get(&AgentId::new("echo")).unwrap();

        let out = handle
            .invoke("hello", "s1", &SessionContext::default())
            .await
            .unwrap();
        assert_eq!(out, Value::String("hello".into()));
    }
}
