//! Orchestrator and reasoning-service configuration

use std::time::Duration;

use serde::Deserialize;

use crate::error::MusterError;
use crate::task::AgentId;

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// General-purpose agent used for fallback and unknown-agent substitution
    pub default_agent: AgentId,
    /// Per-agent-invocation timeout in milliseconds
    pub task_timeout_ms: u64,
    /// Cap on characters of each dependency result injected into a query
    pub max_dependency_chars: usize,
    /// Recent conversation messages shown to the reasoning service
    pub max_history: usize,
    /// Agents that cannot run inside a multi-task batch
    pub interactive_agents: Vec<AgentId>,
    /// Reply for requests that need no agent
    pub general_reply: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_agent: AgentId::new("search_agent"),
            task_timeout_ms: 60_000,
            max_dependency_chars: 2_000,
            max_history: 10,
            interactive_agents: Vec::new(),
            general_reply: "Hello! How can I help you?".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_default_agent(mut self, agent: impl Into<AgentId>) -> Self {
        self.default_agent = agent.into();
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_dependency_chars(mut self, chars: usize) -> Self {
        self.max_dependency_chars = chars;
        self
    }

    pub fn with_interactive_agent(mut self, agent: impl Into<AgentId>) -> Self {
        self.interactive_agents.push(agent.into());
        self
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn is_interactive(&self, agent: &AgentId) -> bool {
        self.interactive_agents.contains(agent)
    }

    /// Parse from a JSON document; absent fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, MusterError> {
        serde_json::from_str(json).map_err(|e| MusterError::Config(e.to_string()))
    }
}

/// Reasoning (chat-completion) service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            timeout_secs: 30,
        }
    }
}

impl ReasoningConfig {
    /// Read `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `MUSTER_MODEL`
    pub fn from_env() -> Result<Self, MusterError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| MusterError::Config("OPENAI_API_KEY is not set".into()))?;

        let mut config = Self {
            api_key,
            ..Default::default()
        };
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("MUSTER_MODEL") {
            config.model = model;
        }
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, MusterError> {
        serde_json::from_str(json).map_err(|e| MusterError::Config(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
