//! # Muster
//!
//! Task decomposition and multi-agent orchestration.
//!
//! A user query is split into tasks by a reasoning service, the tasks are
//! layered by their dependencies, each layer runs concurrently against the
//! registered agents, and the per-task outcomes are merged into one response.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            ORCHESTRATOR                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────┐ │
//! │  │  Decomposer  │─▶│   Planner    │─▶│   Executor   │─▶│Aggregator│ │
//! │  └──────┬───────┘  └──────────────┘  └──────┬───────┘  └──────────┘ │
//! └─────────┼──────────────────────────────────┼────────────────────────┘
//!           ▼                                  │
//!   ┌───────────────┐          ┌───────────────┼───────────────┐
//!   │   Reasoning   │          ▼               ▼               ▼
//!   │    Service    │    ┌───────────┐   ┌───────────┐   ┌───────────┐
//!   └───────────────┘    │  Agent A  │   │  Agent B  │   │  Agent C  │
//!                        └───────────┘   └───────────┘   └───────────┘
//!                         group 0 ──────────────────▶ group 1 ─▶ ...
//! ```
//!
//! ## Key Concepts
//!
//! - **Task**: One unit of work routed to one agent, with dependencies
//! - **Execution plan**: Ordered groups; a group runs once every earlier group settled
//! - **Agent**: A registered async capability invoked with a query
//! - **Session context**: Conversation state passed through to agents
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use muster::{
//!     Agent, AgentRegistry, OpenAiReasoningService, Orchestrator, OrchestratorConfig,
//!     SessionContext,
//! };
//!
//! struct Search;
//!
//! #[async_trait::async_trait]
//! impl Agent for Search {
//!     async fn invoke(
//!         &self,
//!         query: &str,
//!         _session_id: &str,
//!         _context: &SessionContext,
//!     ) -> anyhow::Result<serde_json::Value> {
//!         Ok(serde_json::json!(format!("results for {query}")))
//!     }
//! }
//!
//! # async fn run() -> Result<(), muster::MusterError> {
//! let registry = Arc::new(AgentRegistry::new().with_agent("search_agent", Search));
//! let reasoning = Arc::new(OpenAiReasoningService::from_env()?);
//! let orchestrator = Orchestrator::new(registry, reasoning, OrchestratorConfig::default());
//!
//! let response = orchestrator
//!     .process("Find the travel policy", "session-1", &SessionContext::new())
//!     .await?;
//! println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod aggregator;
pub mod channel;
pub mod config;
pub mod decomposer;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod reasoning;
pub mod result;
pub mod session;
pub mod task;
mod text;

pub use agent::{Agent, AgentHandle, AgentRegistry};
pub use aggregator::{aggregate, AggregatedResponse, StepReport};
pub use channel::{event_channel, EventSink, EventStream, RunEvent};
pub use config::{OrchestratorConfig, ReasoningConfig};
pub use decomposer::{Decomposition, ExecutionStrategy, TaskDecomposer};
pub use error::{MusterError, TaskError};
pub use executor::TaskExecutor;
pub use orchestrator::{Orchestrator, Response, ResponseBody, RunId, Stage};
pub use planner::ExecutionPlan;
pub use reasoning::{CompletionRequest, OpenAiReasoningService, ReasoningService};
pub use result::{TaskResult, TaskResults, TaskStatus};
pub use session::{ChatMessage, Role, SessionContext};
pub use task::{AgentId, Task, TaskId, TaskList};
