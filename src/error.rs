//! Muster error types

use serde::Serialize;
use thiserror::Error;

use crate::task::{AgentId, TaskId};

/// Errors that abort an orchestration run
#[derive(Debug, Error)]
pub enum MusterError {
    /// Query was empty, so there is nothing to fall back to
    #[error("Empty query")]
    EmptyQuery,

    /// Reasoning output is not a usable decomposition
    ///
    /// Returned by `TaskDecomposer::parse`; a full run recovers from it with
    /// the single-task fallback.
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// Task list violates a structural invariant
    #[error("Invalid task list: {0}")]
    InvalidTaskList(String),

    /// Dependencies form a cycle
    #[error("Cyclic dependency between tasks {}", format_ids(.task_ids))]
    CyclicDependency { task_ids: Vec<TaskId> },

    /// Agent not registered
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// Reasoning service error
    #[error("Reasoning service error: {0}")]
    Reasoning(String),

    /// Run cancelled by the caller
    #[error("Run cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure recorded against a single task
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// Agent invocation returned an error
    #[error("{message}")]
    Execution { message: String },

    /// Agent invocation exceeded the per-task timeout
    #[error("timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// An upstream task failed, so this one was never invoked
    #[error("dependency not met: {} failed", format_steps(.failed))]
    DependencyUnmet { failed: Vec<TaskId> },

    /// Agent missing from the registry at invocation time
    #[error("agent not registered: {agent}")]
    AgentNotRegistered { agent: AgentId },
}

impl TaskError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One-based step numbers, as shown in aggregated summaries
fn format_steps(ids: &[TaskId]) -> String {
    let steps = ids
        .iter()
        .map(|id| id.step().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if ids.len() == 1 {
        format!("step {}", steps)
    } else {
        format!("steps {}", steps)
    }
}
