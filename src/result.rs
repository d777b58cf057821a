//! Per-task results

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::TaskError;
use crate::task::TaskId;

/// Final state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Settled outcome of one task, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskResult {
    Completed { task_id: TaskId, value: Value },
    Failed { task_id: TaskId, error: TaskError },
}

/// Results of one run keyed by task id
pub type TaskResults = BTreeMap<TaskId, TaskResult>;

impl TaskResult {
    pub fn completed(task_id: TaskId, value: Value) -> Self {
        Self::Completed { task_id, value }
    }

    pub fn failed(task_id: TaskId, error: TaskError) -> Self {
        Self::Failed { task_id, error }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Completed { task_id, .. } | Self::Failed { task_id, .. } => *task_id,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Completed { value, .. } => Some(value),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }

    /// Value on success, error message on failure
    pub fn to_value(&self) -> Value {
        match self {
            Self::Completed { value, .. } => value.clone(),
            Self::Failed { error, .. } => Value::String(error.to_string()),
        }
    }

    /// Textual form used when feeding this result to a dependent task
    pub fn text(&self) -> String {
        match self {
            Self::Completed { value, .. } => value_text(value),
            Self::Failed { error, .. } => error.to_string(),
        }
    }
}

/// Strings verbatim, null as empty, anything structured as compact JSON
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
