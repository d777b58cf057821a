//! Tasks produced by decomposition

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MusterError;

/// Identifier of a task within one decomposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl TaskId {
    /// One-based step number used in user-facing output
    pub fn step(self) -> u32 {
        self.0 + 1
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an agent in the registry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single unit of work routed to one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique within a decomposition
    pub id: TaskId,
    /// Human-readable label
    pub description: String,
    /// Agent that handles this task
    pub agent: AgentId,
    /// Text sent to the agent
    pub query: String,
    /// Tasks whose results this one needs
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    /// Grouping hint from the reasoning service; never trusted for ordering
    #[serde(default)]
    pub parallel_group: u32,
}

impl Task {
    /// Create a task with no dependencies
    pub fn new(
        id: u32,
        description: impl Into<String>,
        agent: impl Into<AgentId>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId(id),
            description: description.into(),
            agent: agent.into(),
            query: query.into(),
            depends_on: BTreeSet::new(),
            parallel_group: 0,
        }
    }

    /// Add dependencies
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.depends_on.extend(ids.into_iter().map(TaskId));
        self
    }

    /// Set the grouping hint
    pub fn in_group(mut self, group: u32) -> Self {
        self.parallel_group = group;
        self
    }

    pub fn has_dependencies(&self) -> bool {
        !self.depends_on.is_empty()
    }
}

/// Ordered, structurally valid list of tasks
///
/// Ids are unique and every dependency refers to a task in the list.
/// Acyclicity is checked when an [`ExecutionPlan`](crate::planner::ExecutionPlan)
/// is built, before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    /// Validate a fresh decomposition: ids must run contiguously from 0
    pub fn new(mut tasks: Vec<Task>) -> Result<Self, MusterError> {
        tasks.sort_by_key(|t| t.id);

        for (index, task) in tasks.iter().enumerate() {
            let expected = TaskId(index as u32);
            if task.id < expected {
                return Err(MusterError::InvalidTaskList(format!(
                    "duplicate task id {}",
                    task.id
                )));
            }
            if task.id > expected {
                return Err(MusterError::InvalidTaskList(format!(
                    "task ids not contiguous: expected {}, found {}",
                    expected, task.id
                )));
            }
        }

        Self::check_references(&tasks)?;
        Ok(Self { tasks })
    }

    /// Task list holding exactly one task
    pub fn single(task: Task) -> Self {
        Self { tasks: vec![task] }
    }

    fn check_references(tasks: &[Task]) -> Result<(), MusterError> {
        let ids: HashSet<TaskId> = tasks.iter().map(|t| t.id).collect();
        for task in tasks {
            if let Some(missing) = task.depends_on.iter().find(|dep| !ids.contains(dep)) {
                return Err(MusterError::InvalidTaskList(format!(
                    "task {} depends on unknown task {}",
                    task.id, missing
                )));
            }
        }
        Ok(())
    }

    /// Split off tasks whose agent matches `deferred`, together with
    /// everything that depends on them, directly or transitively
    ///
    /// Returns the runnable remainder and the deferred tasks in id order.
    pub fn split_deferred<F>(&self, deferred: F) -> (TaskList, Vec<Task>)
    where
        F: Fn(&AgentId) -> bool,
    {
        let mut held: HashSet<TaskId> = self
            .tasks
            .iter()
            .filter(|t| deferred(&t.agent))
            .map(|t| t.id)
            .collect();

        loop {
            let before = held.len();
            for task in &self.tasks {
                if !held.contains(&task.id) && task.depends_on.iter().any(|d| held.contains(d)) {
                    held.insert(task.id);
                }
            }
            if held.len() == before {
                break;
            }
        }

        let (pending, runnable): (Vec<Task>, Vec<Task>) = self
            .tasks
            .iter()
            .cloned()
            .partition(|t| held.contains(&t.id));

        (TaskList { tasks: runnable }, pending)
    }

    /// Look up a task by id
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|index| &self.tasks[index])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<'a> IntoIterator for &'a TaskList {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}
