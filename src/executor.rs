//! Plan execution
//!
//! Groups run strictly in plan order. Every task of a group is launched at
//! once and the executor waits for all of them to settle before the next
//! group starts, so a task only ever observes results of tasks that come
//! before it in the plan. Failures stay local to the task that raised them;
//! dependents of a failed task are recorded as failed without being invoked.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::agent::AgentRegistry;
use crate::channel::{EventSink, RunEvent};
use crate::config::OrchestratorConfig;
use crate::error::{MusterError, TaskError};
use crate::orchestrator::RunId;
use crate::planner::ExecutionPlan;
use crate::result::{TaskResult, TaskResults};
use crate::session::SessionContext;
use crate::task::{Task, TaskId, TaskList};
use crate::text::{preview, truncate_chars};

const MAX_RESULT_LOG_CHARS: usize = 500;

/// Runs an [`ExecutionPlan`] against the agent registry
pub struct TaskExecutor<'a> {
    registry: &'a AgentRegistry,
    task_timeout: Duration,
    max_dependency_chars: usize,
    events: EventSink,
    run_id: RunId,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(registry: &'a AgentRegistry, config: &OrchestratorConfig) -> Self {
        Self {
            registry,
            task_timeout: config.task_timeout(),
            max_dependency_chars: config.max_dependency_chars,
            events: EventSink::disabled(),
            run_id: RunId::new(),
        }
    }

    /// Report progress for `run_id` through `events`
    pub fn with_events(mut self, events: EventSink, run_id: RunId) -> Self {
        self.events = events;
        self.run_id = run_id;
        self
    }

    /// Execute every group of `plan`
    ///
    /// Returns one result per scheduled task. Fails only when `cancel`
    /// fires, in which case in-flight tasks are abandoned and nothing is
    /// returned.
    #[instrument(skip_all, fields(run_id = %self.run_id, groups = plan.len()))]
    pub async fn execute(
        &self,
        tasks: &TaskList,
        plan: &ExecutionPlan,
        session_id: &str,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<TaskResults, MusterError> {
        let mut results = TaskResults::new();

        for (index, group) in plan.groups().iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(MusterError::Cancelled);
            }

            debug!(group = index, tasks = ?group, "Starting execution group");
            self.events.emit(RunEvent::GroupStarted {
                run_id: self.run_id,
                group: index,
                task_ids: group.clone(),
            });

            let group_token = cancel.child_token();
            let settled = {
                let results = &results;
                let group_token = &group_token;
                join_all(group.iter().map(|id| async move {
                    match tasks.get(*id) {
                        Some(task) => {
                            self.run_task(task, tasks, results, session_id, context, group_token)
                                .await
                        }
                        None => Ok(TaskResult::failed(
                            *id,
                            TaskError::execution("task missing from task list"),
                        )),
                    }
                }))
                .await
            };

            if cancel.is_cancelled() {
                warn!(group = index, "Run cancelled during execution group");
                return Err(MusterError::Cancelled);
            }

            for result in settled {
                let result = result?;
                results.insert(result.task_id(), result);
            }
        }

        let completed = results.values().filter(|r| r.is_completed()).count();
        info!(completed, total = results.len(), "Execution finished");
        Ok(results)
    }

    /// Run one task with no dependencies outside any plan
    pub async fn execute_single(
        &self,
        task: &Task,
        session_id: &str,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, MusterError> {
        let result = self
            .invoke(task, &task.query, session_id, context, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(MusterError::Cancelled);
        }
        Ok(result)
    }

    async fn run_task(
        &self,
        task: &Task,
        tasks: &TaskList,
        results: &TaskResults,
        session_id: &str,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, MusterError> {
        let unmet: Vec<TaskId> = task
            .depends_on
            .iter()
            .filter(|dep| !results.get(dep).is_some_and(TaskResult::is_completed))
            .copied()
            .collect();

        if !unmet.is_empty() {
            warn!(task_id = %task.id, failed = ?unmet, "Skipping task, dependency failed");
            let result = TaskResult::failed(task.id, TaskError::DependencyUnmet { failed: unmet });
            self.finish(&result);
            return Ok(result);
        }

        let query = if task.has_dependencies() {
            augment_query(task, tasks, results, self.max_dependency_chars)
        } else {
            task.query.clone()
        };

        self.invoke(task, &query, session_id, context, cancel).await
    }

    async fn invoke(
        &self,
        task: &Task,
        query: &str,
        session_id: &str,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, MusterError> {
        let Some(agent) = self.registry.get(&task.agent) else {
            warn!(task_id = %task.id, agent = %task.agent, "Agent not registered");
            let result = TaskResult::failed(
                task.id,
                TaskError::AgentNotRegistered {
                    agent: task.agent.clone(),
                },
            );
            self.finish(&result);
            return Ok(result);
        };

        self.events.emit(RunEvent::TaskStarted {
            run_id: self.run_id,
            task_id: task.id,
            agent: task.agent.clone(),
        });
        debug!(task_id = %task.id, agent = %task.agent, "Invoking agent");

        let started = Instant::now();
        let call = AssertUnwindSafe(agent.invoke(query, session_id, context)).catch_unwind();

        let outcome: Result<Value, TaskError> = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task_id = %task.id, "Abandoning task, run cancelled");
                return Err(MusterError::Cancelled);
            }
            settled = tokio::time::timeout(self.task_timeout, call) => match settled {
                Err(_) => Err(TaskError::Timeout {
                    millis: self.task_timeout.as_millis() as u64,
                }),
                Ok(Err(panic)) => Err(TaskError::execution(format!(
                    "agent panicked: {}",
                    panic_message(panic.as_ref())
                ))),
                Ok(Ok(Err(e))) => Err(TaskError::execution(format!("{:#}", e))),
                Ok(Ok(Ok(value))) => Ok(value),
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(value) => {
                info!(
                    task_id = %task.id,
                    agent = %task.agent,
                    elapsed_ms,
                    "Task completed"
                );
                debug!(
                    task_id = %task.id,
                    result = %preview(&value.to_string(), MAX_RESULT_LOG_CHARS),
                    "Task result"
                );
                TaskResult::completed(task.id, value)
            }
            Err(error) => {
                warn!(
                    task_id = %task.id,
                    agent = %task.agent,
                    elapsed_ms,
                    error = %error,
                    "Task failed"
                );
                TaskResult::failed(task.id, error)
            }
        };

        self.finish(&result);
        Ok(result)
    }

    fn finish(&self, result: &TaskResult) {
        self.events.emit(RunEvent::TaskFinished {
            run_id: self.run_id,
            task_id: result.task_id(),
            status: result.status(),
        });
    }
}

/// Prefix `task.query` with the results of its dependencies
///
/// One labelled section per dependency in ascending id order, each body cut
/// to `max_chars` characters, followed by the task's own query.
pub fn augment_query(
    task: &Task,
    tasks: &TaskList,
    results: &TaskResults,
    max_chars: usize,
) -> String {
    let mut sections = Vec::with_capacity(task.depends_on.len() + 1);

    for dep in &task.depends_on {
        let Some(result) = results.get(dep) else {
            continue;
        };
        let label = tasks
            .get(*dep)
            .map(|t| t.description.as_str())
            .unwrap_or_default();

        let text = result.text();
        let (kept, truncated) = truncate_chars(&text, max_chars);
        let mut section = format!("[Result of step {}: {}]\n{}", dep.step(), label, kept);
        if truncated {
            section.push_str(&format!(
                "\n[truncated: showing {} of {} characters]",
                max_chars,
                text.chars().count()
            ));
        }
        sections.push(section);
    }

    sections.push(task.query.clone());
    sections.join("\n\n")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
