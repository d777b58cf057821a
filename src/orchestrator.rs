//! Main orchestrator - decompose, plan, execute, aggregate

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::agent::AgentRegistry;
use crate::aggregator::{aggregate, AggregatedResponse};
use crate::channel::{event_channel, EventSink, EventStream, RunEvent};
use crate::config::OrchestratorConfig;
use crate::decomposer::TaskDecomposer;
use crate::error::MusterError;
use crate::executor::TaskExecutor;
use crate::planner::ExecutionPlan;
use crate::reasoning::ReasoningService;
use crate::result::TaskResults;
use crate::session::SessionContext;
use crate::task::{Task, TaskList};

/// Identifier of one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decompose,
    /// Exactly one task: invoke its agent directly
    SingleTask,
    Plan,
    Execute,
    Aggregate,
    Done,
    Failed,
}

/// Payload of a [`Response`], tagged by response type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "response", rename_all = "lowercase")]
pub enum ResponseBody {
    /// No agent was needed
    General(String),
    /// Raw result (or error text) of the only task
    Single(Value),
    /// Aggregated multi-task outcome
    Multi(AggregatedResponse),
    /// Every task was held back as interactive
    Deferred(String),
}

impl ResponseBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::General(_) => "general",
            Self::Single(_) => "single",
            Self::Multi(_) => "multi",
            Self::Deferred(_) => "deferred",
        }
    }
}

/// Outcome of [`Orchestrator::process`]
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub run_id: RunId,
    /// True when every executed task completed
    pub success: bool,
    #[serde(flatten)]
    pub body: ResponseBody,
    /// Tasks that were executed
    pub tasks: Vec<Task>,
    pub detailed_results: TaskResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<ExecutionPlan>,
    /// Interactive tasks held back from a multi-task run
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending_tasks: Vec<Task>,
}

impl Response {
    fn new(run_id: RunId, success: bool, body: ResponseBody) -> Self {
        Self {
            run_id,
            success,
            body,
            tasks: Vec::new(),
            detailed_results: TaskResults::new(),
            execution_plan: None,
            pending_tasks: Vec::new(),
        }
    }
}

/// Routes queries to agents
///
/// Owns no per-run state: every call to [`process`](Self::process) gets its
/// own task list, plan and result map.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    decomposer: TaskDecomposer,
    config: OrchestratorConfig,
    events: EventSink,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        registry: Arc<AgentRegistry>,
        reasoning: Arc<dyn ReasoningService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            decomposer: TaskDecomposer::new(reasoning, &config),
            config,
            events: EventSink::disabled(),
        }
    }

    /// Create an orchestrator and return a stream of its progress events
    pub fn with_events(
        registry: Arc<AgentRegistry>,
        reasoning: Arc<dyn ReasoningService>,
        config: OrchestratorConfig,
    ) -> (Self, EventStream) {
        let (sink, stream) = event_channel();
        let mut orchestrator = Self::new(registry, reasoning, config);
        orchestrator.events = sink;
        (orchestrator, stream)
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Handle one user query
    pub async fn process(
        &self,
        query: &str,
        session_id: &str,
        context: &SessionContext,
    ) -> Result<Response, MusterError> {
        self.process_with_cancel(query, session_id, context, &CancellationToken::new())
            .await
    }

    /// Handle one user query, abandoning it when `cancel` fires
    #[instrument(skip(self, context, cancel))]
    pub async fn process_with_cancel(
        &self,
        query: &str,
        session_id: &str,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<Response, MusterError> {
        let run_id = RunId::new();
        info!(run_id = %run_id, "Starting run");
        self.events.emit(RunEvent::RunStarted {
            run_id,
            session_id: session_id.to_string(),
            query: query.to_string(),
        });

        let outcome = self.run(run_id, query, session_id, context, cancel).await;

        match &outcome {
            Ok(response) => {
                info!(
                    run_id = %run_id,
                    kind = response.body.kind(),
                    success = response.success,
                    "Run finished"
                );
                self.events.emit(RunEvent::RunFinished {
                    run_id,
                    success: response.success,
                });
            }
            Err(e) => {
                self.enter(run_id, Stage::Failed);
                error!(run_id = %run_id, error = %e, "Run failed");
                self.events.emit(RunEvent::RunFinished {
                    run_id,
                    success: false,
                });
            }
        }

        outcome
    }

    async fn run(
        &self,
        run_id: RunId,
        query: &str,
        session_id: &str,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<Response, MusterError> {
        self.enter(run_id, Stage::Decompose);
        let decomposition = self
            .decomposer
            .decompose(query, &self.registry, context)
            .await?;
        self.events.emit(RunEvent::TasksDecomposed {
            run_id,
            task_count: decomposition.tasks.len(),
            fallback: decomposition.fallback,
        });

        let tasks = decomposition.tasks;
        let executor =
            TaskExecutor::new(&self.registry, &self.config).with_events(self.events.clone(), run_id);

        if tasks.is_empty() {
            self.enter(run_id, Stage::Done);
            return Ok(Response::new(
                run_id,
                true,
                ResponseBody::General(self.config.general_reply.clone()),
            ));
        }

        if let [task] = tasks.as_slice() {
            // The only possible dependency of a lone task is itself
            if task.has_dependencies() {
                return Err(MusterError::CyclicDependency {
                    task_ids: vec![task.id],
                });
            }

            self.enter(run_id, Stage::SingleTask);
            let result = executor
                .execute_single(task, session_id, context, cancel)
                .await?;

            self.enter(run_id, Stage::Done);
            let mut response = Response::new(
                run_id,
                result.is_completed(),
                ResponseBody::Single(result.to_value()),
            );
            response.tasks = vec![task.clone()];
            response.detailed_results = BTreeMap::from([(task.id, result)]);
            return Ok(response);
        }

        self.enter(run_id, Stage::Plan);
        let mut plan = ExecutionPlan::build(&tasks)?;

        let (runnable, pending) = self.hold_interactive(tasks);
        if runnable.is_empty() {
            self.enter(run_id, Stage::Done);
            let mut message =
                "These tasks are interactive. Please run each of them separately:".to_string();
            for task in &pending {
                message.push_str(&format!("\n- {}", task.description));
            }
            let mut response = Response::new(run_id, true, ResponseBody::Deferred(message));
            response.pending_tasks = pending;
            return Ok(response);
        }
        if !pending.is_empty() {
            plan = ExecutionPlan::build(&runnable)?;
        }
        debug!(run_id = %run_id, groups = ?plan.groups(), "Execution plan ready");

        self.enter(run_id, Stage::Execute);
        let results = executor
            .execute(&runnable, &plan, session_id, context, cancel)
            .await?;

        self.enter(run_id, Stage::Aggregate);
        let aggregated = aggregate(&runnable, &plan, &results).with_pending(&pending);

        self.enter(run_id, Stage::Done);
        let mut response = Response::new(
            run_id,
            aggregated.is_complete(),
            ResponseBody::Multi(aggregated),
        );
        response.tasks = runnable.as_slice().to_vec();
        response.detailed_results = results;
        response.execution_plan = Some(plan);
        response.pending_tasks = pending;
        Ok(response)
    }

    /// Split interactive tasks and their dependents out of a multi-task list
    fn hold_interactive(&self, tasks: TaskList) -> (TaskList, Vec<Task>) {
        if self.config.interactive_agents.is_empty() {
            return (tasks, Vec::new());
        }
        let (runnable, pending) = tasks.split_deferred(|agent| self.config.is_interactive(agent));
        if !pending.is_empty() {
            info!(
                held = pending.len(),
                runnable = runnable.len(),
                "Holding back interactive tasks"
            );
        }
        (runnable, pending)
    }

    fn enter(&self, run_id: RunId, stage: Stage) {
        debug!(run_id = %run_id, stage = ?stage, "Entering stage");
        self.events.emit(RunEvent::StageEntered { run_id, stage });
    }
}
