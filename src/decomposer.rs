//! Query decomposition into a task list
//!
//! The reasoning service is asked for `{"tasks": [...], "execution_strategy": ...}`.
//! Its output is untrusted: it is unwrapped from markdown fences, parsed,
//! normalised against the agent registry and validated. Anything malformed
//! collapses into a single task for the default agent rather than failing
//! the request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agent::AgentRegistry;
use crate::config::OrchestratorConfig;
use crate::error::MusterError;
use crate::reasoning::{CompletionRequest, ReasoningService};
use crate::session::{Role, SessionContext};
use crate::task::{AgentId, Task, TaskId, TaskList};
use crate::text::preview;

const MAX_RESPONSE_LOG_CHARS: usize = 4_000;

const SYSTEM_PROMPT: &str =
    "You are a task decomposition expert. Always respond with valid JSON only, no code blocks.";

/// Instruction template; `{agents}`, `{history}` and `{query}` are substituted
pub const DECOMPOSITION_TEMPLATE: &str = r#"You analyse a user's request and break it into executable tasks.

## Available agents:
{agents}

## Analysis rules:
1. Connectives such as "and then", "after", "next" mean the request must be split into several tasks.
2. Words such as "at the same time", "together", "both" mean the tasks can run in parallel.
3. Phrases such as "based on", "once ... is done" mean a task depends on an earlier one.
4. A simple lookup is a single task.
5. Greetings and small talk need no agent: return an empty tasks array.

## Output format:
Respond with valid JSON only, no code blocks:
{
    "tasks": [
        {
            "id": 0,
            "description": "short task description",
            "agent": "agent id from the list above",
            "query": "concrete query to send to the agent",
            "depends_on": [],
            "parallel_group": 0
        }
    ],
    "execution_strategy": "sequential" | "parallel" | "mixed" | "none"
}

Ids start at 0 and are contiguous. depends_on lists the ids whose results the task needs.

## Examples:
- "Show Kim's performance" -> 1 task
- "Show Kim's performance and the Miracle Clinic revenue" -> 2 parallel tasks
- "Analyse the Miracle Clinic account and write a visit report" -> 2 tasks, the report depends on task 0
- "Analyse Kim's performance and the Miracle Clinic account, then write a summary report" -> tasks 0 and 1 in parallel, task 2 depends on [0, 1]
- "Hello" -> 0 tasks
{history}
User request: {query}
"#;

/// Advisory strategy reported by the reasoning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
    Mixed,
    None,
}

/// Outcome of decomposing one query
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub tasks: TaskList,
    /// Diagnostic only, never used for scheduling
    pub strategy: Option<ExecutionStrategy>,
    /// True when the single-task fallback was taken
    pub fallback: bool,
}

#[derive(Debug, Deserialize)]
struct RawDecomposition {
    #[serde(default)]
    tasks: Vec<RawTask>,
    #[serde(default)]
    execution_strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: u32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    agent: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    depends_on: Vec<u32>,
    #[serde(default)]
    parallel_group: u32,
}

/// Turns a free-form query into a validated task list
pub struct TaskDecomposer {
    reasoning: Arc<dyn ReasoningService>,
    default_agent: AgentId,
    max_history: usize,
}

impl TaskDecomposer {
    pub fn new(reasoning: Arc<dyn ReasoningService>, config: &OrchestratorConfig) -> Self {
        Self {
            reasoning,
            default_agent: config.default_agent.clone(),
            max_history: config.max_history,
        }
    }

    /// Decompose `query`
    ///
    /// Fails only for an empty query or when the default agent is not
    /// registered; every reasoning-side failure becomes the fallback task.
    #[instrument(skip(self, registry, context))]
    pub async fn decompose(
        &self,
        query: &str,
        registry: &AgentRegistry,
        context: &SessionContext,
    ) -> Result<Decomposition, MusterError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MusterError::EmptyQuery);
        }
        if !registry.contains(&self.default_agent) {
            return Err(MusterError::UnknownAgent(self.default_agent.clone()));
        }

        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: self.build_prompt(query, registry, context),
        };

        let text = match self.reasoning.complete(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Reasoning service failed, using single-task fallback");
                return Ok(self.fallback(query));
            }
        };
        debug!(response = %preview(&text, MAX_RESPONSE_LOG_CHARS), "Reasoning response");

        match self.parse(&text, registry) {
            Ok(decomposition) => {
                info!(
                    tasks = decomposition.tasks.len(),
                    strategy = ?decomposition.strategy,
                    "Query decomposed"
                );
                Ok(decomposition)
            }
            Err(e) => {
                warn!(error = %e, "Unusable decomposition, using single-task fallback");
                Ok(self.fallback(query))
            }
        }
    }

    /// Parse and normalise a reasoning response
    pub fn parse(&self, text: &str, registry: &AgentRegistry) -> Result<Decomposition, MusterError> {
        let body = strip_code_fence(text);
        let raw: RawDecomposition = serde_json::from_str(body)
            .map_err(|e| MusterError::Decomposition(format!("invalid JSON: {}", e)))?;

        let strategy = raw.execution_strategy.as_deref().and_then(|s| {
            serde_json::from_value(serde_json::Value::String(s.to_lowercase())).ok()
        });

        let tasks = raw
            .tasks
            .into_iter()
            .map(|t| self.normalize(t, registry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Decomposition {
            tasks: TaskList::new(tasks)?,
            strategy,
            fallback: false,
        })
    }

    fn normalize(&self, raw: RawTask, registry: &AgentRegistry) -> Result<Task, MusterError> {
        let mut agent = AgentId::new(raw.agent.trim());
        if !registry.contains(&agent) {
            warn!(
                task_id = raw.id,
                agent = %agent,
                substitute = %self.default_agent,
                "Unknown agent in decomposition"
            );
            agent = self.default_agent.clone();
        }

        let mut query = raw.query.trim().to_string();
        let mut description = raw.description.trim().to_string();
        if query.is_empty() {
            query = description.clone();
        }
        if query.is_empty() {
            return Err(MusterError::InvalidTaskList(format!(
                "task {} has neither query nor description",
                raw.id
            )));
        }
        if description.is_empty() {
            description = query.clone();
        }

        Ok(Task {
            id: TaskId(raw.id),
            description,
            agent,
            query,
            depends_on: raw.depends_on.into_iter().map(TaskId).collect(),
            parallel_group: raw.parallel_group,
        })
    }

    /// Whole query as one task for the default agent
    pub fn fallback(&self, query: &str) -> Decomposition {
        Decomposition {
            tasks: TaskList::single(Task::new(0, query, self.default_agent.clone(), query)),
            strategy: None,
            fallback: true,
        }
    }

    fn build_prompt(&self, query: &str, registry: &AgentRegistry, context: &SessionContext) -> String {
        let agents = registry
            .catalogue()
            .into_iter()
            .map(|(id, description)| {
                if description.is_empty() {
                    format!("- {}", id)
                } else {
                    format!("- {}: {}", id, description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let recent = context.recent(self.max_history);
        let history = if recent.is_empty() {
            String::new()
        } else {
            let lines = recent
                .iter()
                .map(|m| match (m.role, &m.agent) {
                    (Role::Assistant, Some(agent)) => format!("assistant: [{}] {}", agent, m.content),
                    (Role::Assistant, None) => format!("assistant: {}", m.content),
                    (Role::User, _) => format!("user: {}", m.content),
                    (Role::System, _) => format!("system: {}", m.content),
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("\n## Recent conversation:\n{}\n", lines)
        };

        fill_template(
            DECOMPOSITION_TEMPLATE,
            &[
                ("{agents}", agents.as_str()),
                ("{history}", history.as_str()),
                ("{query}", query),
            ],
        )
    }
}

/// Substitute placeholders in one pass; inserted text is never rescanned
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Unwrap a ```json ... ``` or ``` ... ``` block if present
fn strip_code_fence(text: &str) -> &str {
    let inner = if let Some((_, rest)) = text.split_once("```json") {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some((_, rest)) = text.split_once("```") {
        rest.split("```").next().unwrap_or(rest)
    } else {
        text
    };
    inner.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::session::ChatMessage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio_test::{assert_err, assert_ok};

    struct NoopAgent(&'static str);

    #[async_trait]
    impl Agent for NoopAgent {
        fn description(&self) -> &str {
            self.0
        }

        async fn invoke(&self, _: &str, _: &str, _: &SessionContext) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    /// Returns a fixed reply and records the prompt it was given
    struct ScriptedReasoning {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedReasoning {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedReasoning {
        async fn complete(&self, request: CompletionRequest) -> Result<String, MusterError> {
            self.prompts.lock().push(request.user);
            self.reply.clone().map_err(MusterError::Reasoning)
        }
    }

    fn registry() -> AgentRegistry {
        AgentRegistry::new()
            .with_agent("employee_agent", NoopAgent("Employee performance"))
            .with_agent("client_agent", NoopAgent("Client accounts"))
            .with_agent("search_agent", NoopAgent("Document search"))
            .with_agent("docs_agent", NoopAgent("Document drafting"))
    }

    fn decomposer(reasoning: Arc<ScriptedReasoning>) -> TaskDecomposer {
        TaskDecomposer::new(reasoning, &OrchestratorConfig::default())
    }

    // === Fence Tests ===

    #[test]
    fn test_strip_json_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_plain_fence() {
        assert_eq!(strip_code_fence("here:\n```\n{}\n```\nthanks"), "{}");
    }

    #[test]
    fn test_strip_no_fence() {
        assert_eq!(strip_code_fence("  {\"tasks\": []} "), "{\"tasks\": []}");
    }

    // === Parse Tests ===

    #[test]
    fn test_parse_mixed_plan() {
        let d = decomposer(ScriptedReasoning::replying(""));
        let text = r#"{
            "tasks": [
                {"id": 0, "description": "Kim performance", "agent": "employee_agent", "query": "Analyse Kim", "depends_on": [], "parallel_group": 0},
                {"id": 1, "description": "Clinic revenue", "agent": "client_agent", "query": "Analyse clinic", "depends_on": [], "parallel_group": 0},
                {"id": 2, "description": "Report", "agent": "docs_agent", "query": "Write report", "depends_on": [0, 1], "parallel_group": 1}
            ],
            "execution_strategy": "mixed"
        }"#;

        let parsed = assert_ok!(d.parse(text, &registry()));
        assert_eq!(parsed.tasks.len(), 3);
        assert_eq!(parsed.strategy, Some(ExecutionStrategy::Mixed));
        assert!(!parsed.fallback);
        let report = parsed.tasks.get(TaskId(2)).unwrap();
        assert_eq!(report.depends_on.iter().copied().collect::<Vec<_>>(), vec![TaskId(0), TaskId(1)]);
    }

    #[test]
    fn test_parse_substitutes_unknown_agent() {
        let d = decomposer(ScriptedReasoning::replying(""));
        let text = r#"{"tasks": [{"id": 0, "description": "x", "agent": "weather_agent", "query": "rain?"}]}"#;

        let parsed = assert_ok!(d.parse(text, &registry()));
        assert_eq!(parsed.tasks.as_slice()[0].agent.as_str(), "search_agent");
    }

    #[test]
    fn test_parse_fills_missing_text() {
        let d = decomposer(ScriptedReasoning::replying(""));
        let text = r#"{"tasks": [{"id": 0, "description": "Find the travel policy", "agent": "search_agent"}]}"#;

        let parsed = assert_ok!(d.parse(text, &registry()));
        assert_eq!(parsed.tasks.as_slice()[0].query, "Find the travel policy");
    }

    #[test]
    fn test_parse_rejects_gaps() {
        let d = decomposer(ScriptedReasoning::replying(""));
        let text = r#"{"tasks": [{"id": 1, "description": "x", "agent": "search_agent", "query": "q"}]}"#;
        assert_err!(d.parse(text, &registry()));
    }

    #[test]
    fn test_parse_invalid_json_is_decomposition_error() {
        let d = decomposer(ScriptedReasoning::replying(""));
        let result = d.parse("I think you want two things.", &registry());
        assert!(matches!(result, Err(MusterError::Decomposition(_))));
    }

    #[test]
    fn test_parse_empty_tasks() {
        let d = decomposer(ScriptedReasoning::replying(""));
        let parsed = assert_ok!(d.parse(r#"{"tasks": [], "execution_strategy": "none"}"#, &registry()));
        assert!(parsed.tasks.is_empty());
        assert_eq!(parsed.strategy, Some(ExecutionStrategy::None));
    }

    #[test]
    fn test_parse_unknown_strategy_is_ignored() {
        let d = decomposer(ScriptedReasoning::replying(""));
        let parsed = assert_ok!(d.parse(r#"{"tasks": [], "execution_strategy": "chaotic"}"#, &registry()));
        assert_eq!(parsed.strategy, None);
    }

    // === Decompose Tests ===

    #[tokio::test]
    async fn test_decompose_unparsable_falls_back() {
        let d = decomposer(ScriptedReasoning::replying("I think you want two things."));
        let result = assert_ok!(
            d.decompose("Kim's numbers please", &registry(), &SessionContext::new())
                .await
        );

        assert!(result.fallback);
        assert_eq!(result.tasks.len(), 1);
        let task = &result.tasks.as_slice()[0];
        assert_eq!(task.id, TaskId(0));
        assert_eq!(task.query, "Kim's numbers please");
        assert_eq!(task.agent.as_str(), "search_agent");
        assert!(task.depends_on.is_empty());
    }

    #[tokio::test]
    async fn test_decompose_service_error_falls_back() {
        let d = decomposer(ScriptedReasoning::failing("503"));
        let result = assert_ok!(d.decompose("anything", &registry(), &SessionContext::new()).await);
        assert!(result.fallback);
    }

    #[tokio::test]
    async fn test_decompose_empty_query() {
        let d = decomposer(ScriptedReasoning::replying("{}"));
        let result = d.decompose("   ", &registry(), &SessionContext::new()).await;
        assert!(matches!(result, Err(MusterError::EmptyQuery)));
    }

    #[tokio::test]
    async fn test_decompose_requires_default_agent() {
        let d = decomposer(ScriptedReasoning::replying("{}"));
        let registry = AgentRegistry::new().with_agent("client_agent", NoopAgent(""));
        let result = d.decompose("q", &registry, &SessionContext::new()).await;
        assert!(matches!(result, Err(MusterError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn test_prompt_includes_catalogue_and_history() {
        let reasoning = ScriptedReasoning::replying(r#"{"tasks": []}"#);
        let d = decomposer(reasoning.clone());
        let context = SessionContext::new()
            .with_message(ChatMessage::user("How is Kim doing?"))
            .with_message(ChatMessage::assistant(Some("employee_agent".into()), "Kim is at 103%"));

        assert_ok!(d.decompose("and the clinic?", &registry(), &context).await);

        let prompts = reasoning.prompts.lock();
        let prompt = &prompts[0];
        assert!(prompt.contains("- client_agent: Client accounts"));
        assert!(prompt.contains("assistant: [employee_agent] Kim is at 103%"));
        assert!(prompt.ends_with("User request: and the clinic?\n"));
    }

    #[tokio::test]
    async fn test_prompt_keeps_placeholder_text_in_history() {
        let reasoning = ScriptedReasoning::replying(r#"{"tasks": []}"#);
        let d = decomposer(reasoning.clone());
        let context = SessionContext::new()
            .with_message(ChatMessage::user("what does the {query} template field do?"))
            .with_message(ChatMessage::assistant(None, "it holds {history} and {agents}"));

        assert_ok!(d.decompose("CURRENT", &registry(), &context).await);

        let prompts = reasoning.prompts.lock();
        let prompt = &prompts[0];
        assert!(prompt.contains("user: what does the {query} template field do?"));
        assert!(prompt.contains("assistant: it holds {history} and {agents}"));
        assert_eq!(prompt.matches("CURRENT").count(), 1);
    }

    #[test]
    fn test_fill_template_single_pass() {
        let filled = fill_template("{a} then {b} {c}", &[("{a}", "{b}"), ("{b}", "x")]);
        assert_eq!(filled, "{b} then x {c}");
    }
}
