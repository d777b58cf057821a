//! Result aggregation into one structured response

use serde::Serialize;
use serde_json::Value;

use crate::error::TaskError;
use crate::planner::ExecutionPlan;
use crate::result::{TaskResult, TaskResults, TaskStatus};
use crate::task::{AgentId, Task, TaskList};

/// One task as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// One-based step number
    pub step: u32,
    pub agent: AgentId,
    pub description: String,
    pub status: TaskStatus,
    /// Agent value on success, error text on failure
    pub result: Value,
    /// Execution group the task ran in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<usize>,
}

/// Combined outcome of a multi-task run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResponse {
    pub summary: String,
    pub steps: Vec<StepReport>,
    pub total_steps: usize,
    pub completed_steps: usize,
}

impl AggregatedResponse {
    pub fn is_complete(&self) -> bool {
        self.completed_steps == self.total_steps
    }

    /// Append a note listing tasks held back from the run
    pub fn with_pending(mut self, pending: &[Task]) -> Self {
        if pending.is_empty() {
            return self;
        }
        self.summary
            .push_str("\n\n📝 These tasks are interactive and must be run separately:");
        for task in pending {
            self.summary.push_str(&format!("\n- {}", task.description));
        }
        self
    }
}

/// Build the response for `tasks` from their settled `results`
///
/// Pure: the same inputs always produce the same output. A task without a
/// result is reported as failed.
pub fn aggregate(tasks: &TaskList, plan: &ExecutionPlan, results: &TaskResults) -> AggregatedResponse {
    if tasks.is_empty() {
        return AggregatedResponse {
            summary: "The request could not be processed.".to_string(),
            steps: Vec::new(),
            total_steps: 0,
            completed_steps: 0,
        };
    }

    let mut steps = Vec::with_capacity(tasks.len());
    let mut lines = Vec::with_capacity(tasks.len());

    for task in tasks {
        let missing;
        let result = match results.get(&task.id) {
            Some(result) => result,
            None => {
                missing = TaskResult::failed(task.id, TaskError::execution("no result recorded"));
                &missing
            }
        };

        lines.push(match result {
            TaskResult::Completed { .. } => format!("✅ {}", task.description),
            TaskResult::Failed { error, .. } => format!("❌ {}: {}", task.description, error),
        });

        steps.push(StepReport {
            step: task.id.step(),
            agent: task.agent.clone(),
            description: task.description.clone(),
            status: result.status(),
            result: result.to_value(),
            group: plan.group_of(task.id),
        });
    }

    let total_steps = steps.len();
    let completed_steps = steps
        .iter()
        .filter(|s| s.status == TaskStatus::Completed)
        .count();

    let headline = if completed_steps == total_steps {
        "All tasks completed.".to_string()
    } else if completed_steps == 0 {
        "No tasks could be completed.".to_string()
    } else {
        format!("{} of {} tasks completed.", completed_steps, total_steps)
    };

    AggregatedResponse {
        summary: format!("{}\n\n{}", headline, lines.join("\n")),
        steps,
        total_steps,
        completed_steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;
    use serde_json::json;

    fn fixture() -> (TaskList, ExecutionPlan, TaskResults) {
        let tasks = TaskList::new(vec![
            Task::new(0, "Kim performance", "employee_agent", "a"),
            Task::new(1, "Clinic revenue", "client_agent", "b"),
            Task::new(2, "Summary report", "docs_agent", "c").depends_on([0, 1]),
        ])
        .unwrap();
        let plan = ExecutionPlan::build(&tasks).unwrap();

        let mut results = TaskResults::new();
        results.insert(TaskId(0), TaskResult::completed(TaskId(0), json!("103%")));
        results.insert(
            TaskId(1),
            TaskResult::failed(TaskId(1), TaskError::execution("client not found")),
        );
        results.insert(
            TaskId(2),
            TaskResult::failed(
                TaskId(2),
                TaskError::DependencyUnmet {
                    failed: vec![TaskId(1)],
                },
            ),
        );
        (tasks, plan, results)
    }

    #[test]
    fn test_partial_success() {
        let (tasks, plan, results) = fixture();
        let response = aggregate(&tasks, &plan, &results);

        assert_eq!(response.total_steps, 3);
        assert_eq!(response.completed_steps, 1);
        assert!(!response.is_complete());
        assert_eq!(
            response.summary,
            "1 of 3 tasks completed.\n\n\
             ✅ Kim performance\n\
             ❌ Clinic revenue: client not found\n\
             ❌ Summary report: dependency not met: step 2 failed"
        );
    }

    #[test]
    fn test_steps_mirror_task_order() {
        let (tasks, plan, results) = fixture();
        let response = aggregate(&tasks, &plan, &results);

        let numbers: Vec<u32> = response.steps.iter().map(|s| s.step).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(response.steps[0].result, json!("103%"));
        assert_eq!(response.steps[1].status, TaskStatus::Failed);
        assert_eq!(response.steps[1].result, json!("client not found"));
        assert_eq!(response.steps[2].group, Some(1));
    }

    #[test]
    fn test_all_completed() {
        let tasks = TaskList::new(vec![
            Task::new(0, "a", "search_agent", "a"),
            Task::new(1, "b", "search_agent", "b"),
        ])
        .unwrap();
        let plan = ExecutionPlan::build(&tasks).unwrap();
        let mut results = TaskResults::new();
        results.insert(TaskId(0), TaskResult::completed(TaskId(0), json!({"hits": 2})));
        results.insert(TaskId(1), TaskResult::completed(TaskId(1), json!("ok")));

        let response = aggregate(&tasks, &plan, &results);

        assert!(response.is_complete());
        assert_eq!(response.summary, "All tasks completed.\n\n✅ a\n✅ b");
        assert_eq!(response.steps[0].result, json!({"hits": 2}));
    }

    #[test]
    fn test_missing_result_is_failure() {
        let tasks = TaskList::new(vec![Task::new(0, "a", "search_agent", "a")]).unwrap();
        let plan = ExecutionPlan::build(&tasks).unwrap();

        let response = aggregate(&tasks, &plan, &TaskResults::new());

        assert_eq!(response.completed_steps, 0);
        assert!(response.summary.starts_with("No tasks could be completed."));
    }

    #[test]
    fn test_empty_task_list() {
        let tasks = TaskList::new(vec![]).unwrap();
        let plan = ExecutionPlan::build(&tasks).unwrap();
        let response = aggregate(&tasks, &plan, &TaskResults::new());

        assert!(response.steps.is_empty());
        assert_eq!(response.total_steps, 0);
    }

    #[test]
    fn test_idempotent() {
        let (tasks, plan, results) = fixture();
        let first = serde_json::to_string(&aggregate(&tasks, &plan, &results)).unwrap();
        let second = serde_json::to_string(&aggregate(&tasks, &plan, &results)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_with_pending_note() {
        let (tasks, plan, results) = fixture();
        let pending = vec![Task::new(3, "Visit report", "docs_agent", "d")];

        let response = aggregate(&tasks, &plan, &results).with_pending(&pending);

        assert!(response
            .summary
            .ends_with("must be run separately:\n- Visit report"));
    }
}
