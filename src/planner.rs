//! Execution planning by dependency layers

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, error};

use crate::error::MusterError;
use crate::task::{TaskId, TaskList};

/// Ordered groups of task ids
///
/// Group `k` holds exactly the tasks whose dependencies all sit in groups
/// `0..k`. Tasks inside a group have no ordering between them and run
/// concurrently. Within a group ids are ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExecutionPlan {
    groups: Vec<Vec<TaskId>>,
}

impl ExecutionPlan {
    /// Layer `tasks` with Kahn's algorithm
    ///
    /// The `parallel_group` hint on each task is ignored for ordering; the
    /// layering is always recomputed from `depends_on`.
    pub fn build(tasks: &TaskList) -> Result<Self, MusterError> {
        let mut in_degree: HashMap<TaskId, usize> = HashMap::with_capacity(tasks.len());
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

        for task in tasks {
            in_degree.insert(task.id, task.depends_on.len());
            for dep in &task.depends_on {
                dependents.entry(*dep).or_default().push(task.id);
            }
        }

        let mut current: Vec<TaskId> = tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| t.id)
            .collect();
        current.sort_unstable();

        let mut groups: Vec<Vec<TaskId>> = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            let mut next = Vec::new();
            for id in &current {
                let Some(children) = dependents.get(id) else {
                    continue;
                };
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*child);
                        }
                    }
                }
            }
            next.sort_unstable();

            placed += current.len();
            groups.push(std::mem::replace(&mut current, next));
        }

        if placed < tasks.len() {
            let unplaced: BTreeSet<TaskId> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id)
                .collect();
            let task_ids: Vec<TaskId> = unplaced
                .iter()
                .copied()
                .filter(|id| on_cycle(tasks, &unplaced, *id))
                .collect();
            error!(
                tasks = ?task_ids,
                unplaced = unplaced.len(),
                "Dependency cycle in task list"
            );
            return Err(MusterError::CyclicDependency { task_ids });
        }

        let plan = Self { groups };
        for task in tasks {
            if let Some(group) = plan.group_of(task.id) {
                if group as u32 != task.parallel_group {
                    debug!(
                        task_id = %task.id,
                        hint = task.parallel_group,
                        computed = group,
                        "Grouping hint disagrees with dependencies"
                    );
                }
            }
        }

        Ok(plan)
    }

    pub fn groups(&self) -> &[Vec<TaskId>] {
        &self.groups
    }

    /// Index of the group containing `id`
    pub fn group_of(&self, id: TaskId) -> Option<usize> {
        self.groups.iter().position(|g| g.contains(&id))
    }

    /// Number of scheduled tasks
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Whether `start` can reach itself through dependencies inside `unplaced`
fn on_cycle(tasks: &TaskList, unplaced: &BTreeSet<TaskId>, start: TaskId) -> bool {
    let mut stack = vec![start];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        let Some(task) = tasks.get(id) else {
            continue;
        };
        for dep in task.depends_on.iter().filter(|d| unplaced.contains(*d)) {
            if *dep == start {
                return true;
            }
            if seen.insert(*dep) {
                stack.push(*dep);
            }
        }
    }
    false
}
