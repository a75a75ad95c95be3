//! Execution tree reconstruction
//!
//! Tasks reference their parent by id. The nested view is rebuilt from a flat
//! list through an arena of integer parent indices.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::task::{Task, TaskResult, TaskStatus};

/// One task of an execution tree with the tasks it scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    #[serde(flatten)]
    pub task: Task,
    pub result: Option<TaskResult>,
    pub next_tasks: Vec<TaskNode>,
}

impl TaskNode {
    /// Number of tasks in this subtree, including this one
    pub fn count(&self) -> usize {
        1 + self.next_tasks.iter().map(TaskNode::count).sum::<usize>()
    }
}

struct Slot {
    task: Task,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Builds the forest of task trees from a flat task list
///
/// Tasks whose parent is not part of `tasks` become roots. Siblings keep
/// ascending id order.
pub fn build_task_tree(mut tasks: Vec<Task>, results: Vec<TaskResult>) -> Vec<TaskNode> {
    tasks.sort_by_key(|t| t.id);

    let index: HashMap<i64, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
    let mut results: HashMap<i64, TaskResult> =
        results.into_iter().map(|r| (r.task_id, r)).collect();

    let mut arena: Vec<Slot> = tasks
        .into_iter()
        .map(|task| {
            let parent = task.parent_task_id.and_then(|p| index.get(&p).copied());
            Slot {
                task,
                parent,
                children: Vec::new(),
            }
        })
        .collect();

    for i in 0..arena.len() {
        if let Some(parent) = arena[i].parent {
            arena[parent].children.push(i);
        }
    }

    let roots: Vec<usize> = (0..arena.len()).filter(|&i| arena[i].parent.is_none()).collect();
    roots
        .into_iter()
        .map(|root| assemble(root, &arena, &mut results))
        .collect()
}

fn assemble(idx: usize, arena: &[Slot], results: &mut HashMap<i64, TaskResult>) -> TaskNode {
    let slot = &arena[idx];
    TaskNode {
        task: slot.task.clone(),
        result: results.remove(&slot.task.id),
        next_tasks: slot
            .children
            .iter()
            .map(|&child| assemble(child, arena, results))
            .collect(),
    }
}

/// Overall status of a run from the statuses of its tasks
///
/// Any failed task fails the run. Otherwise the run is still going while any
/// task is pending or running.
pub fn derive_run_status<'a>(statuses: impl IntoIterator<Item = &'a TaskStatus>) -> TaskStatus {
    let mut active = false;
    for status in statuses {
        match status {
            TaskStatus::Failed => return TaskStatus::Failed,
            TaskStatus::Pending | TaskStatus::Running => active = true,
            TaskStatus::Succeed => {}
        }
    }
    if active {
        TaskStatus::Running
    } else {
        TaskStatus::Succeed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn task(id: i64, parent: Option<i64>, status: TaskStatus) -> Task {
        Task {
            id,
            atom_id: 1,
            parent_task_id: parent,
            pipeline_task_id: Some(1),
            status,
            result_id: None,
            owner_id: "u1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_builds_nested_tree() {
        // 1 -> {2 -> {4}, 3}
        let tasks = vec![
            task(4, Some(2), TaskStatus::Succeed),
            task(3, Some(1), TaskStatus::Succeed),
            task(1, None, TaskStatus::Succeed),
            task(2, Some(1), TaskStatus::Succeed),
        ];
        let results = vec![TaskResult {
            id: 10,
            task_id: 2,
            status: TaskStatus::Succeed,
            input: json!(1),
            output: json!(2),
            owner_id: "u1".to_string(),
            created_at: Utc::now(),
        }];

        let forest = build_task_tree(tasks, results);
        assert_eq!(forest.len(), 1);

        let root = &forest[0];
        assert_eq!(root.task.id, 1);
        assert_eq!(root.count(), 4);
        assert_eq!(root.next_tasks[0].task.id, 2);
        assert_eq!(root.next_tasks[1].task.id, 3);
        assert_eq!(root.next_tasks[0].next_tasks[0].task.id, 4);
        assert_eq!(root.next_tasks[0].result.as_ref().map(|r| r.id), Some(10));
        assert!(root.result.is_none());
    }

    #[test]
    fn test_orphans_become_roots() {
        let forest = build_task_tree(
            vec![task(5, Some(99), TaskStatus::Pending), task(6, None, TaskStatus::Pending)],
            vec![],
        );
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn test_run_status_derivation() {
        use TaskStatus::*;
        assert_eq!(derive_run_status(&[Succeed, Succeed]), Succeed);
        assert_eq!(derive_run_status(&[Succeed, Running]), Running);
        assert_eq!(derive_run_status(&[Pending, Failed]), Failed);
        assert_eq!(derive_run_status(&[] as &[TaskStatus]), Succeed);
    }
}
