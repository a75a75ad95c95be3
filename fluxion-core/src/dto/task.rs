//! Task views

use serde::{Deserialize, Serialize};

use crate::domain::task::{PipelineTask, Task, TaskResult, TaskStatus};
use crate::domain::tree::TaskNode;

/// A task together with its result, once it has one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub result: Option<TaskResult>,
}

/// A pipeline run with its derived status and optionally its task tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTaskDetail {
    #[serde(flatten)]
    pub pipeline_task: PipelineTask,
    pub run_status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskNode>>,
}
