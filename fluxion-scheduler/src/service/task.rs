//! Task Service
//!
//! Read side of executions: single tasks with their results, pipeline runs
//! with their derived status and execution tree.

use fluxion_core::domain::task::{PipelineTask, TaskResult, TaskStatus};
use fluxion_core::domain::tree::{build_task_tree, derive_run_status};
use fluxion_core::dto::task::{PipelineTaskDetail, TaskDetail};
use fluxion_core::dto::{Page, Pagination};

use super::validate_page;
use crate::error::{Error, Result};
use crate::repository::Repositories;

#[derive(Clone)]
pub struct TaskService {
    repos: Repositories,
}

impl TaskService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn get(&self, id: i64, owner_id: &str) -> Result<TaskDetail> {
        let task = self
            .repos
            .tasks
            .get_by_id(id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("task", id))?;
        let result = self.repos.task_results.get_by_task(id, owner_id).await?;

        Ok(TaskDetail { task, result })
    }

    /// A pipeline run with its derived status
    ///
    /// The run is `failed` once any of its tasks failed, `running` while any
    /// task is still pending or running, and `succeed` otherwise. With
    /// `load_tasks` the nested task tree is included.
    pub async fn pipeline_task(
        &self,
        id: i64,
        owner_id: &str,
        load_tasks: bool,
    ) -> Result<PipelineTaskDetail> {
        let pipeline_task = self
            .repos
            .pipeline_tasks
            .get_by_id(id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("pipeline task", id))?;

        let tasks = self
            .repos
            .tasks
            .find_by_pipeline_task(id, owner_id)
            .await?;

        let run_status = if tasks.is_empty() || pipeline_task.status == TaskStatus::Failed {
            pipeline_task.status
        } else {
            derive_run_status(tasks.iter().map(|t| &t.status))
        };

        let tasks = if load_tasks {
            let mut results: Vec<TaskResult> = Vec::with_capacity(tasks.len());
            for task in &tasks {
                let result = self.repos.task_results.get_by_task(task.id, owner_id).await?;
                results.extend(result);
            }
            Some(build_task_tree(tasks, results))
        } else {
            None
        };

        Ok(PipelineTaskDetail {
            pipeline_task,
            run_status,
            tasks,
        })
    }

    /// Runs of a pipeline, newest first
    pub async fn list_pipeline_tasks(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<PipelineTask>> {
        let page = validate_page(page)?;
        self.repos
            .pipelines
            .get_by_id(pipeline_id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("pipeline", pipeline_id))?;

        self.repos
            .pipeline_tasks
            .find_by_pipeline(pipeline_id, owner_id, page)
            .await
    }
}
