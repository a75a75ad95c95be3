//! Execution Service
//!
//! Consumes queued jobs. One job runs one task through
//! `claim -> input mapping -> worker -> output mapping -> persist -> events`.
//! Atom failures end the task as `failed`; they are never returned as
//! errors and never cause the job to be retried.

use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::pipeline::PipelineAtom;
use fluxion_core::domain::task::{Task, TaskStatus};
use fluxion_core::domain::worker::ExecOptions;
use fluxion_core::dto::job::AtomJob;
use serde_json::{Value, json};
use std::sync::Arc;

use super::launcher::AtomLauncher;
use crate::error::{Error, Result};
use crate::events::{AtomEvent, EventBus, EventKind};
use crate::repository::{NewTaskResult, Repositories, TaskPatch};
use crate::worker::Dispatcher;

#[derive(Clone)]
pub struct ExecutionService {
    repos: Repositories,
    dispatcher: Arc<Dispatcher>,
    launcher: AtomLauncher,
    events: Arc<EventBus>,
}

impl ExecutionService {
    pub fn new(
        repos: Repositories,
        dispatcher: Arc<Dispatcher>,
        launcher: AtomLauncher,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            repos,
            dispatcher,
            launcher,
            events,
        }
    }

    /// Runs one queued job to a terminal task state
    ///
    /// The task is claimed first (`pending -> running`). A job whose task is
    /// missing or no longer pending is a redelivery and is dropped.
    pub async fn run_job(&self, job: &AtomJob) -> Result<()> {
        let claimed = self
            .repos
            .tasks
            .update(
                job.task_id,
                &job.owner_id,
                TaskPatch::transition(TaskStatus::Pending, TaskStatus::Running),
            )
            .await?;

        let Some(task) = claimed else {
            tracing::warn!(
                job_id = %job.id,
                task_id = job.task_id,
                "task is missing or not pending, dropping job"
            );
            return Ok(());
        };

        if let Err(e) = self.run_claimed(&task, job).await {
            tracing::warn!(task_id = task.id, "task aborted: {}", e);
            self.fail(job, json!({ "error": e.to_string() })).await;
        }

        Ok(())
    }

    async fn run_claimed(&self, task: &Task, job: &AtomJob) -> Result<()> {
        let owner_id = job.owner_id.as_str();
        let options = &job.options;

        let atom = self
            .repos
            .atoms
            .get_by_id(job.atom_id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("atom", job.atom_id))?
            .with_connect_url(job.connect_url.as_str());

        let edge = self.pipeline_edge(&atom, options, owner_id).await?;

        let mapped_input = self
            .map(
                &atom,
                edge.as_ref().and_then(|e| e.input_mapping_code.as_deref()),
                job.input.clone(),
                options,
            )
            .await;

        let worker = self.dispatcher.resolve(&job.connect_url)?;

        self.events
            .emit(&self.event(EventKind::Start, job).with_input(job.input.clone()))
            .await;

        let result = worker.execute(&atom, mapped_input, options).await;
        if !result.success {
            self.fail(job, result.output).await;
            return Ok(());
        }

        let output = self
            .map(
                &atom,
                edge.as_ref().and_then(|e| e.output_mapping_code.as_deref()),
                result.output.clone(),
                options,
            )
            .await;

        let stored = self
            .repos
            .task_results
            .create(NewTaskResult {
                task_id: task.id,
                status: TaskStatus::Succeed,
                input: job.input.clone(),
                output: output.clone(),
                owner_id: owner_id.to_string(),
            })
            .await?;

        // The result is written; from here on the task must not take the
        // failure path, which would record a second, contradicting result.
        let updated = self
            .repos
            .tasks
            .update(
                task.id,
                owner_id,
                TaskPatch::transition(TaskStatus::Running, TaskStatus::Succeed)
                    .with_result(stored.id),
            )
            .await;
        match updated {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(task_id = task.id, "task left running state before completion");
            }
            Err(e) => {
                tracing::error!(
                    task_id = task.id,
                    result_id = stored.id,
                    "failed to mark task succeeded: {}",
                    e
                );
                return Ok(());
            }
        }

        if !options.is_executed_by_pipeline()
            && let Some(hints) = result.routing_hints()
        {
            self.launcher
                .launch_next(hints, &job.input, owner_id, atom.id, task.id)
                .await;
        }

        self.events
            .emit(
                &self
                    .event(EventKind::Success, job)
                    .with_input(job.input.clone())
                    .with_output(output)
                    .with_next_atoms(result.next_atoms),
            )
            .await;

        Ok(())
    }

    /// Pipeline node the task runs for; the scheduled node when known,
    /// otherwise the first node of the pipeline running this atom
    async fn pipeline_edge(
        &self,
        atom: &Atom,
        options: &ExecOptions,
        owner_id: &str,
    ) -> Result<Option<PipelineAtom>> {
        if !options.is_executed_by_pipeline() {
            return Ok(None);
        }

        if let Some(id) = options.pipeline_atom_id
            && let Some(edge) = self.repos.pipeline_atoms.get_by_id(id, owner_id).await?
        {
            return Ok(Some(edge));
        }

        match options.pipeline_id {
            Some(pipeline_id) => {
                self.repos
                    .pipeline_atoms
                    .get_by_atom(atom.id, pipeline_id, owner_id)
                    .await
            }
            None => Ok(None),
        }
    }

    /// Runs a mapping code over `value`
    ///
    /// Mapping is best effort: without a code, or when the mapping fails,
    /// `value` comes back unchanged.
    async fn map(
        &self,
        atom: &Atom,
        code: Option<&str>,
        value: Value,
        options: &ExecOptions,
    ) -> Value {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return value;
        };

        let worker = match self.dispatcher.resolve(code) {
            Ok(worker) => worker,
            Err(e) => {
                tracing::warn!(atom_id = atom.id, "mapping skipped: {}", e);
                return value;
            }
        };

        let mapped = worker
            .execute(&atom.with_connect_url(code), value.clone(), options)
            .await;
        if mapped.success {
            mapped.output
        } else {
            tracing::warn!(
                atom_id = atom.id,
                error = %mapped.output,
                "mapping failed, keeping value"
            );
            value
        }
    }

    /// Failure path: failed result, failed task, failed event
    async fn fail(&self, job: &AtomJob, output: Value) {
        let owner_id = job.owner_id.as_str();

        let result_id = match self
            .repos
            .task_results
            .create(NewTaskResult {
                task_id: job.task_id,
                status: TaskStatus::Failed,
                input: job.input.clone(),
                output: output.clone(),
                owner_id: owner_id.to_string(),
            })
            .await
        {
            Ok(stored) => Some(stored.id),
            Err(e) => {
                tracing::error!(task_id = job.task_id, "failed to store task result: {}", e);
                None
            }
        };

        let mut patch = TaskPatch::transition(TaskStatus::Running, TaskStatus::Failed);
        patch.result_id = result_id;
        match self.repos.tasks.update(job.task_id, owner_id, patch).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(task_id = job.task_id, "task left running state before failing");
            }
            Err(e) => {
                tracing::error!(task_id = job.task_id, "failed to mark task failed: {}", e);
            }
        }

        self.events
            .emit(
                &self
                    .event(EventKind::Failed, job)
                    .with_input(job.input.clone())
                    .with_output(output),
            )
            .await;
    }

    fn event(&self, kind: EventKind, job: &AtomJob) -> AtomEvent {
        AtomEvent::new(kind, job.atom_id, job.task_id, job.owner_id.as_str(), &job.options)
    }
}
