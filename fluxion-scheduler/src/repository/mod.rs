//! Repository Module
//!
//! Persistence ports for the engine. Every lookup is scoped by owner: an
//! entity that exists under another owner is simply not found.
//!
//! Two stores implement all ports: [`memory::MemoryStore`] for single-process
//! use and tests, and [`PgStore`] backed by PostgreSQL.

pub mod atom;
pub mod memory;
pub mod pipeline;
pub mod pipeline_atom;
pub mod pipeline_task;
pub mod task;
pub mod task_result;

use async_trait::async_trait;
use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::pipeline::{Pipeline, PipelineAtom};
use fluxion_core::domain::task::{PipelineTask, Task, TaskResult, TaskStatus};
use fluxion_core::dto::pipeline::PlannedPipelineAtom;
use fluxion_core::dto::{Page, Pagination};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::Result;

// =============================================================================
// Inputs and patches
// =============================================================================

#[derive(Debug, Clone)]
pub struct NewAtom {
    pub name: String,
    pub description: Option<String>,
    pub connect_url: String,
    pub enabled: bool,
    pub owner_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct AtomPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub connect_url: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewPipeline {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub owner_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelinePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub root_atom_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewPipelineAtom {
    pub pipeline_id: i64,
    pub atom_id: i64,
    pub parent_atom_id: Option<i64>,
    pub input_mapping_code: Option<String>,
    pub output_mapping_code: Option<String>,
    pub owner_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineAtomPatch {
    pub input_mapping_code: Option<String>,
    pub output_mapping_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub atom_id: i64,
    pub parent_task_id: Option<i64>,
    pub pipeline_task_id: Option<i64>,
    pub owner_id: String,
}

/// Change to a task
///
/// When `expected_status` is set the patch only applies if the task is
/// currently in that status, which makes status transitions atomic.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub expected_status: Option<TaskStatus>,
    pub status: Option<TaskStatus>,
    pub result_id: Option<i64>,
}

impl TaskPatch {
    /// Moves a task from `from` to `to`
    pub fn transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self {
            expected_status: Some(from),
            status: Some(to),
            result_id: None,
        }
    }

    pub fn with_result(mut self, result_id: i64) -> Self {
        self.result_id = Some(result_id);
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewPipelineTask {
    pub pipeline_id: i64,
    pub status: TaskStatus,
    pub owner_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineTaskPatch {
    pub status: Option<TaskStatus>,
    pub root_task_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewTaskResult {
    pub task_id: i64,
    pub status: TaskStatus,
    pub input: Value,
    pub output: Value,
    pub owner_id: String,
}

// =============================================================================
// Ports
// =============================================================================

#[async_trait]
pub trait AtomRepository: Send + Sync {
    async fn create(&self, atom: NewAtom) -> Result<Atom>;
    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Atom>>;
    async fn get_by_name(&self, name: &str, owner_id: &str) -> Result<Option<Atom>>;
    async fn update(&self, id: i64, owner_id: &str, patch: AtomPatch) -> Result<Option<Atom>>;
    async fn list(&self, owner_id: &str, page: Pagination) -> Result<Page<Atom>>;
}

#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn create(&self, pipeline: NewPipeline) -> Result<Pipeline>;
    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Pipeline>>;
    async fn get_by_name(&self, name: &str, owner_id: &str) -> Result<Option<Pipeline>>;
    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelinePatch,
    ) -> Result<Option<Pipeline>>;
    async fn list(&self, owner_id: &str, page: Pagination) -> Result<Page<Pipeline>>;
}

#[async_trait]
pub trait PipelineAtomRepository: Send + Sync {
    async fn create(&self, node: NewPipelineAtom) -> Result<PipelineAtom>;
    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<PipelineAtom>>;

    /// Node of `pipeline_id` running `atom_id`; the lowest id wins when the
    /// atom appears several times
    async fn get_by_atom(
        &self,
        atom_id: i64,
        pipeline_id: i64,
        owner_id: &str,
    ) -> Result<Option<PipelineAtom>>;

    /// Children of `parent_id` within the pipeline, ascending id
    async fn find_children(
        &self,
        parent_id: i64,
        pipeline_id: i64,
        owner_id: &str,
    ) -> Result<Vec<PipelineAtom>>;

    async fn find_by_pipeline(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<PipelineAtom>>;

    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelineAtomPatch,
    ) -> Result<Option<PipelineAtom>>;

    /// Creates a whole subtree atomically
    ///
    /// Every referenced atom must exist for `owner_id`; otherwise nothing is
    /// persisted. Returned nodes follow the order of `nodes`.
    async fn create_tree(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        nodes: &[PlannedPipelineAtom],
    ) -> Result<Vec<PipelineAtom>>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: NewTask) -> Result<Task>;
    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Task>>;

    /// Applies `patch`; `None` when the task is missing or not in the
    /// expected status
    async fn update(&self, id: i64, owner_id: &str, patch: TaskPatch) -> Result<Option<Task>>;

    async fn find_by_pipeline_task(
        &self,
        pipeline_task_id: i64,
        owner_id: &str,
    ) -> Result<Vec<Task>>;

    async fn find_by_atom(
        &self,
        atom_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<Task>>;
}

#[async_trait]
pub trait PipelineTaskRepository: Send + Sync {
    async fn create(&self, run: NewPipelineTask) -> Result<PipelineTask>;
    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<PipelineTask>>;
    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelineTaskPatch,
    ) -> Result<Option<PipelineTask>>;
    async fn find_by_pipeline(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<PipelineTask>>;
}

#[async_trait]
pub trait TaskResultRepository: Send + Sync {
    /// Records the result of a task; fails if the task already has one
    async fn create(&self, result: NewTaskResult) -> Result<TaskResult>;
    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<TaskResult>>;
    async fn get_by_task(&self, task_id: i64, owner_id: &str) -> Result<Option<TaskResult>>;
}

// =============================================================================
// Bundle
// =============================================================================

/// Handles to every repository
#[derive(Clone)]
pub struct Repositories {
    pub atoms: Arc<dyn AtomRepository>,
    pub pipelines: Arc<dyn PipelineRepository>,
    pub pipeline_atoms: Arc<dyn PipelineAtomRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub pipeline_tasks: Arc<dyn PipelineTaskRepository>,
    pub task_results: Arc<dyn TaskResultRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(memory::MemoryStore::default()))
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::from_store(Arc::new(PgStore::new(pool)))
    }

    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AtomRepository
            + PipelineRepository
            + PipelineAtomRepository
            + TaskRepository
            + PipelineTaskRepository
            + TaskResultRepository
            + 'static,
    {
        Self {
            atoms: store.clone(),
            pipelines: store.clone(),
            pipeline_atoms: store.clone(),
            tasks: store.clone(),
            pipeline_tasks: store.clone(),
            task_results: store,
        }
    }
}

/// PostgreSQL-backed store
///
/// Queries live next to their entity in the sibling modules.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn parse_status(raw: &str) -> Result<TaskStatus> {
    raw.parse::<TaskStatus>()
        .map_err(crate::error::Error::InvalidState)
}

pub(crate) fn to_total(count: i64) -> u64 {
    count.max(0) as u64
}
