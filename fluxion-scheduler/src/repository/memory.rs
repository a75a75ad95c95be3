//! In-memory store
//!
//! All tables sit behind one mutex, so each repository call is atomic. Used
//! when no database is configured and as the fixture store in tests.

use async_trait::async_trait;
use chrono::Utc;
use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::pipeline::{Pipeline, PipelineAtom};
use fluxion_core::domain::task::{PipelineTask, Task, TaskResult};
use fluxion_core::dto::pipeline::PlannedPipelineAtom;
use fluxion_core::dto::{Page, Pagination};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::*;
use crate::error::{Error, Result};

#[derive(Default)]
struct Tables {
    atoms: Vec<Atom>,
    pipelines: Vec<Pipeline>,
    pipeline_atoms: Vec<PipelineAtom>,
    tasks: Vec<Task>,
    pipeline_tasks: Vec<PipelineTask>,
    task_results: Vec<TaskResult>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn paginate<T: Clone>(rows: Vec<&T>, page: Pagination) -> Page<T> {
    let total = rows.len() as u64;
    let items = rows
        .into_iter()
        .skip(page.offset())
        .take(page.limit())
        .cloned()
        .collect();
    Page {
        items,
        total,
        page: page.page,
    }
}

#[async_trait]
impl AtomRepository for MemoryStore {
    async fn create(&self, atom: NewAtom) -> Result<Atom> {
        let mut tables = self.lock();
        if tables
            .atoms
            .iter()
            .any(|a| a.owner_id == atom.owner_id && a.name == atom.name)
        {
            return Err(Error::Validation(format!(
                "atom name '{}' is already taken",
                atom.name
            )));
        }

        let now = Utc::now();
        let atom = Atom {
            id: tables.next_id(),
            name: atom.name,
            description: atom.description,
            connect_url: atom.connect_url,
            enabled: atom.enabled,
            owner_id: atom.owner_id,
            created_at: now,
            updated_at: now,
        };
        tables.atoms.push(atom.clone());
        Ok(atom)
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Atom>> {
        Ok(self
            .lock()
            .atoms
            .iter()
            .find(|a| a.id == id && a.owner_id == owner_id)
            .cloned())
    }

    async fn get_by_name(&self, name: &str, owner_id: &str) -> Result<Option<Atom>> {
        Ok(self
            .lock()
            .atoms
            .iter()
            .find(|a| a.name == name && a.owner_id == owner_id)
            .cloned())
    }

    async fn update(&self, id: i64, owner_id: &str, patch: AtomPatch) -> Result<Option<Atom>> {
        let mut tables = self.lock();
        let Some(atom) = tables
            .atoms
            .iter_mut()
            .find(|a| a.id == id && a.owner_id == owner_id)
        else {
            return Ok(None);
        };

        if let Some(name) = patch.name {
            atom.name = name;
        }
        if let Some(description) = patch.description {
            atom.description = Some(description);
        }
        if let Some(connect_url) = patch.connect_url {
            atom.connect_url = connect_url;
        }
        if let Some(enabled) = patch.enabled {
            atom.enabled = enabled;
        }
        atom.updated_at = Utc::now();
        Ok(Some(atom.clone()))
    }

    async fn list(&self, owner_id: &str, page: Pagination) -> Result<Page<Atom>> {
        let tables = self.lock();
        let rows = tables.atoms.iter().filter(|a| a.owner_id == owner_id).collect();
        Ok(paginate(rows, page))
    }
}

#[async_trait]
impl PipelineRepository for MemoryStore {
    async fn create(&self, pipeline: NewPipeline) -> Result<Pipeline> {
        let mut tables = self.lock();
        if tables
            .pipelines
            .iter()
            .any(|p| p.owner_id == pipeline.owner_id && p.name == pipeline.name)
        {
            return Err(Error::Validation(format!(
                "pipeline name '{}' is already taken",
                pipeline.name
            )));
        }

        let now = Utc::now();
        let pipeline = Pipeline {
            id: tables.next_id(),
            name: pipeline.name,
            description: pipeline.description,
            enabled: pipeline.enabled,
            root_atom_id: None,
            owner_id: pipeline.owner_id,
            created_at: now,
            updated_at: now,
        };
        tables.pipelines.push(pipeline.clone());
        Ok(pipeline)
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Pipeline>> {
        Ok(self
            .lock()
            .pipelines
            .iter()
            .find(|p| p.id == id && p.owner_id == owner_id)
            .cloned())
    }

    async fn get_by_name(&self, name: &str, owner_id: &str) -> Result<Option<Pipeline>> {
        Ok(self
            .lock()
            .pipelines
            .iter()
            .find(|p| p.name == name && p.owner_id == owner_id)
            .cloned())
    }

    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelinePatch,
    ) -> Result<Option<Pipeline>> {
        let mut tables = self.lock();
        let Some(pipeline) = tables
            .pipelines
            .iter_mut()
            .find(|p| p.id == id && p.owner_id == owner_id)
        else {
            return Ok(None);
        };

        if let Some(name) = patch.name {
            pipeline.name = name;
        }
        if let Some(description) = patch.description {
            pipeline.description = Some(description);
        }
        if let Some(enabled) = patch.enabled {
            pipeline.enabled = enabled;
        }
        if let Some(root_atom_id) = patch.root_atom_id {
            pipeline.root_atom_id = Some(root_atom_id);
        }
        pipeline.updated_at = Utc::now();
        Ok(Some(pipeline.clone()))
    }

    async fn list(&self, owner_id: &str, page: Pagination) -> Result<Page<Pipeline>> {
        let tables = self.lock();
        let rows = tables
            .pipelines
            .iter()
            .filter(|p| p.owner_id == owner_id)
            .collect();
        Ok(paginate(rows, page))
    }
}

#[async_trait]
impl PipelineAtomRepository for MemoryStore {
    async fn create(&self, node: NewPipelineAtom) -> Result<PipelineAtom> {
        let mut tables = self.lock();
        let node = PipelineAtom {
            id: tables.next_id(),
            parent_atom_id: node.parent_atom_id,
            pipeline_id: node.pipeline_id,
            atom_id: node.atom_id,
            input_mapping_code: node.input_mapping_code,
            output_mapping_code: node.output_mapping_code,
            owner_id: node.owner_id,
            created_at: Utc::now(),
        };
        tables.pipeline_atoms.push(node.clone());
        Ok(node)
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<PipelineAtom>> {
        Ok(self
            .lock()
            .pipeline_atoms
            .iter()
            .find(|n| n.id == id && n.owner_id == owner_id)
            .cloned())
    }

    async fn get_by_atom(
        &self,
        atom_id: i64,
        pipeline_id: i64,
        owner_id: &str,
    ) -> Result<Option<PipelineAtom>> {
        Ok(self
            .lock()
            .pipeline_atoms
            .iter()
            .filter(|n| {
                n.atom_id == atom_id && n.pipeline_id == pipeline_id && n.owner_id == owner_id
            })
            .min_by_key(|n| n.id)
            .cloned())
    }

    async fn find_children(
        &self,
        parent_id: i64,
        pipeline_id: i64,
        owner_id: &str,
    ) -> Result<Vec<PipelineAtom>> {
        let mut children: Vec<PipelineAtom> = self
            .lock()
            .pipeline_atoms
            .iter()
            .filter(|n| {
                n.parent_atom_id == Some(parent_id)
                    && n.pipeline_id == pipeline_id
                    && n.owner_id == owner_id
            })
            .cloned()
            .collect();
        children.sort_by_key(|n| n.id);
        Ok(children)
    }

    async fn find_by_pipeline(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<PipelineAtom>> {
        let tables = self.lock();
        let rows = tables
            .pipeline_atoms
            .iter()
            .filter(|n| n.pipeline_id == pipeline_id && n.owner_id == owner_id)
            .collect();
        Ok(paginate(rows, page))
    }

    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelineAtomPatch,
    ) -> Result<Option<PipelineAtom>> {
        let mut tables = self.lock();
        let Some(node) = tables
            .pipeline_atoms
            .iter_mut()
            .find(|n| n.id == id && n.owner_id == owner_id)
        else {
            return Ok(None);
        };

        if let Some(code) = patch.input_mapping_code {
            node.input_mapping_code = Some(code);
        }
        if let Some(code) = patch.output_mapping_code {
            node.output_mapping_code = Some(code);
        }
        Ok(Some(node.clone()))
    }

    async fn create_tree(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        nodes: &[PlannedPipelineAtom],
    ) -> Result<Vec<PipelineAtom>> {
        let mut tables = self.lock();

        // Validate everything before touching the table
        for node in nodes {
            if !tables
                .atoms
                .iter()
                .any(|a| a.id == node.atom_id && a.owner_id == owner_id)
            {
                return Err(Error::not_found("atom", node.atom_id));
            }
        }

        let now = Utc::now();
        let mut created: Vec<PipelineAtom> = Vec::with_capacity(nodes.len());
        for node in nodes {
            let parent_atom_id = match node.parent {
                Some(idx) => Some(
                    created
                        .get(idx)
                        .map(|p| p.id)
                        .ok_or_else(|| Error::Validation(format!("invalid parent index {}", idx)))?,
                ),
                None => None,
            };
            created.push(PipelineAtom {
                id: tables.next_id(),
                parent_atom_id,
                pipeline_id,
                atom_id: node.atom_id,
                input_mapping_code: node.input_mapping_code.clone(),
                output_mapping_code: node.output_mapping_code.clone(),
                owner_id: owner_id.to_string(),
                created_at: now,
            });
        }

        tables.pipeline_atoms.extend(created.iter().cloned());
        Ok(created)
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        let mut tables = self.lock();
        let now = Utc::now();
        let task = Task {
            id: tables.next_id(),
            atom_id: task.atom_id,
            parent_task_id: task.parent_task_id,
            pipeline_task_id: task.pipeline_task_id,
            status: TaskStatus::Pending,
            result_id: None,
            owner_id: task.owner_id,
            created_at: now,
            updated_at: now,
        };
        tables.tasks.push(task.clone());
        Ok(task)
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<Task>> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .find(|t| t.id == id && t.owner_id == owner_id)
            .cloned())
    }

    async fn update(&self, id: i64, owner_id: &str, patch: TaskPatch) -> Result<Option<Task>> {
        let mut tables = self.lock();
        let Some(task) = tables
            .tasks
            .iter_mut()
            .find(|t| t.id == id && t.owner_id == owner_id)
        else {
            return Ok(None);
        };

        if let Some(expected) = patch.expected_status
            && task.status != expected
        {
            return Ok(None);
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(result_id) = patch.result_id {
            task.result_id = Some(result_id);
        }
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn find_by_pipeline_task(
        &self,
        pipeline_task_id: i64,
        owner_id: &str,
    ) -> Result<Vec<Task>> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.pipeline_task_id == Some(pipeline_task_id) && t.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn find_by_atom(
        &self,
        atom_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<Task>> {
        let tables = self.lock();
        let rows = tables
            .tasks
            .iter()
            .rev()
            .filter(|t| t.atom_id == atom_id && t.owner_id == owner_id)
            .collect();
        Ok(paginate(rows, page))
    }
}

#[async_trait]
impl PipelineTaskRepository for MemoryStore {
    async fn create(&self, run: NewPipelineTask) -> Result<PipelineTask> {
        let mut tables = self.lock();
        let now = Utc::now();
        let run = PipelineTask {
            id: tables.next_id(),
            pipeline_id: run.pipeline_id,
            root_task_id: None,
            status: run.status,
            owner_id: run.owner_id,
            created_at: now,
            updated_at: now,
        };
        tables.pipeline_tasks.push(run.clone());
        Ok(run)
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<PipelineTask>> {
        Ok(self
            .lock()
            .pipeline_tasks
            .iter()
            .find(|r| r.id == id && r.owner_id == owner_id)
            .cloned())
    }

    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        patch: PipelineTaskPatch,
    ) -> Result<Option<PipelineTask>> {
        let mut tables = self.lock();
        let Some(run) = tables
            .pipeline_tasks
            .iter_mut()
            .find(|r| r.id == id && r.owner_id == owner_id)
        else {
            return Ok(None);
        };

        if let Some(status) = patch.status {
            run.status = status;
        }
        if let Some(root_task_id) = patch.root_task_id {
            run.root_task_id = Some(root_task_id);
        }
        run.updated_at = Utc::now();
        Ok(Some(run.clone()))
    }

    async fn find_by_pipeline(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<PipelineTask>> {
        let tables = self.lock();
        let rows = tables
            .pipeline_tasks
            .iter()
            .rev()
            .filter(|r| r.pipeline_id == pipeline_id && r.owner_id == owner_id)
            .collect();
        Ok(paginate(rows, page))
    }
}

#[async_trait]
impl TaskResultRepository for MemoryStore {
    async fn create(&self, result: NewTaskResult) -> Result<TaskResult> {
        let mut tables = self.lock();
        if tables.task_results.iter().any(|r| r.task_id == result.task_id) {
            return Err(Error::InvalidState(format!(
                "task {} already has a result",
                result.task_id
            )));
        }

        let result = TaskResult {
            id: tables.next_id(),
            task_id: result.task_id,
            status: result.status,
            input: result.input,
            output: result.output,
            owner_id: result.owner_id,
            created_at: Utc::now(),
        };
        tables.task_results.push(result.clone());
        Ok(result)
    }

    async fn get_by_id(&self, id: i64, owner_id: &str) -> Result<Option<TaskResult>> {
        Ok(self
            .lock()
            .task_results
            .iter()
            .find(|r| r.id == id && r.owner_id == owner_id)
            .cloned())
    }

    async fn get_by_task(&self, task_id: i64, owner_id: &str) -> Result<Option<TaskResult>> {
        Ok(self
            .lock()
            .task_results
            .iter()
            .find(|r| r.task_id == task_id && r.owner_id == owner_id)
            .cloned())
    }
}
