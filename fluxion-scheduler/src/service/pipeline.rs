//! Pipeline Service
//!
//! Pipeline CRUD, graph construction and the pipeline run entrypoint.

use fluxion_core::domain::pipeline::{Pipeline, PipelineAtom};
use fluxion_core::domain::task::{PipelineTask, TaskStatus};
use fluxion_core::domain::worker::ExecOptions;
use fluxion_core::dto::pipeline::{
    CreatePipeline, CreatePipelineAtom, PipelineAtomBatch, PipelineAtomTree, UpdatePipeline,
};
use fluxion_core::dto::{Page, Pagination};
use serde_json::Value;

use super::launcher::AtomLauncher;
use super::{validate_connect_url, validate_id, validate_name, validate_page};
use crate::error::{Error, Result};
use crate::repository::{
    NewPipeline, NewPipelineAtom, NewPipelineTask, PipelinePatch, PipelineTaskPatch, Repositories,
};

#[derive(Clone)]
pub struct PipelineService {
    repos: Repositories,
    launcher: AtomLauncher,
}

impl PipelineService {
    pub fn new(repos: Repositories, launcher: AtomLauncher) -> Self {
        Self { repos, launcher }
    }

    pub async fn create(&self, owner_id: &str, req: CreatePipeline) -> Result<Pipeline> {
        validate_name("pipeline", &req.name)?;
        self.ensure_name_free(&req.name, owner_id, None).await?;

        let pipeline = self
            .repos
            .pipelines
            .create(NewPipeline {
                name: req.name,
                description: req.description,
                enabled: req.enabled,
                owner_id: owner_id.to_string(),
            })
            .await?;

        tracing::info!(pipeline_id = pipeline.id, name = %pipeline.name, "pipeline created");
        Ok(pipeline)
    }

    pub async fn get(&self, id: i64, owner_id: &str) -> Result<Pipeline> {
        self.repos
            .pipelines
            .get_by_id(id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("pipeline", id))
    }

    pub async fn list(&self, owner_id: &str, page: Pagination) -> Result<Page<Pipeline>> {
        self.repos.pipelines.list(owner_id, validate_page(page)?).await
    }

    pub async fn update(&self, id: i64, owner_id: &str, req: UpdatePipeline) -> Result<Pipeline> {
        if let Some(name) = &req.name {
            validate_name("pipeline", name)?;
            self.ensure_name_free(name, owner_id, Some(id)).await?;
        }
        if let Some(root) = req.root_atom_id {
            self.node_in(id, root, owner_id).await?;
        }

        self.repos
            .pipelines
            .update(
                id,
                owner_id,
                PipelinePatch {
                    name: req.name,
                    description: req.description,
                    enabled: req.enabled,
                    root_atom_id: req.root_atom_id,
                },
            )
            .await?
            .ok_or_else(|| Error::not_found("pipeline", id))
    }

    /// Adds one node to a pipeline
    ///
    /// A parent must be a node of the same pipeline. The first parentless
    /// node of a pipeline without a root becomes its root.
    pub async fn add_atom(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        req: CreatePipelineAtom,
    ) -> Result<PipelineAtom> {
        validate_id("atom_id", req.atom_id)?;
        let pipeline = self.get(pipeline_id, owner_id).await?;

        self.repos
            .atoms
            .get_by_id(req.atom_id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("atom", req.atom_id))?;

        if let Some(parent) = req.parent_atom_id {
            self.node_in(pipeline_id, parent, owner_id).await?;
        }
        validate_mapping_codes(
            req.input_mapping_code.as_deref(),
            req.output_mapping_code.as_deref(),
        )?;

        let node = self
            .repos
            .pipeline_atoms
            .create(NewPipelineAtom {
                pipeline_id,
                atom_id: req.atom_id,
                parent_atom_id: req.parent_atom_id,
                input_mapping_code: req.input_mapping_code,
                output_mapping_code: req.output_mapping_code,
                owner_id: owner_id.to_string(),
            })
            .await?;

        if pipeline.root_atom_id.is_none() && node.parent_atom_id.is_none() {
            self.set_root(pipeline_id, owner_id, node.id).await?;
        }

        Ok(node)
    }

    pub async fn list_atoms(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        page: Pagination,
    ) -> Result<Page<PipelineAtom>> {
        let page = validate_page(page)?;
        self.get(pipeline_id, owner_id).await?;
        self.repos
            .pipeline_atoms
            .find_by_pipeline(pipeline_id, owner_id, page)
            .await
    }

    /// Creates a nested node tree in one step and makes its root the
    /// pipeline's root
    ///
    /// Either the whole tree is created or nothing is.
    pub async fn batch_create(
        &self,
        pipeline_id: i64,
        owner_id: &str,
        tree: PipelineAtomTree,
    ) -> Result<PipelineAtomBatch> {
        self.get(pipeline_id, owner_id).await?;

        let planned = tree.flatten();
        for node in &planned {
            validate_id("atom_id", node.atom_id)?;
            validate_mapping_codes(
                node.input_mapping_code.as_deref(),
                node.output_mapping_code.as_deref(),
            )?;
        }

        let atoms = self
            .repos
            .pipeline_atoms
            .create_tree(pipeline_id, owner_id, &planned)
            .await?;
        let root = atoms
            .first()
            .cloned()
            .ok_or_else(|| Error::InvalidState("created tree has no root".to_string()))?;

        self.set_root(pipeline_id, owner_id, root.id).await?;

        tracing::info!(pipeline_id, root = root.id, nodes = atoms.len(), "pipeline tree created");
        Ok(PipelineAtomBatch { root, atoms })
    }

    /// Starts a pipeline run
    ///
    /// Returns as soon as the root task is scheduled; the run's progress is
    /// observable through its tasks.
    pub async fn execute(&self, id: i64, owner_id: &str, input: Value) -> Result<PipelineTask> {
        let pipeline = self.get(id, owner_id).await?;
        if !pipeline.enabled {
            return Err(Error::Validation(format!("pipeline {} is disabled", id)));
        }
        let root_id = pipeline
            .root_atom_id
            .ok_or_else(|| Error::Validation(format!("pipeline {} has no root atom", id)))?;

        let root = self
            .repos
            .pipeline_atoms
            .get_by_id(root_id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("pipeline atom", root_id))?;
        let atom = self
            .repos
            .atoms
            .get_by_id(root.atom_id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("atom", root.atom_id))?;

        let run = self
            .repos
            .pipeline_tasks
            .create(NewPipelineTask {
                pipeline_id: id,
                status: TaskStatus::Running,
                owner_id: owner_id.to_string(),
            })
            .await?;

        let options = ExecOptions {
            user_id: Some(owner_id.to_string()),
            pipeline_id: Some(id),
            pipeline_task_id: Some(run.id),
            pipeline_atom_id: Some(root.id),
            ..Default::default()
        };

        let root_task = match self.launcher.execute(&atom, input, options).await {
            Ok(task) => task,
            Err(e) => {
                self.repos
                    .pipeline_tasks
                    .update(
                        run.id,
                        owner_id,
                        PipelineTaskPatch {
                            status: Some(TaskStatus::Failed),
                            root_task_id: None,
                        },
                    )
                    .await?;
                return Err(e);
            }
        };

        let run = self
            .repos
            .pipeline_tasks
            .update(
                run.id,
                owner_id,
                PipelineTaskPatch {
                    status: None,
                    root_task_id: Some(root_task.id),
                },
            )
            .await?
            .ok_or_else(|| Error::not_found("pipeline task", run.id))?;

        tracing::info!(
            pipeline_id = id,
            pipeline_task_id = run.id,
            root_task_id = root_task.id,
            "pipeline run started"
        );
        Ok(run)
    }

    async fn set_root(&self, pipeline_id: i64, owner_id: &str, node_id: i64) -> Result<()> {
        self.repos
            .pipelines
            .update(
                pipeline_id,
                owner_id,
                PipelinePatch {
                    root_atom_id: Some(node_id),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| Error::not_found("pipeline", pipeline_id))?;
        Ok(())
    }

    /// Node `node_id`, which must belong to `pipeline_id`
    async fn node_in(
        &self,
        pipeline_id: i64,
        node_id: i64,
        owner_id: &str,
    ) -> Result<PipelineAtom> {
        let node = self
            .repos
            .pipeline_atoms
            .get_by_id(node_id, owner_id)
            .await?
            .ok_or_else(|| Error::not_found("pipeline atom", node_id))?;

        if node.pipeline_id != pipeline_id {
            return Err(Error::Validation(format!(
                "pipeline atom {} does not belong to pipeline {}",
                node_id, pipeline_id
            )));
        }
        Ok(node)
    }

    async fn ensure_name_free(
        &self,
        name: &str,
        owner_id: &str,
        except: Option<i64>,
    ) -> Result<()> {
        match self.repos.pipelines.get_by_name(name, owner_id).await? {
            Some(existing) if Some(existing.id) != except => Err(Error::Validation(format!(
                "pipeline name '{}' is already taken",
                name
            ))),
            _ => Ok(()),
        }
    }
}

fn validate_mapping_codes(input: Option<&str>, output: Option<&str>) -> Result<()> {
    for code in [input, output].into_iter().flatten() {
        validate_connect_url(code)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_atom, engine};
    use serde_json::json;

    fn create_req(name: &str) -> CreatePipeline {
        CreatePipeline {
            name: name.to_string(),
            description: None,
            enabled: true,
        }
    }

    fn node(atom_id: i64, next: Vec<PipelineAtomTree>) -> PipelineAtomTree {
        PipelineAtomTree {
            atom_id,
            input_mapping_code: None,
            output_mapping_code: None,
            next_atoms: next,
        }
    }

    #[tokio::test]
    async fn test_pipeline_names_are_unique_per_owner() {
        let engine = engine();
        let pipelines = engine.pipelines();

        pipelines.create("u1", create_req("p")).await.unwrap();
        assert!(matches!(
            pipelines.create("u1", create_req("p")).await,
            Err(Error::Validation(_))
        ));
        pipelines.create("u2", create_req("p")).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_atom_sets_root_and_checks_parent() {
        let engine = engine();
        let pipelines = engine.pipelines();
        let a = create_atom(&engine.repos, "u1", "a", "http://localhost/a").await;
        let p = pipelines.create("u1", create_req("p")).await.unwrap();
        let other = pipelines.create("u1", create_req("other")).await.unwrap();

        let root = pipelines
            .add_atom(
                p.id,
                "u1",
                CreatePipelineAtom {
                    atom_id: a.id,
                    parent_atom_id: None,
                    input_mapping_code: None,
                    output_mapping_code: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(pipelines.get(p.id, "u1").await.unwrap().root_atom_id, Some(root.id));

        let foreign_parent = pipelines
            .add_atom(
                other.id,
                "u1",
                CreatePipelineAtom {
                    atom_id: a.id,
                    parent_atom_id: Some(root.id),
                    input_mapping_code: None,
                    output_mapping_code: None,
                },
            )
            .await;
        assert!(matches!(foreign_parent, Err(Error::Validation(_))));

        let bad_mapping = pipelines
            .add_atom(
                p.id,
                "u1",
                CreatePipelineAtom {
                    atom_id: a.id,
                    parent_atom_id: Some(root.id),
                    input_mapping_code: Some("nonsense".to_string()),
                    output_mapping_code: None,
                },
            )
            .await;
        assert!(matches!(bad_mapping, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_batch_create_builds_tree_and_sets_root() {
        let engine = engine();
        let pipelines = engine.pipelines();
        let a = create_atom(&engine.repos, "u1", "a", "http://localhost/a").await;
        let b = create_atom(&engine.repos, "u1", "b", "http://localhost/b").await;
        let p = pipelines.create("u1", create_req("p")).await.unwrap();

        let batch = pipelines
            .batch_create(p.id, "u1", node(a.id, vec![node(b.id, vec![]), node(b.id, vec![])]))
            .await
            .unwrap();

        assert_eq!(batch.atoms.len(), 3);
        assert_eq!(batch.root.parent_atom_id, None);
        assert!(batch.atoms[1..].iter().all(|n| n.parent_atom_id == Some(batch.root.id)));
        assert_eq!(pipelines.get(p.id, "u1").await.unwrap().root_atom_id, Some(batch.root.id));
    }

    #[tokio::test]
    async fn test_batch_create_rolls_back_on_missing_atom() {
        let engine = engine();
        let pipelines = engine.pipelines();
        let a = create_atom(&engine.repos, "u1", "a", "http://localhost/a").await;
        let p = pipelines.create("u1", create_req("p")).await.unwrap();

        // third node in traversal order references an atom that does not exist
        let tree = node(
            a.id,
            vec![
                node(a.id, vec![node(9_999, vec![])]),
                node(a.id, vec![node(a.id, vec![])]),
            ],
        );

        let result = pipelines.batch_create(p.id, "u1", tree).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let nodes = pipelines.list_atoms(p.id, "u1", Pagination::default()).await.unwrap();
        assert_eq!(nodes.total, 0);
        assert_eq!(pipelines.get(p.id, "u1").await.unwrap().root_atom_id, None);
    }

    #[tokio::test]
    async fn test_batch_create_rejects_non_positive_ids() {
        let engine = engine();
        let pipelines = engine.pipelines();
        let p = pipelines.create("u1", create_req("p")).await.unwrap();

        let result = pipelines.batch_create(p.id, "u1", node(0, vec![])).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_execute_requires_root_and_enabled() {
        let engine = engine();
        let pipelines = engine.pipelines();
        let p = pipelines.create("u1", create_req("p")).await.unwrap();

        assert!(matches!(
            pipelines.execute(p.id, "u1", json!(1)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            pipelines.execute(p.id + 1000, "u1", json!(1)).await,
            Err(Error::NotFound(_))
        ));

        let a = create_atom(&engine.repos, "u1", "a", "http://localhost/a").await;
        pipelines.batch_create(p.id, "u1", node(a.id, vec![])).await.unwrap();
        pipelines
            .update(p.id, "u1", UpdatePipeline { enabled: Some(false), ..Default::default() })
            .await
            .unwrap();

        assert!(matches!(
            pipelines.execute(p.id, "u1", json!(1)).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_schedules_root_task() {
        let engine = engine();
        let pipelines = engine.pipelines();
        let a = create_atom(&engine.repos, "u1", "a", "http://localhost/a").await;
        let p = pipelines.create("u1", create_req("p")).await.unwrap();
        let batch = pipelines.batch_create(p.id, "u1", node(a.id, vec![])).await.unwrap();

        let run = pipelines.execute(p.id, "u1", json!({ "go": true })).await.unwrap();

        assert_eq!(run.status, TaskStatus::Running);
        let root_task_id = run.root_task_id.unwrap();
        let root_task = engine.repos.tasks.get_by_id(root_task_id, "u1").await.unwrap().unwrap();
        assert_eq!(root_task.pipeline_task_id, Some(run.id));
        assert_eq!(root_task.status, TaskStatus::Pending);

        let job = engine.queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.options.pipeline_atom_id, Some(batch.root.id));
        assert_eq!(job.options.pipeline_id, Some(p.id));
    }
}
