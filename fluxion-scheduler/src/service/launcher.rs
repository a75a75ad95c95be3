//! Atom Launcher
//!
//! Schedules atom executions: creates the pending task and puts the job on
//! the queue. It never waits for the atom to run.

use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::task::Task;
use fluxion_core::domain::worker::{AtomRef, ExecOptions, NextAtomOption};
use fluxion_core::dto::job::AtomJob;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::queue::JobQueue;
use crate::repository::{NewTask, Repositories};

#[derive(Clone)]
pub struct AtomLauncher {
    repos: Repositories,
    queue: Arc<dyn JobQueue>,
}

impl AtomLauncher {
    pub fn new(repos: Repositories, queue: Arc<dyn JobQueue>) -> Self {
        Self { repos, queue }
    }

    /// Creates a pending task for `atom` and enqueues its job
    ///
    /// The task belongs to `options.user_id` when set, otherwise to the
    /// atom's owner.
    pub async fn execute(&self, atom: &Atom, input: Value, options: ExecOptions) -> Result<Task> {
        let owner_id = options
            .user_id
            .clone()
            .unwrap_or_else(|| atom.owner_id.clone());

        let task = self
            .repos
            .tasks
            .create(NewTask {
                atom_id: atom.id,
                parent_task_id: options.parent_task_id,
                pipeline_task_id: options.pipeline_task_id,
                owner_id: owner_id.clone(),
            })
            .await?;

        let job = AtomJob::new(
            atom.id,
            atom.connect_url.clone(),
            task.id,
            owner_id,
            input,
            options,
        );
        self.queue.enqueue(job).await?;

        tracing::info!(atom_id = atom.id, task_id = task.id, "task scheduled");
        Ok(task)
    }

    /// Atom a routing hint points at; ids take priority over names
    pub async fn resolve_target(&self, hint: &NextAtomOption, owner_id: &str) -> Result<Atom> {
        let found = match hint.target() {
            Some(AtomRef::Id(id)) => self.repos.atoms.get_by_id(id, owner_id).await?,
            Some(AtomRef::Name(name)) => self.repos.atoms.get_by_name(name, owner_id).await?,
            None => {
                return Err(Error::Validation(
                    "next atom needs an atomId or atomName".to_string(),
                ));
            }
        };

        found.ok_or_else(|| match (hint.atom_id, hint.atom_name.as_deref()) {
            (Some(id), _) if id > 0 => Error::not_found("atom", id),
            (_, Some(name)) => Error::not_found("atom", name),
            _ => Error::NotFound("atom".to_string()),
        })
    }

    /// Schedules the routing hints of a directly executed atom
    ///
    /// Each resolved target becomes its own task, a child of `parent_task_id`.
    /// Hints without their own input get `parent_input`, the input the parent
    /// task was scheduled with. Unresolvable targets are skipped.
    pub async fn launch_next(
        &self,
        hints: &[NextAtomOption],
        parent_input: &Value,
        owner_id: &str,
        parent_atom_id: i64,
        parent_task_id: i64,
    ) -> Vec<Task> {
        let mut launched = Vec::with_capacity(hints.len());

        for hint in hints {
            let target = match self.resolve_target(hint, owner_id).await {
                Ok(atom) => atom,
                Err(e) => {
                    tracing::warn!(parent_task_id, "skipping next atom: {}", e);
                    continue;
                }
            };

            let input = hint.input.clone().unwrap_or_else(|| parent_input.clone());
            let options = ExecOptions {
                user_id: Some(owner_id.to_string()),
                parent_atom_id: Some(parent_atom_id),
                parent_task_id: Some(parent_task_id),
                ..Default::default()
            };

            match self.execute(&target, input, options).await {
                Ok(task) => launched.push(task),
                Err(e) => {
                    tracing::warn!(
                        atom_id = target.id,
                        parent_task_id,
                        "failed to launch next atom: {}",
                        e
                    );
                }
            }
        }

        launched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::testing::create_atom;
    use fluxion_core::domain::task::TaskStatus;
    use serde_json::json;

    fn launcher() -> (AtomLauncher, Repositories, Arc<MemoryQueue>) {
        let repos = Repositories::in_memory();
        let queue = Arc::new(MemoryQueue::new());
        (AtomLauncher::new(repos.clone(), queue.clone()), repos, queue)
    }

    #[tokio::test]
    async fn test_execute_creates_pending_task_and_job() {
        let (launcher, _, queue) = launcher();
        let atom = create_atom(&launcher.repos, "u1", "a", "http://localhost/a").await;

        let task = launcher
            .execute(&atom, json!({ "x": 1 }), ExecOptions::default())
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.owner_id, "u1");
        assert_eq!(queue.pending_len(), 1);

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.task_id, task.id);
        assert_eq!(job.connect_url, "http://localhost/a");
        assert_eq!(job.input, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn test_execute_uses_caller_as_owner() {
        let (launcher, _, _) = launcher();
        let atom = create_atom(&launcher.repos, "u1", "a", "http://localhost/a").await;

        let task = launcher
            .execute(&atom, json!(null), ExecOptions::for_user("u2"))
            .await
            .unwrap();

        assert_eq!(task.owner_id, "u2");
    }

    #[tokio::test]
    async fn test_resolve_target_prefers_id() {
        let (launcher, repos, _) = launcher();
        let a = create_atom(&repos, "u1", "a", "http://localhost/a").await;
        create_atom(&repos, "u1", "b", "http://localhost/b").await;

        let hint = NextAtomOption {
            atom_id: Some(a.id),
            atom_name: Some("b".to_string()),
            ..Default::default()
        };
        assert_eq!(launcher.resolve_target(&hint, "u1").await.unwrap().id, a.id);

        let by_name = NextAtomOption::by_name("b");
        assert_eq!(launcher.resolve_target(&by_name, "u1").await.unwrap().name, "b");

        let other_owner = launcher.resolve_target(&NextAtomOption::by_id(a.id), "u2").await;
        assert!(matches!(other_owner, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_launch_next_skips_missing_targets() {
        let (launcher, repos, queue) = launcher();
        let b = create_atom(&repos, "u1", "b", "http://localhost/b").await;
        let c = create_atom(&repos, "u1", "c", "http://localhost/c").await;

        let hints = vec![
            NextAtomOption::by_id(b.id),
            NextAtomOption::by_name("missing"),
            NextAtomOption::by_name("c").with_input(json!("custom")),
        ];

        let launched = launcher.launch_next(&hints, &json!(7), "u1", 1, 10).await;

        assert_eq!(launched.len(), 2);
        assert!(launched.iter().all(|t| t.parent_task_id == Some(10)));
        assert_eq!(queue.pending_len(), 2);

        let first = queue.dequeue().await.unwrap().unwrap();
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!((first.atom_id, first.input), (b.id, json!(7)));
        assert_eq!((second.atom_id, second.input), (c.id, json!("custom")));
        assert_eq!(second.options.parent_atom_id, Some(1));
    }
}
