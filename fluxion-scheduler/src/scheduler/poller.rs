//! Queue poller
//!
//! Takes jobs off the queue and runs each on its own tokio task, at most
//! `max_parallel_jobs` at a time. A job is acknowledged once handled,
//! whatever its outcome; nothing is retried.

use fluxion_core::dto::job::AtomJob;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::queue::JobQueue;
use crate::service::ExecutionService;

#[derive(Clone)]
pub struct QueuePoller {
    queue: Arc<dyn JobQueue>,
    execution: ExecutionService,
    semaphore: Arc<Semaphore>,
    poll_interval: Duration,
}

impl QueuePoller {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        execution: ExecutionService,
        max_parallel_jobs: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            execution,
            semaphore: Arc::new(Semaphore::new(max_parallel_jobs.max(1))),
            poll_interval,
        }
    }

    /// Polls forever
    pub async fn run(&self) {
        info!("Starting queue poller (interval: {:?})", self.poll_interval);

        loop {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                warn!("Job semaphore closed, stopping poller");
                return;
            };

            match self.queue.dequeue().await {
                Ok(Some(job)) => {
                    self.spawn_job(job, permit);
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    drop(permit);
                    error!("Failed to dequeue job: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    fn spawn_job(&self, job: AtomJob, permit: OwnedSemaphorePermit) {
        let queue = Arc::clone(&self.queue);
        let execution = self.execution.clone();

        tokio::spawn(async move {
            handle_job(queue.as_ref(), &execution, &job).await;
            drop(permit);
        });
    }
}

/// Runs one job and acknowledges it
pub(crate) async fn handle_job(queue: &dyn JobQueue, execution: &ExecutionService, job: &AtomJob) {
    debug!(job_id = %job.id, task_id = job.task_id, "handling job");

    if let Err(e) = execution.run_job(job).await {
        error!(job_id = %job.id, task_id = job.task_id, "job failed: {}", e);
    }

    if let Err(e) = queue.ack(job.id).await {
        error!(job_id = %job.id, "failed to acknowledge job: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine, lua_url};
    use fluxion_core::domain::task::TaskStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_poller_runs_queued_jobs() {
        let engine = engine();
        let atom = engine
            .atoms()
            .create(
                "u1",
                fluxion_core::dto::atom::CreateAtom {
                    name: "inc".to_string(),
                    description: None,
                    connect_url: lua_url(
                        "return function(i) return { success = true, output = i + 1 } end",
                    ),
                    enabled: true,
                },
            )
            .await
            .unwrap();
        let task = engine.atoms().execute(atom.id, "u1", json!(1)).await.unwrap();

        let poller = engine.poller();
        let handle = tokio::spawn(async move { poller.run().await });

        let mut status = TaskStatus::Pending;
        for _ in 0..100 {
            status = engine.repos.tasks.get_by_id(task.id, "u1").await.unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert_eq!(status, TaskStatus::Succeed);
    }
}
