//! In-process queue

use async_trait::async_trait;
use fluxion_core::dto::job::AtomJob;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::JobQueue;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    pending: VecDeque<AtomJob>,
    in_flight: HashMap<Uuid, AtomJob>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: AtomJob) -> Result<()> {
        tracing::debug!(job_id = %job.id, task_id = job.task_id, "job enqueued");
        self.lock().pending.push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<AtomJob>> {
        let mut state = self.lock();
        let Some(job) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        self.lock().in_flight.remove(&job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxion_core::domain::worker::ExecOptions;
    use serde_json::json;

    fn job(task_id: i64) -> AtomJob {
        AtomJob::new(1, "https://example.com", task_id, "u1", json!(null), ExecOptions::default())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        queue.enqueue(job(1)).await.unwrap();
        queue.enqueue(job(2)).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().task_id, 1);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().task_id, 2);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ack_clears_in_flight() {
        let queue = MemoryQueue::new();
        queue.enqueue(job(1)).await.unwrap();

        let taken = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.in_flight_len(), 1);

        queue.ack(taken.id).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
    }
}
