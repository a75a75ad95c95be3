//! Job Queue
//!
//! Scheduling an atom puts an [`AtomJob`] on the queue; the poller takes it
//! off and hands it to the execution service. Delivery is at-least-once: a
//! job is only removed once it has been acknowledged, and the execution
//! service tolerates seeing the same job twice.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use fluxion_core::dto::job::AtomJob;
use uuid::Uuid;

use crate::error::Result;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: AtomJob) -> Result<()>;

    /// Takes the oldest pending job, if any, and marks it in flight
    async fn dequeue(&self) -> Result<Option<AtomJob>>;

    /// Removes an in-flight job for good
    async fn ack(&self, job_id: Uuid) -> Result<()>;
}
