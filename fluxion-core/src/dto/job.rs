//! Queue job payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::worker::ExecOptions;

/// Topic atom executions are queued on
pub const QUEUE_TOPIC: &str = "atom-task";

/// One queued atom execution
///
/// Everything the consumer needs to run the task without the caller around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomJob {
    pub id: Uuid,
    pub atom_id: i64,
    pub connect_url: String,
    pub task_id: i64,
    pub owner_id: String,
    pub input: Value,
    pub options: ExecOptions,
    pub enqueued_at: DateTime<Utc>,
}

impl AtomJob {
    pub fn new(
        atom_id: i64,
        connect_url: impl Into<String>,
        task_id: i64,
        owner_id: impl Into<String>,
        input: Value,
        options: ExecOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            atom_id,
            connect_url: connect_url.into(),
            task_id,
            owner_id: owner_id.into(),
            input,
            options,
            enqueued_at: Utc::now(),
        }
    }
}
