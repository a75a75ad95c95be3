//! Lifecycle Events
//!
//! An in-process event bus for `atom.execute.*` events. Handlers run inside
//! the emitting call, one after another in subscription order. The bus is
//! not durable and does not cross process boundaries; pipeline continuation
//! still goes through the job queue because the router only enqueues.

use async_trait::async_trait;
use fluxion_core::domain::worker::{ExecOptions, NextAtomOption};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Start,
    Success,
    Failed,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Start => "atom.execute.start",
            EventKind::Success => "atom.execute.success",
            EventKind::Failed => "atom.execute.failed",
        }
    }
}

/// Payload of every lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct AtomEvent {
    pub kind: EventKind,
    pub atom_id: i64,
    pub task_id: i64,
    pub owner_id: String,
    pub input: Value,
    /// `Null` for start events
    pub output: Value,
    pub next_atoms: Option<Vec<NextAtomOption>>,
    pub is_executed_by_pipeline: bool,
    pub pipeline_id: Option<i64>,
    pub pipeline_task_id: Option<i64>,
    pub pipeline_atom_id: Option<i64>,
    pub parent_atom_id: Option<i64>,
    pub parent_task_id: Option<i64>,
}

impl AtomEvent {
    pub fn new(
        kind: EventKind,
        atom_id: i64,
        task_id: i64,
        owner_id: impl Into<String>,
        options: &ExecOptions,
    ) -> Self {
        Self {
            kind,
            atom_id,
            task_id,
            owner_id: owner_id.into(),
            input: Value::Null,
            output: Value::Null,
            next_atoms: None,
            is_executed_by_pipeline: options.is_executed_by_pipeline(),
            pipeline_id: options.pipeline_id,
            pipeline_task_id: options.pipeline_task_id,
            pipeline_atom_id: options.pipeline_atom_id,
            parent_atom_id: options.parent_atom_id,
            parent_task_id: options.parent_task_id,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_next_atoms(mut self, next_atoms: Option<Vec<NextAtomOption>>) -> Self {
        self.next_atoms = next_atoms;
        self
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &AtomEvent) -> Result<()>;
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        tracing::debug!(event = kind.name(), handler = handler.name(), "handler subscribed");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Runs every handler subscribed to the event's kind
    ///
    /// Handler errors are logged and do not stop the remaining handlers.
    pub async fn emit(&self, event: &AtomEvent) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!(
                    event = event.kind.name(),
                    handler = handler.name(),
                    task_id = event.task_id,
                    "event handler failed: {}",
                    e
                );
            }
        }
    }
}

/// Writes every lifecycle event to the log
pub struct LifecycleLogger;

#[async_trait]
impl EventHandler for LifecycleLogger {
    fn name(&self) -> &str {
        "lifecycle-logger"
    }

    async fn handle(&self, event: &AtomEvent) -> Result<()> {
        match event.kind {
            EventKind::Start => tracing::info!(
                atom_id = event.atom_id,
                task_id = event.task_id,
                pipeline_task_id = ?event.pipeline_task_id,
                "{}",
                event.kind.name()
            ),
            EventKind::Success => tracing::info!(
                atom_id = event.atom_id,
                task_id = event.task_id,
                pipeline_task_id = ?event.pipeline_task_id,
                next_atoms = event.next_atoms.as_ref().map_or(0, Vec::len),
                "{}",
                event.kind.name()
            ),
            EventKind::Failed => tracing::warn!(
                atom_id = event.atom_id,
                task_id = event.task_id,
                pipeline_task_id = ?event.pipeline_task_id,
                output = %event.output,
                "{}",
                event.kind.name()
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn handle(&self, event: &AtomEvent) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, event.kind.name()));
            if self.fail {
                return Err(Error::InvalidState("boom".to_string()));
            }
            Ok(())
        }
    }

    fn event(kind: EventKind) -> AtomEvent {
        AtomEvent::new(kind, 1, 2, "u1", &ExecOptions::default())
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::Start.name(), "atom.execute.start");
        assert_eq!(EventKind::Success.name(), "atom.execute.success");
        assert_eq!(EventKind::Failed.name(), "atom.execute.failed");
    }

    #[tokio::test]
    async fn test_handlers_run_in_order_and_errors_do_not_stop_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            EventKind::Success,
            Arc::new(Recorder { label: "a", seen: seen.clone(), fail: true }),
        );
        bus.subscribe(
            EventKind::Success,
            Arc::new(Recorder { label: "b", seen: seen.clone(), fail: false }),
        );

        bus.emit(&event(EventKind::Success)).await;
        bus.emit(&event(EventKind::Failed)).await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["a:atom.execute.success", "b:atom.execute.success"]);
    }

    #[test]
    fn test_event_carries_pipeline_context() {
        let options = ExecOptions {
            pipeline_id: Some(3),
            pipeline_task_id: Some(4),
            pipeline_atom_id: Some(5),
            ..Default::default()
        };

        let event = AtomEvent::new(EventKind::Start, 1, 2, "u1", &options);

        assert!(event.is_executed_by_pipeline);
        assert_eq!(event.pipeline_atom_id, Some(5));
        assert_eq!(event.output, Value::Null);
    }
}
