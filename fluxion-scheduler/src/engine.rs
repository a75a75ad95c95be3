//! Engine
//!
//! Wires repositories, queue, workers, event bus and services into one
//! graph. Both the HTTP API and the queue poller work on an `Engine`.

use anyhow::Context;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::events::{EventBus, EventKind, LifecycleLogger};
use crate::queue::{JobQueue, MemoryQueue, PgQueue};
use crate::repository::Repositories;
use crate::scheduler::QueuePoller;
use crate::scheduler::poller::handle_job;
use crate::service::{
    AtomLauncher, AtomService, ExecutionService, PipelineRouter, PipelineService, TaskService,
};
use crate::worker::Dispatcher;

#[derive(Clone)]
pub struct Engine {
    pub(crate) repos: Repositories,
    pub(crate) queue: Arc<dyn JobQueue>,
    launcher: AtomLauncher,
    pub(crate) execution: ExecutionService,
    events: Arc<EventBus>,
    atoms: AtomService,
    pipelines: PipelineService,
    tasks: TaskService,
    config: Config,
}

impl Engine {
    pub fn new(
        config: &Config,
        repos: Repositories,
        queue: Arc<dyn JobQueue>,
        dispatcher: Dispatcher,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let launcher = AtomLauncher::new(repos.clone(), queue.clone());

        let router = Arc::new(PipelineRouter::new(repos.clone(), launcher.clone()));
        events.subscribe(EventKind::Success, router);

        let logger = Arc::new(LifecycleLogger);
        events.subscribe(EventKind::Start, logger.clone());
        events.subscribe(EventKind::Success, logger.clone());
        events.subscribe(EventKind::Failed, logger);

        let execution = ExecutionService::new(
            repos.clone(),
            Arc::new(dispatcher),
            launcher.clone(),
            events.clone(),
        );

        Self {
            atoms: AtomService::new(repos.clone(), launcher.clone()),
            pipelines: PipelineService::new(repos.clone(), launcher.clone()),
            tasks: TaskService::new(repos.clone()),
            repos,
            queue,
            launcher,
            events,
            execution,
            config: config.clone(),
        }
    }

    /// Single-process engine on in-memory storage
    pub fn in_memory(config: &Config) -> anyhow::Result<Self> {
        let dispatcher = Dispatcher::standard(config).context("Failed to create workers")?;
        Ok(Self::new(
            config,
            Repositories::in_memory(),
            Arc::new(MemoryQueue::new()),
            dispatcher,
        ))
    }

    /// Engine on PostgreSQL when `DATABASE_URL` is set, in memory otherwise
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let Some(database_url) = &config.database_url else {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            return Self::in_memory(config);
        };

        tracing::info!("Connecting to database...");
        let pool = db::create_pool(database_url)
            .await
            .context("Failed to create database pool")?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        let dispatcher = Dispatcher::standard(config).context("Failed to create workers")?;
        Ok(Self::new(
            config,
            Repositories::postgres(pool.clone()),
            Arc::new(PgQueue::new(pool)),
            dispatcher,
        ))
    }

    pub fn launcher(&self) -> &AtomLauncher {
        &self.launcher
    }

    pub fn atoms(&self) -> &AtomService {
        &self.atoms
    }

    pub fn pipelines(&self) -> &PipelineService {
        &self.pipelines
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn poller(&self) -> QueuePoller {
        QueuePoller::new(
            self.queue.clone(),
            self.execution.clone(),
            self.config.max_parallel_jobs,
            self.config.poll_interval,
        )
    }

    /// Runs queued jobs one by one until the queue is empty, including the
    /// jobs they schedule; returns how many ran
    pub async fn drain_queue(&self) -> Result<usize> {
        let mut handled = 0;
        while let Some(job) = self.queue.dequeue().await? {
            handle_job(self.queue.as_ref(), &self.execution, &job).await;
            handled += 1;
        }
        Ok(handled)
    }
}
