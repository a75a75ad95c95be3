//! Fluxion Scheduler
//!
//! The execution and routing engine and the process that hosts it:
//! - `repository`: persistence ports with in-memory and PostgreSQL stores
//! - `queue`: the durable job queue between scheduling and execution
//! - `worker`: atom executors and the scheme dispatcher
//! - `service`: task scheduling, job execution, pipeline routing and CRUD
//! - `scheduler`: the queue consumer loop
//! - `api`: the HTTP surface

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
