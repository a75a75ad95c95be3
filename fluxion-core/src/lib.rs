//! Fluxion Core
//!
//! Core types and abstractions for the Fluxion orchestration engine.
//!
//! This crate contains:
//! - Domain types: Atoms, Pipelines and their execution records (Tasks)
//! - The worker wire contract (`WorkerResult`, `NextAtomOption`, `ExecOptions`)
//! - DTOs: request payloads, queue jobs and pagination
//! - Connection URL parsing shared by validation and dispatch

pub mod connect_url;
pub mod domain;
pub mod dto;

pub use connect_url::{ConnectUrl, ConnectUrlError};
