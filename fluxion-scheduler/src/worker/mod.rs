//! Atom Workers
//!
//! A worker knows how to run atoms of one or more connection URL schemes.
//! Workers never return errors for atom-level failures: a failed call, a bad
//! response or a broken script all come back as `success: false`.

pub mod dispatcher;
pub mod http;
pub mod sandbox;

use async_trait::async_trait;
use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::worker::{ExecOptions, WorkerResult};
use serde_json::Value;

pub use dispatcher::Dispatcher;
pub use http::HttpWorker;
pub use sandbox::SandboxWorker;

#[async_trait]
pub trait AtomWorker: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, atom: &Atom, input: Value, options: &ExecOptions) -> WorkerResult;
}
