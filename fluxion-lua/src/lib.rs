//! Fluxion Lua Infrastructure
//!
//! Sandboxed execution of script atoms. It includes:
//! - A restricted Lua sandbox with wall-clock and memory limits
//! - Module trait and registry for the helper modules scripts may use
//! - The `api` object handed to every entry point
//! - Entry-point invocation and validation of the returned `WorkerResult`

pub mod module;
pub mod modules;
pub mod sandbox;
pub mod script;

pub use module::{ModuleRegistry, SandboxModule};
pub use modules::{JsonModule, LogLevel, LogModule, LogSink, TracingSink};
pub use sandbox::{Sandbox, SandboxLimits};
pub use script::{ScriptError, ScriptRunner};
