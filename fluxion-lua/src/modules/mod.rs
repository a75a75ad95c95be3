//! Modules available to sandboxed scripts
//!
//! `log` and `json` are registered as globals in every sandbox. `api` is not
//! a global: it is built per invocation and passed to the entry point.

pub mod api;
pub mod json;
pub mod log;

pub use json::JsonModule;
pub use log::{LogLevel, LogModule, LogSink, TracingSink};
