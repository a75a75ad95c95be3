//! Fluxion JavaScript Infrastructure
//!
//! Runs `js-code` script atoms on an embedded QuickJS runtime. The source
//! assigns its entry point to `module.exports`; the runner calls it with
//! `(input, options, api)` and settles a returned promise.
//!
//! Limits, log sinks and error kinds are shared with the Lua sandbox so both
//! script schemes fail the same way.

pub mod script;

pub use script::JsRunner;
