//! Entry-point invocation
//!
//! A script atom's source is a Lua chunk that returns its entry point:
//!
//! ```lua
//! return function(input, options, api)
//!     return { success = true, output = input + 1 }
//! end
//! ```
//!
//! The entry point may return a `WorkerResult`-shaped table directly or a
//! coroutine that eventually returns one.

use fluxion_core::domain::worker::{ExecOptions, WorkerResult};
use mlua::{ChunkMode, LuaSerdeExt, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::modules::LogSink;
use crate::modules::api::create_api;
use crate::sandbox::{Sandbox, SandboxLimits};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("sandbox setup failed: {0}")]
    Setup(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("script must return a function, got {0}")]
    NotCallable(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("script timed out after {0:?}")]
    Timeout(Duration),

    #[error("script exceeded its memory limit")]
    MemoryLimit,

    #[error("invalid result: {0}")]
    InvalidResult(String),
}

impl ScriptError {
    /// Whether the script broke its contract rather than failing at runtime
    pub fn is_validation(&self) -> bool {
        matches!(self, ScriptError::NotCallable(_) | ScriptError::InvalidResult(_))
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;

/// Runs script atoms, one fresh sandbox per run
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptRunner {
    limits: SandboxLimits,
}

impl ScriptRunner {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Loads `source`, calls its entry point with `(input, options, api)` and
    /// validates what comes back
    ///
    /// Blocks for up to the configured timeout; call it from a blocking
    /// context when running on an async runtime.
    pub fn run(
        &self,
        source: &str,
        input: &serde_json::Value,
        options: &ExecOptions,
        sink: Arc<dyn LogSink>,
    ) -> Result<WorkerResult> {
        let sandbox =
            Sandbox::new(self.limits, sink).map_err(|e| ScriptError::Setup(e.to_string()))?;
        let lua = sandbox.lua();

        let chunk = lua
            .load(source)
            .set_name("=atom")
            .set_mode(ChunkMode::Text)
            .into_function()
            .map_err(|e| classify(&sandbox, e))?;

        let input = match input {
            serde_json::Value::Null => Value::Nil,
            other => lua.to_value(other).map_err(|e| classify(&sandbox, e))?,
        };
        let options = lua.to_value(options).map_err(|e| classify(&sandbox, e))?;
        let api = create_api(lua).map_err(|e| ScriptError::Setup(e.to_string()))?;

        sandbox
            .arm_deadline()
            .map_err(|e| ScriptError::Setup(e.to_string()))?;

        let entry = match chunk.call::<Value>(()).map_err(|e| classify(&sandbox, e))? {
            Value::Function(entry) => entry,
            other => return Err(ScriptError::NotCallable(other.type_name().to_string())),
        };

        let value = entry
            .call::<Value>((input, options, api))
            .map_err(|e| classify(&sandbox, e))?;

        let value = match value {
            Value::Thread(thread) => sandbox.settle(thread).map_err(|e| classify(&sandbox, e))?,
            other => other,
        };

        into_worker_result(&sandbox, value)
    }
}

fn into_worker_result(sandbox: &Sandbox, value: Value) -> Result<WorkerResult> {
    if !matches!(value, Value::Table(_)) {
        return Err(ScriptError::InvalidResult(format!(
            "expected a table, got {}",
            value.type_name()
        )));
    }

    let mut json: serde_json::Value = sandbox
        .lua()
        .from_value(value)
        .map_err(|e| ScriptError::InvalidResult(e.to_string()))?;

    // An empty Lua table reads as an object
    if let Some(next_atoms) = json.get_mut("nextAtoms")
        && next_atoms.as_object().is_some_and(|o| o.is_empty())
    {
        *next_atoms = serde_json::Value::Array(Vec::new());
    }

    let result: WorkerResult =
        serde_json::from_value(json).map_err(|e| ScriptError::InvalidResult(e.to_string()))?;
    result.validate().map_err(ScriptError::InvalidResult)?;
    Ok(result)
}

fn classify(sandbox: &Sandbox, err: mlua::Error) -> ScriptError {
    if sandbox.timed_out() {
        return ScriptError::Timeout(sandbox.limits().timeout);
    }
    classify_error(err)
}

fn classify_error(err: mlua::Error) -> ScriptError {
    match err {
        mlua::Error::SyntaxError { message, .. } => ScriptError::Syntax(message),
        mlua::Error::MemoryError(_) => ScriptError::MemoryLimit,
        mlua::Error::CallbackError { cause, .. } => classify_error((*cause).clone()),
        other => ScriptError::Runtime(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::LogLevel;
    use crate::modules::log::tests::MemorySink;
    use fluxion_core::domain::worker::{AtomRef, NextAtomOption};
    use serde_json::json;

    fn run(source: &str, input: serde_json::Value) -> Result<WorkerResult> {
        ScriptRunner::default().run(
            source,
            &input,
            &ExecOptions::for_user("u1"),
            Arc::new(MemorySink::default()),
        )
    }

    #[test]
    fn test_increment() {
        let result = run(
            "return function(i) return { success = true, output = i + 1 } end",
            json!(1),
        )
        .unwrap();
        assert!(result.success);
        assert_eq!(result.output, json!(2));
        assert!(result.next_atoms.is_none());
    }

    #[test]
    fn test_reported_failure_is_still_a_result() {
        let result = run("return function(i) return { success = false } end", json!(1)).unwrap();
        assert!(!result.success);
        assert_eq!(result.output, json!(null));
    }

    #[test]
    fn test_options_are_visible() {
        let result = run(
            "return function(i, options) return { success = true, output = options.userId } end",
            json!(null),
        )
        .unwrap();
        assert_eq!(result.output, json!("u1"));
    }

    #[test]
    fn test_api_helpers() {
        let result = run(
            r#"
            return function(input, options, api)
                return api.createResult({ doubled = input.n * 2 }, {
                    api.triggerNextAtom(4, { n = 1 }),
                    api.triggerNextAtom("notify", nil, true),
                })
            end
        "#,
            json!({"n": 21}),
        )
        .unwrap();

        assert!(result.success);
        assert_eq!(result.output, json!({"doubled": 42}));

        let hints = result.next_atoms.unwrap();
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[0].target(), Some(AtomRef::Id(4)));
        assert_eq!(hints[0].input, Some(json!({"n": 1})));
        assert_eq!(hints[1], NextAtomOption::by_name("notify").only());
    }

    #[test]
    fn test_empty_next_atoms_table() {
        let result = run(
            "return function(i, o, api) return api.createResult(i, {}) end",
            json!("x"),
        )
        .unwrap();
        assert_eq!(result.next_atoms, Some(vec![]));
    }

    #[test]
    fn test_coroutine_result() {
        let result = run(
            r#"
            return function(input)
                return coroutine.create(function()
                    coroutine.yield()
                    return { success = true, output = input .. "!" }
                end)
            end
        "#,
            json!("hi"),
        )
        .unwrap();
        assert_eq!(result.output, json!("hi!"));
    }

    #[test]
    fn test_non_function_export() {
        let err = run("return { success = true }", json!(1)).unwrap_err();
        assert!(matches!(err, ScriptError::NotCallable(ref t) if t == "table"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_syntax_error() {
        let err = run("return function(", json!(1)).unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)));
    }

    #[test]
    fn test_runtime_error() {
        let err = run("return function() error('boom') end", json!(1)).unwrap_err();
        match err {
            ScriptError::Runtime(message) => assert!(message.contains("boom")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_shapes() {
        for source in [
            "return function() return 42 end",
            "return function() return { output = 1 } end",
            "return function() return { success = 'yes' } end",
            "return function() return { success = true, nextAtoms = { { only = true } } } end",
            "return function() return { success = true, output = print } end",
        ] {
            let err = run(source, json!(null)).unwrap_err();
            assert!(
                matches!(err, ScriptError::InvalidResult(_)),
                "{}: {:?}",
                source,
                err
            );
        }
    }

    #[test]
    fn test_timeout() {
        let runner = ScriptRunner::new(SandboxLimits {
            timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let err = runner
            .run(
                "return function() while true do end end",
                &json!(null),
                &ExecOptions::default(),
                Arc::new(MemorySink::default()),
            )
            .unwrap_err();
        assert!(matches!(err, ScriptError::Timeout(_)));
    }

    #[test]
    fn test_script_logs_reach_sink() {
        let sink = Arc::new(MemorySink::default());
        ScriptRunner::default()
            .run(
                r#"return function(i) log.info("got " .. i) return { success = true } end"#,
                &json!(3),
                &ExecOptions::default(),
                sink.clone(),
            )
            .unwrap();

        let lines = sink.lines.lock().unwrap();
        assert_eq!(*lines, vec![(LogLevel::Info, "got 3".to_string())]);
    }
}
