//! Entry-point invocation
//!
//! A `js-code` atom's source assigns its entry point to `module.exports`:
//!
//! ```js
//! module.exports = (input, options, api) => ({ success: true, output: input + 1 })
//! ```
//!
//! The entry point may return a `WorkerResult`-shaped object or a promise of
//! one. Each run gets a fresh QuickJS runtime with a memory ceiling and an
//! interrupt handler enforcing the wall-clock deadline. QuickJS has no file,
//! process or network bindings of its own; `console` and `api` are the only
//! host capabilities.

use fluxion_core::domain::worker::{ExecOptions, WorkerResult};
use fluxion_lua::{LogLevel, LogSink, SandboxLimits, ScriptError};
use rquickjs::{Context, Ctx, Function, Object, Runtime, Type, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub type Result<T> = std::result::Result<T, ScriptError>;

/// Native stack available to scripts
const MAX_STACK_SIZE: usize = 512 * 1024;

// Installs `module`, `exports` and `console`, then evaluates to the frozen
// `api` object. Called with the host log function.
const PRELUDE_SOURCE: &str = r#"
(function (hostLog) {
    const format = (args) => args
        .map((arg) => (typeof arg === "string" ? arg : (JSON.stringify(arg) ?? String(arg))))
        .join(" ");

    const console = {};
    for (const level of ["debug", "info", "warn", "error"]) {
        console[level] = (...args) => hostLog(level, format(args));
    }
    console.log = console.debug;
    globalThis.console = Object.freeze(console);

    globalThis.module = { exports: {} };
    globalThis.exports = globalThis.module.exports;

    return Object.freeze({
        createResult(...args) {
            if (args.length >= 2 && typeof args[0] === "boolean") {
                return { success: args[0], output: args[1], nextAtoms: args[2] };
            }
            return { success: true, output: args[0], nextAtoms: args[1] };
        },

        triggerNextAtom(target, input, only) {
            const option = {};
            if (Number.isInteger(target)) {
                option.atomId = target;
            } else if (typeof target === "string") {
                option.atomName = target;
            } else {
                throw new TypeError(
                    "triggerNextAtom: expected an atom id or name, got " + typeof target);
            }
            if (input !== undefined && input !== null) {
                option.input = input;
            }
            if (only === true) {
                option.only = true;
            }
            return option;
        },
    });
})
"#;

/// Runs `js-code` atoms, one fresh runtime per run
#[derive(Debug, Clone, Copy, Default)]
pub struct JsRunner {
    limits: SandboxLimits,
}

impl JsRunner {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Evaluates `source`, calls `module.exports` with `(input, options, api)`
    /// and validates what comes back
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
        let input = serde_json::to_string(input).map_err(|e| ScriptError::Setup(e.to_string()))?;
        let options =
            serde_json::to_string(options).map_err(|e| ScriptError::Setup(e.to_string()))?;

        let runtime = Runtime::new().map_err(setup)?;
        runtime.set_memory_limit(self.limits.memory_limit);
        runtime.set_max_stack_size(MAX_STACK_SIZE);
        let context = Context::full(&runtime).map_err(setup)?;

        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline = Instant::now() + self.limits.timeout;
        let flag = timed_out.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            let expired = Instant::now() >= deadline;
            if expired {
                flag.store(true, Ordering::SeqCst);
            }
            expired
        })));

        let run = Run {
            limits: self.limits,
            timed_out: &timed_out,
        };
        context.with(|ctx| run.call(&ctx, source, input, options, sink))
    }
}

/// State of one run, used to classify failures
struct Run<'a> {
    limits: SandboxLimits,
    timed_out: &'a AtomicBool,
}

impl Run<'_> {
    fn call<'js>(
        &self,
        ctx: &Ctx<'js>,
        source: &str,
        input: String,
        options: String,
        sink: Arc<dyn LogSink>,
    ) -> Result<WorkerResult> {
        let host_log = Function::new(ctx.clone(), move |level: String, message: String| {
            sink.write(parse_level(&level), &message);
        })
        .map_err(setup)?;
        let prelude: Function = ctx.eval(PRELUDE_SOURCE).map_err(setup)?;
        let api: Object = prelude.call((host_log,)).map_err(setup)?;

        ctx.eval::<Value, _>(source)
            .map_err(|e| self.classify(ctx, e, true))?;

        let module: Object = ctx
            .globals()
            .get("module")
            .map_err(|e| self.classify(ctx, e, false))?;
        let entry: Value = module
            .get("exports")
            .map_err(|e| self.classify(ctx, e, false))?;
        let Some(entry) = entry.as_function() else {
            return Err(ScriptError::NotCallable(entry.type_name().to_string()));
        };

        let input = ctx.json_parse(input).map_err(setup)?;
        let options = ctx.json_parse(options).map_err(setup)?;

        let value: Value = entry
            .call((input, options, api))
            .map_err(|e| self.classify(ctx, e, false))?;

        let promise = value.as_promise().cloned();
        let value = match promise {
            Some(promise) => promise
                .finish::<Value>()
                .map_err(|e| self.classify(ctx, e, false))?,
            None => value,
        };

        into_worker_result(ctx, value)
    }

    fn classify(&self, ctx: &Ctx<'_>, err: rquickjs::Error, loading: bool) -> ScriptError {
        if self.timed_out.load(Ordering::SeqCst) {
            return ScriptError::Timeout(self.limits.timeout);
        }

        match err {
            rquickjs::Error::Exception => {
                let (name, message) = describe(&ctx.catch());
                if message.contains("out of memory") {
                    ScriptError::MemoryLimit
                } else if loading && name.as_deref() == Some("SyntaxError") {
                    ScriptError::Syntax(message)
                } else {
                    match name {
                        Some(name) => ScriptError::Runtime(format!("{}: {}", name, message)),
                        None => ScriptError::Runtime(message),
                    }
                }
            }
            rquickjs::Error::Allocation => ScriptError::MemoryLimit,
            other => ScriptError::Runtime(other.to_string()),
        }
    }
}

fn into_worker_result<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<WorkerResult> {
    if value.type_of() != Type::Object {
        return Err(ScriptError::InvalidResult(format!(
            "expected an object, got {}",
            value.type_name()
        )));
    }

    let json = ctx
        .json_stringify(value)
        .map_err(|e| ScriptError::InvalidResult(e.to_string()))?
        .ok_or_else(|| ScriptError::InvalidResult("result is not serializable".to_string()))?
        .to_string()
        .map_err(|e| ScriptError::InvalidResult(e.to_string()))?;

    let result: WorkerResult =
        serde_json::from_str(&json).map_err(|e| ScriptError::InvalidResult(e.to_string()))?;
    result.validate().map_err(ScriptError::InvalidResult)?;
    Ok(result)
}

/// Name and message of a thrown value
fn describe(thrown: &Value<'_>) -> (Option<String>, String) {
    if let Some(object) = thrown.as_object() {
        let name = object.get::<_, Option<String>>("name").ok().flatten();
        let message = object
            .get::<_, Option<String>>("message")
            .ok()
            .flatten()
            .unwrap_or_default();
        return (name, message);
    }

    match thrown.as_string().and_then(|s| s.to_string().ok()) {
        Some(message) => (None, message),
        None => (None, format!("thrown {}", thrown.type_name())),
    }
}

fn parse_level(level: &str) -> LogLevel {
    match level {
        "info" => LogLevel::Info,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Debug,
    }
}

fn setup(err: rquickjs::Error) -> ScriptError {
    ScriptError::Setup(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxion_core::domain::worker::{AtomRef, NextAtomOption};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemorySink {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl LogSink for MemorySink {
        fn write(&self, level: LogLevel, message: &str) {
            self.lines.lock().unwrap().push((level, message.to_string()));
        }
    }

    fn run(source: &str, input: serde_json::Value) -> Result<WorkerResult> {
        JsRunner::default().run(
            source,
            &input,
            &ExecOptions::for_user("u1"),
            Arc::new(MemorySink::default()),
        )
    }

    #[test]
    fn test_increment() {
        let result = run("module.exports = (i)=>({success:true, output:i+1})", json!(1)).unwrap();
        assert!(result.success);
        assert_eq!(result.output, json!(2));
        assert!(result.next_atoms.is_none());
    }

    #[test]
    fn test_reported_failure_is_still_a_result() {
        let result = run("module.exports = (input) => ({success:false})", json!(1)).unwrap();
        assert!(!result.success);
        assert_eq!(result.output, json!(null));
    }

    #[test]
    fn test_options_are_visible() {
        let result = run(
            "module.exports = (i, options) => ({ success: true, output: options.userId })",
            json!(null),
        )
        .unwrap();
        assert_eq!(result.output, json!("u1"));
    }

    #[test]
    fn test_api_helpers() {
        let result = run(
            r#"
            module.exports = function (input, options, api) {
                return api.createResult({ doubled: input.n * 2 }, [
                    api.triggerNextAtom(4, { n: 1 }),
                    api.triggerNextAtom("notify", undefined, true),
                ]);
            };
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
    fn test_create_result_with_success_flag() {
        let result = run(
            "module.exports = (i, o, api) => api.createResult(false, 'bad')",
            json!(null),
        )
        .unwrap();
        assert!(!result.success);
        assert_eq!(result.output, json!("bad"));
    }

    #[test]
    fn test_exports_property_assignment() {
        let result = run(
            "exports.answer = 42; module.exports = () => ({ success: true, output: exports.answer })",
            json!(null),
        )
        .unwrap();
        assert_eq!(result.output, json!(42));
    }

    #[test]
    fn test_async_entry_point() {
        let result = run(
            "module.exports = async (i) => ({ success: true, output: i * 2 })",
            json!(21),
        )
        .unwrap();
        assert_eq!(result.output, json!(42));
    }

    #[test]
    fn test_promise_chain() {
        let result = run(
            r#"module.exports = (i) => Promise.resolve(i).then((v) => ({ success: true, output: v + "!" }))"#,
            json!("hi"),
        )
        .unwrap();
        assert_eq!(result.output, json!("hi!"));
    }

    #[test]
    fn test_rejected_promise() {
        let err = run(
            "module.exports = async () => { throw new Error('nope') }",
            json!(null),
        )
        .unwrap_err();
        match err {
            ScriptError::Runtime(message) => assert!(message.contains("nope"), "{}", message),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_function_export() {
        for source in ["module.exports = { success: true }", "var x = 1"] {
            let err = run(source, json!(1)).unwrap_err();
            assert!(matches!(err, ScriptError::NotCallable(ref t) if t == "object"), "{:?}", err);
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_syntax_error() {
        let err = run("module.exports = (", json!(1)).unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)), "{:?}", err);
    }

    #[test]
    fn test_runtime_error() {
        let err = run(
            "module.exports = () => { throw new Error('boom') }",
            json!(1),
        )
        .unwrap_err();
        match err {
            ScriptError::Runtime(message) => assert!(message.contains("boom")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_shapes() {
        for source in [
            "module.exports = () => 42",
            "module.exports = () => [1, 2]",
            "module.exports = () => ({ output: 1 })",
            "module.exports = () => ({ success: 'yes' })",
            "module.exports = () => ({ success: true, nextAtoms: [{ only: true }] })",
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
        let runner = JsRunner::new(SandboxLimits {
            timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let err = runner
            .run(
                "module.exports = () => { while (true) {} }",
                &json!(null),
                &ExecOptions::default(),
                Arc::new(MemorySink::default()),
            )
            .unwrap_err();
        assert!(matches!(err, ScriptError::Timeout(_)), "{:?}", err);
    }

    #[test]
    fn test_no_host_bindings() {
        let result = run(
            r#"
            module.exports = () => ({
                success: true,
                output: [typeof require, typeof process, typeof std, typeof os, typeof fetch].join(","),
            })
        "#,
            json!(null),
        )
        .unwrap();
        assert_eq!(
            result.output,
            json!("undefined,undefined,undefined,undefined,undefined")
        );
    }

    #[test]
    fn test_console_reaches_sink() {
        let sink = Arc::new(MemorySink::default());
        JsRunner::default()
            .run(
                r#"module.exports = (i) => { console.info("got", i); console.log({ a: 1 }); return { success: true } }"#,
                &json!(3),
                &ExecOptions::default(),
                sink.clone(),
            )
            .unwrap();

        let lines = sink.lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                (LogLevel::Info, "got 3".to_string()),
                (LogLevel::Debug, r#"{"a":1}"#.to_string()),
            ]
        );
    }
}
