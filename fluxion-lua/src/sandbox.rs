//! Lua sandbox creation
//!
//! A sandbox is a fresh Lua state with only pure standard libraries loaded,
//! the code-loading globals removed, a memory ceiling, and a wall-clock
//! deadline enforced from an instruction hook. Script atoms get no file
//! system, process or network access; the helper modules registered here are
//! their only capabilities.

use mlua::{Function, HookTriggers, Lua, LuaOptions, Result as LuaResult, StdLib, VmState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::module::ModuleRegistry;
use crate::modules::{JsonModule, LogLevel, LogModule, LogSink};

/// Instructions between two deadline checks
const HOOK_INSTRUCTION_INTERVAL: u32 = 1_000;

/// Resource limits of a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub timeout: Duration,
    /// Memory ceiling in bytes
    pub memory_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            memory_limit: 64 * 1024 * 1024,
        }
    }
}

// Runs a coroutine to completion and returns its last value. Captures the
// coroutine functions before any script can replace them.
const SETTLE_SOURCE: &str = r#"
local status, resume = coroutine.status, coroutine.resume
return function(co)
    local last
    while status(co) == "suspended" do
        local ok, value = resume(co)
        if not ok then
            error(value, 0)
        end
        last = value
    end
    return last
end
"#;

// print(...) routed to the host log at debug level
const PRINT_SOURCE: &str = r##"
local sink, tostring, select, concat = ...
return function(...)
    local parts = {}
    for i = 1, select("#", ...) do
        parts[i] = tostring((select(i, ...)))
    end
    sink(concat(parts, "\t"))
end
"##;

pub struct Sandbox {
    lua: Lua,
    limits: SandboxLimits,
    timed_out: Arc<AtomicBool>,
    settle: Function,
}

impl Sandbox {
    /// Creates a restricted sandbox
    ///
    /// Loaded libraries: base, `string`, `table`, `math`, `utf8`,
    /// `coroutine`. `io`, `os`, `package` and `debug` are never loaded;
    /// `require`, `dofile`, `loadfile`, `load` and `collectgarbage` are removed.
    /// `log` and `json` are registered as globals.
    pub fn new(limits: SandboxLimits, sink: Arc<dyn LogSink>) -> LuaResult<Self> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE,
            LuaOptions::default(),
        )?;

        let globals = lua.globals();
        for name in ["require", "dofile", "loadfile", "load", "collectgarbage"] {
            globals.set(name, mlua::Nil)?;
        }

        let mut registry = ModuleRegistry::new();
        registry.register(LogModule::new(sink.clone()));
        registry.register(JsonModule);
        registry.register_all(&lua)?;

        let print_sink = lua.create_function(move |_, line: String| {
            sink.write(LogLevel::Debug, &line);
            Ok(())
        })?;
        let table_lib: mlua::Table = globals.get("table")?;
        let print: Function = lua.load(PRINT_SOURCE).set_name("=print").call((
            print_sink,
            globals.get::<Function>("tostring")?,
            globals.get::<Function>("select")?,
            table_lib.get::<Function>("concat")?,
        ))?;
        globals.set("print", print)?;

        let settle: Function = lua.load(SETTLE_SOURCE).set_name("=settle").call(())?;

        lua.set_memory_limit(limits.memory_limit)?;

        Ok(Self {
            lua,
            limits,
            timed_out: Arc::new(AtomicBool::new(false)),
            settle,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Starts the wall-clock deadline
    ///
    /// From now on, any Lua code running longer than the timeout is aborted
    /// with a runtime error and [`Sandbox::timed_out`] reports true.
    pub fn arm_deadline(&self) -> LuaResult<()> {
        let deadline = Instant::now() + self.limits.timeout;
        let timed_out = self.timed_out.clone();
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
            move |_, _| {
                if Instant::now() >= deadline {
                    timed_out.store(true, Ordering::SeqCst);
                    return Err(mlua::Error::RuntimeError(
                        "script exceeded its execution time limit".to_string(),
                    ));
                }
                Ok(VmState::Continue)
            },
        )
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Drives a coroutine until it finishes, returning its final value
    pub fn settle(&self, thread: mlua::Thread) -> LuaResult<mlua::Value> {
        self.settle.call(thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::log::tests::MemorySink;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxLimits::default(), Arc::new(MemorySink::default())).unwrap()
    }

    #[test]
    fn test_sandbox_basic_lua() {
        let sandbox = sandbox();
        let lua = sandbox.lua();

        let result: i32 = lua
            .load(
                r#"
                local t = {a = 1, b = 2}
                return t.a + t.b
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 3);

        let result: String = lua.load(r#"return string.upper("hello")"#).eval().unwrap();
        assert_eq!(result, "HELLO");

        let result: i64 = lua.load(r#"return utf8.len("héllo")"#).eval().unwrap();
        assert_eq!(result, 5);
    }

    #[test]
    fn test_sandbox_no_io() {
        let sandbox = sandbox();
        for name in ["io", "os", "package", "debug"] {
            let present: bool = sandbox
                .lua()
                .load(format!("return {} ~= nil", name))
                .eval()
                .unwrap();
            assert!(!present, "{} should not be available", name);
        }
    }

    #[test]
    fn test_sandbox_no_code_loading() {
        let sandbox = sandbox();
        for call in [
            r#"require("os")"#,
            r#"dofile("/etc/passwd")"#,
            r#"loadfile("/etc/passwd")"#,
            r#"load("return 1")"#,
            r#"collectgarbage()"#,
        ] {
            assert!(sandbox.lua().load(call).exec().is_err(), "{} should fail", call);
        }
    }

    #[test]
    fn test_sandbox_has_helper_modules() {
        let sandbox = sandbox();
        let present: bool = sandbox
            .lua()
            .load("return type(log.info) == 'function' and type(json.encode) == 'function'")
            .eval()
            .unwrap();
        assert!(present);
    }

    #[test]
    fn test_print_goes_to_sink() {
        let sink = Arc::new(MemorySink::default());
        let sandbox = Sandbox::new(SandboxLimits::default(), sink.clone()).unwrap();

        sandbox.lua().load(r#"print("a", 1, nil)"#).exec().unwrap();

        let lines = sink.lines.lock().unwrap();
        assert_eq!(*lines, vec![(LogLevel::Debug, "a\t1\tnil".to_string())]);
    }

    #[test]
    fn test_deadline_stops_infinite_loop() {
        let limits = SandboxLimits {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let sandbox = Sandbox::new(limits, Arc::new(MemorySink::default())).unwrap();
        sandbox.arm_deadline().unwrap();

        let result = sandbox.lua().load("while true do end").exec();
        assert!(result.is_err());
        assert!(sandbox.timed_out());
    }

    #[test]
    fn test_memory_ceiling() {
        let limits = SandboxLimits {
            memory_limit: 2 * 1024 * 1024,
            ..Default::default()
        };
        let sandbox = Sandbox::new(limits, Arc::new(MemorySink::default())).unwrap();

        let result = sandbox
            .lua()
            .load(
                r#"
                local t = {}
                for i = 1, 10000000 do
                    t[i] = string.rep("x", 64) .. i
                end
            "#,
            )
            .exec();
        assert!(matches!(result, Err(mlua::Error::MemoryError(_))));
    }

    #[test]
    fn test_settle_coroutine() {
        let sandbox = sandbox();
        let thread: mlua::Thread = sandbox
            .lua()
            .load(
                r#"
                return coroutine.create(function()
                    coroutine.yield(1)
                    return 2
                end)
            "#,
            )
            .eval()
            .unwrap();

        let value = sandbox.settle(thread).unwrap();
        assert_eq!(value, mlua::Value::Integer(2));
    }
}
