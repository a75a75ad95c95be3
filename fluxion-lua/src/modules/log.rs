//! Logging module for sandboxed scripts
//!
//! Script logs go through a [`LogSink`] so the host decides where they end
//! up. The worker uses [`TracingSink`], tests collect them in memory.

use crate::module::SandboxModule;
use mlua::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

const SCRIPT_TARGET: &str = "fluxion::script";

/// Destination of script log lines
pub trait LogSink: Send + Sync {
    fn write(&self, level: LogLevel, message: &str);
}

/// Forwards script logs to `tracing`, tagged with the script's origin
pub struct TracingSink {
    source: String,
}

impl TracingSink {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn write(&self, level: LogLevel, message: &str) {
        let source = self.source.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(target: SCRIPT_TARGET, source, "{}", message),
            LogLevel::Info => tracing::info!(target: SCRIPT_TARGET, source, "{}", message),
            LogLevel::Warn => tracing::warn!(target: SCRIPT_TARGET, source, "{}", message),
            LogLevel::Error => tracing::error!(target: SCRIPT_TARGET, source, "{}", message),
        }
    }
}

pub struct LogModule {
    sink: Arc<dyn LogSink>,
}

impl LogModule {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl SandboxModule for LogModule {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        for (name, level) in [
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warn", LogLevel::Warn),
            ("error", LogLevel::Error),
        ] {
            let sink = self.sink.clone();
            log_table.set(
                name,
                lua.create_function(move |_, msg: String| {
                    sink.write(level, &msg);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub(crate) lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl LogSink for MemorySink {
        fn write(&self, level: LogLevel, message: &str) {
            self.lines.lock().unwrap().push((level, message.to_string()));
        }
    }

    #[test]
    fn test_log_all_levels() {
        let sink = Arc::new(MemorySink::default());
        let lua = Lua::new();
        LogModule::new(sink.clone()).register(&lua).unwrap();

        lua.load(
            r#"
            log.debug("d")
            log.info("i")
            log.warn("w")
            log.error("e")
        "#,
        )
        .exec()
        .unwrap();

        let lines = sink.lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                (LogLevel::Debug, "d".to_string()),
                (LogLevel::Info, "i".to_string()),
                (LogLevel::Warn, "w".to_string()),
                (LogLevel::Error, "e".to_string()),
            ]
        );
    }

    #[test]
    fn test_non_string_message_is_an_error() {
        let lua = Lua::new();
        LogModule::new(Arc::new(MemorySink::default()))
            .register(&lua)
            .unwrap();

        assert!(lua.load("log.info({})").exec().is_err());
    }
}
