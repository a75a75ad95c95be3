//! Script worker
//!
//! Runs script atoms whose connection URL carries base64 source in its host:
//! `js-code://` on QuickJS and `lua-code://` on Lua. The script runs on the
//! blocking pool; the interpreter enforces its own deadline and a runtime
//! timeout backs it up in case it is stuck outside script code.

use async_trait::async_trait;
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use fluxion_core::ConnectUrl;
use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::worker::{ExecOptions, WorkerResult};
use fluxion_js::JsRunner;
use fluxion_lua::{LogSink, SandboxLimits, ScriptError, ScriptRunner, TracingSink};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::AtomWorker;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Extra time granted past the sandbox deadline before giving up on it
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Interpreter behind a script scheme
#[derive(Debug, Clone, Copy)]
enum Interpreter {
    Js(JsRunner),
    Lua(ScriptRunner),
}

impl Interpreter {
    fn limits(&self) -> SandboxLimits {
        match self {
            Interpreter::Js(runner) => runner.limits(),
            Interpreter::Lua(runner) => runner.limits(),
        }
    }

    fn run(
        &self,
        source: &str,
        input: &Value,
        options: &ExecOptions,
        sink: Arc<dyn LogSink>,
    ) -> Result<WorkerResult, ScriptError> {
        match self {
            Interpreter::Js(runner) => runner.run(source, input, options, sink),
            Interpreter::Lua(runner) => runner.run(source, input, options, sink),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SandboxWorker {
    interpreter: Interpreter,
}

impl SandboxWorker {
    /// Worker for `js-code` atoms
    pub fn js(limits: SandboxLimits) -> Self {
        Self {
            interpreter: Interpreter::Js(JsRunner::new(limits)),
        }
    }

    /// Worker for `lua-code` atoms
    pub fn lua(limits: SandboxLimits) -> Self {
        Self {
            interpreter: Interpreter::Lua(ScriptRunner::new(limits)),
        }
    }
}

/// Script source embedded in a script atom URL
pub fn decode_source(connect_url: &str) -> Result<String, String> {
    let url = ConnectUrl::parse(connect_url).map_err(|e| e.to_string())?;

    let bytes = URL_SAFE_LENIENT
        .decode(&url.host)
        .or_else(|_| STANDARD_LENIENT.decode(&url.host))
        .map_err(|e| format!("script source is not valid base64: {}", e))?;

    String::from_utf8(bytes).map_err(|_| "script source is not valid UTF-8".to_string())
}

#[async_trait]
impl AtomWorker for SandboxWorker {
    fn name(&self) -> &str {
        match self.interpreter {
            Interpreter::Js(_) => "js-code",
            Interpreter::Lua(_) => "lua-code",
        }
    }

    async fn execute(&self, atom: &Atom, input: Value, options: &ExecOptions) -> WorkerResult {
        let source = match decode_source(&atom.connect_url) {
            Ok(source) => source,
            Err(message) => {
                tracing::warn!(atom_id = atom.id, "script atom rejected: {}", message);
                return WorkerResult::failure(message);
            }
        };

        let interpreter = self.interpreter;
        let options = options.clone();
        let sink: Arc<dyn LogSink> = Arc::new(TracingSink::new(format!("atom:{}", atom.id)));
        let budget = interpreter.limits().timeout + TIMEOUT_GRACE;

        let run =
            tokio::task::spawn_blocking(move || interpreter.run(&source, &input, &options, sink));

        match tokio::time::timeout(budget, run).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                tracing::warn!(
                    atom_id = atom.id,
                    validation = e.is_validation(),
                    "script atom failed: {}",
                    e
                );
                WorkerResult::failure(e.to_string())
            }
            Ok(Err(join_error)) => {
                tracing::error!(atom_id = atom.id, "script task aborted: {}", join_error);
                WorkerResult::failure(format!("script aborted: {}", join_error))
            }
            Err(_) => {
                tracing::warn!(atom_id = atom.id, "script atom exceeded {:?}", budget);
                WorkerResult::failure(format!("script timed out after {:?}", budget))
            }
        }
    }
}
