//! Scheme dispatcher
//!
//! Maps the scheme of a connection URL to the worker that runs it.

use fluxion_core::ConnectUrl;
use std::collections::HashMap;
use std::sync::Arc;

use super::{AtomWorker, HttpWorker, SandboxWorker};
use crate::config::Config;
use crate::error::{Error, Result};

pub const HTTP_SCHEME: &str = "http";
pub const HTTPS_SCHEME: &str = "https";
pub const JS_SCHEME: &str = "js-code";
pub const LUA_SCHEME: &str = "lua-code";

#[derive(Default, Clone)]
pub struct Dispatcher {
    workers: HashMap<String, Arc<dyn AtomWorker>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Webhook worker for `http`/`https`, script sandboxes for `js-code`
    /// and `lua-code`
    pub fn standard(config: &Config) -> anyhow::Result<Self> {
        let http: Arc<dyn AtomWorker> = Arc::new(HttpWorker::new(config.webhook_timeout)?);
        let js: Arc<dyn AtomWorker> = Arc::new(SandboxWorker::js(config.sandbox_limits()));
        let lua: Arc<dyn AtomWorker> = Arc::new(SandboxWorker::lua(config.sandbox_limits()));

        let mut dispatcher = Self::new();
        dispatcher.register(HTTP_SCHEME, http.clone());
        dispatcher.register(HTTPS_SCHEME, http);
        dispatcher.register(JS_SCHEME, js);
        dispatcher.register(LUA_SCHEME, lua);
        Ok(dispatcher)
    }

    /// Registers `worker` for `scheme`, replacing any previous one
    pub fn register(&mut self, scheme: &str, worker: Arc<dyn AtomWorker>) {
        self.workers.insert(scheme.to_ascii_lowercase(), worker);
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.workers.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Worker for `connect_url`
    ///
    /// A malformed URL is a validation error; a well-formed URL with an
    /// unregistered scheme is `worker:<scheme> not found`.
    pub fn resolve(&self, connect_url: &str) -> Result<Arc<dyn AtomWorker>> {
        let scheme = ConnectUrl::scheme_of(connect_url)?;
        self.workers
            .get(&scheme)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("worker:{}", scheme)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::js_url;
    use async_trait::async_trait;
    use fluxion_core::domain::atom::Atom;
    use fluxion_core::domain::worker::{ExecOptions, WorkerResult};
    use serde_json::Value;

    struct Named(&'static str);

    #[async_trait]
    impl AtomWorker for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _: &Atom, input: Value, _: &ExecOptions) -> WorkerResult {
            WorkerResult::success(input)
        }
    }

    #[test]
    fn test_resolves_registered_scheme() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("http", Arc::new(Named("web")));
        dispatcher.register("lua-code", Arc::new(Named("lua")));

        assert_eq!(dispatcher.resolve("http://localhost/run").unwrap().name(), "web");
        assert_eq!(dispatcher.resolve("HTTP://localhost/run").unwrap().name(), "web");
        assert_eq!(dispatcher.resolve("lua-code://cmV0dXJu").unwrap().name(), "lua");
        assert!(dispatcher.supports("LUA-CODE"));
    }

    #[test]
    fn test_unknown_scheme_is_not_found() {
        let dispatcher = Dispatcher::new();

        match dispatcher.resolve("ftp://example.com/file") {
            Err(Error::NotFound(what)) => assert_eq!(what, "worker:ftp"),
            other => panic!("expected NotFound, got {:?}", other.map(|w| w.name().to_string())),
        }
    }

    #[test]
    fn test_malformed_url_is_validation_error() {
        let dispatcher = Dispatcher::new();

        for raw in ["no-scheme-here", "://host", "http://", "1http://host"] {
            assert!(
                matches!(dispatcher.resolve(raw), Err(Error::Validation(_))),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_standard_registers_all_schemes() {
        let dispatcher = Dispatcher::standard(&Config::default()).unwrap();

        assert!(dispatcher.supports(HTTP_SCHEME));
        assert!(dispatcher.supports(HTTPS_SCHEME));
        assert!(dispatcher.supports(JS_SCHEME));
        assert!(dispatcher.supports(LUA_SCHEME));
        assert!(!dispatcher.supports("ftp"));

        let js = dispatcher
            .resolve(&js_url("module.exports = (i) => i"))
            .unwrap();
        assert_eq!(js.name(), "js-code");
    }
}
