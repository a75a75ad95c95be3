//! Webhook worker
//!
//! POSTs `{input, options}` to the atom's URL and expects a `WorkerResult`
//! back as the JSON body.

use async_trait::async_trait;
use fluxion_core::domain::atom::Atom;
use fluxion_core::domain::worker::{ExecOptions, WorkerResult};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::AtomWorker;

#[derive(Serialize)]
struct WebhookRequest<'a> {
    input: &'a Value,
    options: &'a ExecOptions,
}

#[derive(Clone)]
pub struct HttpWorker {
    client: Client,
}

impl HttpWorker {
    /// `timeout` of `None` keeps the transport default
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn call(
        &self,
        url: &str,
        input: &Value,
        options: &ExecOptions,
    ) -> Result<WorkerResult, String> {
        let response = self
            .client
            .post(url)
            .json(&WebhookRequest { input, options })
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("webhook answered {}", status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read response: {}", e))?;

        let result: WorkerResult = serde_json::from_str(&body)
            .map_err(|e| format!("response is not a worker result: {}", e))?;
        result.validate()?;

        Ok(result)
    }
}

#[async_trait]
impl AtomWorker for HttpWorker {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, atom: &Atom, input: Value, options: &ExecOptions) -> WorkerResult {
        tracing::debug!(atom_id = atom.id, url = %atom.connect_url, "calling webhook");

        match self.call(&atom.connect_url, &input, options).await {
            Ok(result) => result,
            Err(message) => {
                tracing::warn!(atom_id = atom.id, "webhook atom failed: {}", message);
                WorkerResult::failure(message)
            }
        }
    }
}
