//! HTTP client for the remote coordinator.
//!
//! Endpoints, relative to the coordinator base URL:
//! - `GET  api/tasks/{id}` returns the task record as JSON
//! - `POST api/tasks/{id}/output` with `{"output": line}`
//! - `POST api/tasks/{id}/abort`

use async_trait::async_trait;
use dockhand_core::executor::TaskSource;
use dockhand_core::{Error, ResourceId, Result, Task};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::debug;
use url::Url;

/// [`TaskSource`] talking to a coordinator over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTaskSource {
    client: Client,
    base: Url,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct AppendOutputRequest<'a> {
    output: &'a str,
}

impl HttpTaskSource {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        // Joining relative paths drops the last segment unless it ends with '/'.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base = Url::parse(&normalized)
            .map_err(|e| Error::InvalidInput(format!("coordinator url {base_url}: {e}")))?;

        Ok(Self {
            client: Client::new(),
            base,
            api_key,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Internal(format!("invalid coordinator path {path}: {e}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::Coordinator(format!("{action}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Coordinator(format!("{action}: {status} - {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn fetch_task(&self, id: &ResourceId) -> Result<Task> {
        let url = self.url(&format!("api/tasks/{id}"))?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| Error::Coordinator(format!("fetch task: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("task {id}")));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Coordinator(format!("fetch task: {status} - {body}")));
        }

        response
            .json::<Task>()
            .await
            .map_err(|e| Error::Coordinator(format!("decode task {id}: {e}")))
    }

    async fn append_output(&self, id: &ResourceId, line: &str) -> Result<()> {
        let url = self.url(&format!("api/tasks/{id}/output"))?;
        let request = self
            .client
            .post(url)
            .json(&AppendOutputRequest { output: line });
        self.send(request, "append output").await?;
        Ok(())
    }

    async fn abort_task(&self, id: &ResourceId) -> Result<()> {
        debug!(task_id = %id, "Signalling abort to coordinator");
        let url = self.url(&format!("api/tasks/{id}/abort"))?;
        self.send(self.client.post(url), "abort task").await?;
        Ok(())
    }
}
