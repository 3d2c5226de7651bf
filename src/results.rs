//! Result delivery routing.
//!
//! Issued-task results go to the per-task API endpoint; pre-loaded batches go
//! to the embedded-results endpoint of whichever logical host the batch is
//! destined for. Delivery is fire-and-forget: failures are logged, nothing is
//! queued or retried.

use crate::config::Config;
use crate::tasks::{TaskStatus, WorkResult};
use crate::transport::Transport;
use serde_json::json;

pub struct ResultSink {
    checkin: reqwest::Client,
    api: reqwest::Client,
    agent_id: String,
    controller_url: String,
    controller_authority: String,
    server_name: String,
    api_server_name: String,
}

impl ResultSink {
    #[must_use]
    pub fn new(config: &Config, transport: &Transport) -> Self {
        Self {
            checkin: transport.checkin.clone(),
            api: transport.api.clone(),
            agent_id: config.agent_id.clone(),
            controller_url: config.controller_url.clone(),
            controller_authority: config.controller_authority(),
            server_name: config.server_name.clone(),
            api_server_name: config.api_server_name.clone(),
        }
    }

    /// Deliver one issued-task result to the per-task endpoint.
    pub async fn deliver_task_result(&self, task_id: &str, result: &WorkResult) {
        let Some(url) = self.task_result_url(task_id) else {
            tracing::warn!(task_id, "cannot derive result endpoint from controller URL");
            return;
        };

        let body = json!({
            "result": result.output,
            "error": result.error.clone().unwrap_or_default(),
            "status": result.status,
        });

        match self.api.post(&url).json(&body).send().await {
            Ok(response) => {
                tracing::info!(task_id, status = %response.status(), "task result sent");
            }
            Err(e) => tracing::warn!(task_id, "failed to send task result: {e}"),
        }
    }

    /// Deliver a batch of pre-loaded task results.
    pub async fn deliver_embedded_batch(&self, results: &[WorkResult]) {
        if results.is_empty() {
            return;
        }

        let (url, via_checkin) = self.embedded_batch_target();
        let client = if via_checkin { &self.checkin } else { &self.api };
        // The Host header stays the nominal controller name no matter which
        // physical address the DNS bypass dials, so name-based routing at the
        // front end keeps working.
        let host = self.embedded_host_header();

        let completed = results
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .count();
        tracing::info!(
            total = results.len(),
            completed,
            %url,
            "sending embedded task results"
        );

        let body = json!({ "results": results });
        match client
            .post(&url)
            .header(reqwest::header::HOST, host)
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!("embedded task results sent");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "embedded task results rejected");
            }
            Err(e) => tracing::warn!("failed to send embedded task results: {e}"),
        }
    }

    /// Per-task endpoint: the check-in URL with its path replaced and the
    /// check-in host swapped for the API host (which answers on the default
    /// port).
    fn task_result_url(&self, task_id: &str) -> Option<String> {
        let mut url = url::Url::parse(&self.controller_url).ok()?;
        url.set_path(&format!(
            "/api/agents/{}/tasks/{}/result",
            self.agent_id, task_id
        ));
        if url.host_str() == Some(self.server_name.as_str()) {
            url.set_host(Some(&self.api_server_name)).ok()?;
            url.set_port(None).ok()?;
        }
        Some(url.to_string())
    }

    /// Embedded-results endpoint. The check-in host mounts agent routes at
    /// its root; any other destination goes through the API prefix. The
    /// scheme follows the configured controller URL.
    fn embedded_batch_target(&self) -> (String, bool) {
        let scheme = url::Url::parse(&self.controller_url)
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "https".to_string());
        if self.destined_for_checkin_host() {
            (
                format!(
                    "{scheme}://{}/{}/embedded-tasks",
                    self.controller_authority, self.agent_id
                ),
                true,
            )
        } else {
            (
                format!(
                    "{scheme}://{}/api/agents/{}/embedded-tasks",
                    self.api_server_name, self.agent_id
                ),
                false,
            )
        }
    }

    fn destined_for_checkin_host(&self) -> bool {
        self.controller_authority
            .split(':')
            .next()
            .is_some_and(|host| host == self.server_name)
    }

    fn embedded_host_header(&self) -> String {
        if self.destined_for_checkin_host() {
            self.server_name.clone()
        } else {
            self.api_server_name.clone()
        }
    }
}
