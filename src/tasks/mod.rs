//! Work-item model and dispatch.
//!
//! A work item is either a shell command with arguments or a typed operation
//! with a string-keyed parameter map. Dispatch is total: every execution
//! produces exactly one [`WorkResult`], internal failures land in its error
//! field, and an unrecognized kind fails deterministically without touching
//! the filesystem or spawning anything.

pub mod facts;
pub mod fs_ops;
pub mod proc_ops;
pub mod shell;

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A unit of work, pre-loaded at build time or issued by the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkItem {
    pub id: String,
    /// Shell form: program plus argv, used when no typed kind is set.
    pub cmd: String,
    pub args: Vec<String>,
    /// Typed form: operation kind plus parameters. Two field spellings are
    /// accepted on the wire; `kind` wins when both are present.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "taskType")]
    pub task_type: String,
    pub params: HashMap<String, String>,
    #[serde(rename = "runOnce")]
    pub run_once: bool,
}

impl WorkItem {
    /// The operation kind, resolving the two wire spellings. Empty means the
    /// shell (`cmd` + `args`) form.
    #[must_use]
    pub fn effective_kind(&self) -> &str {
        if self.kind.is_empty() {
            &self.task_type
        } else {
            &self.kind
        }
    }

    fn param(&self, name: &'static str) -> Result<&str, TaskError> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or(TaskError::MissingParam(name))
    }

    fn param_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    }

    fn flag(&self, name: &str) -> bool {
        self.params.get(name).is_some_and(|v| v == "true")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Outcome of one work-item execution. Produced exactly once per item and
/// never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: TaskStatus,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkResult {
    fn completed(item: &WorkItem, output: String) -> Self {
        Self {
            task_id: item.id.clone(),
            kind: item.effective_kind().to_string(),
            status: TaskStatus::Completed,
            output,
            error: None,
        }
    }

    fn failed(item: &WorkItem, error: &TaskError) -> Self {
        Self {
            task_id: item.id.clone(),
            kind: item.effective_kind().to_string(),
            status: TaskStatus::Failed,
            output: String::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Execute a work item. Never panics past this boundary and never returns an
/// error; failures are carried in the result.
pub async fn execute(item: &WorkItem) -> WorkResult {
    tracing::info!(id = %item.id, kind = %item.effective_kind(), "executing task");
    match run_item(item).await {
        Ok(output) => {
            tracing::info!(id = %item.id, "task completed");
            WorkResult::completed(item, output)
        }
        Err(e) => {
            tracing::warn!(id = %item.id, "task failed: {e}");
            WorkResult::failed(item, &e)
        }
    }
}

async fn run_item(item: &WorkItem) -> Result<String, TaskError> {
    let kind = item.effective_kind();
    if kind.is_empty() {
        if item.cmd.is_empty() {
            return Err(TaskError::UnknownKind("<empty>".to_string()));
        }
        return shell::run_argv(&item.cmd, &item.args).await;
    }

    match kind {
        "cmd" => shell::run_shell(item.param("command")?).await,
        "sys_info" => Ok(facts::system_info().await),
        "priv_check" => Ok(facts::privilege_info().await),

        "file_list" => fs_ops::list(item.param_or("path", ".")).await,
        "file_read" => fs_ops::read(item.param("path")?, 0).await,
        "file_write" => {
            fs_ops::write(item.param("path")?, item.param("data")?, item.flag("append")).await
        }
        "file_delete" => fs_ops::delete(item.param("path")?, item.flag("recursive")).await,
        "file_search" => {
            fs_ops::search(
                item.param_or("path", "."),
                item.param("pattern")?,
                fs_ops::SEARCH_MAX_DEPTH,
            )
            .await
        }
        "file_download" => fs_ops::download(item.param("path")?, fs_ops::DOWNLOAD_CHUNK_BYTES).await,
        "file_chunk" => {
            let index = parse_numeric_param(item, "chunk")?;
            fs_ops::chunk(item.param("path")?, index, fs_ops::DOWNLOAD_CHUNK_BYTES).await
        }

        "proc_list" => proc_ops::list().await,
        "proc_kill" => proc_ops::kill(item.param("pid")?).await,
        "proc_kill_name" => proc_ops::kill_by_name(item.param("name")?).await,
        "proc_start" => proc_ops::start(item.param("command")?, item.flag("background")).await,
        "proc_info" => proc_ops::info(item.param("pid")?).await,

        other => Err(TaskError::UnknownKind(other.to_string())),
    }
}

fn parse_numeric_param(item: &WorkItem, name: &'static str) -> Result<u64, TaskError> {
    item.param(name)?
        .parse()
        .map_err(|_| TaskError::InvalidParam {
            name,
            reason: "not a number".to_string(),
        })
}
