//! Process operations: enumerate, kill, start, inspect.

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

/// One process record, normalized across platforms. Absent columns are
/// omitted from the serialized form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Enumerate running processes via the platform tool.
pub async fn list() -> Result<String, TaskError> {
    let output = if cfg!(windows) {
        run_capture("tasklist", &["/FO", "CSV", "/NH"]).await?
    } else {
        run_capture("ps", &["aux"]).await?
    };

    let processes = if cfg!(windows) {
        parse_tasklist_csv(&output)
    } else {
        parse_ps_aux(&output)
    };

    Ok(serde_json::to_string_pretty(&processes).unwrap_or_else(|_| "[]".to_string()))
}

/// Terminate a process by identifier.
pub async fn kill(pid: &str) -> Result<String, TaskError> {
    if cfg!(windows) {
        run_checked("taskkill", &["/F", "/PID", pid]).await?;
    } else {
        run_checked("kill", &["-9", pid]).await?;
    }
    Ok(format!("killed process {pid}"))
}

/// Terminate every process matching a name.
pub async fn kill_by_name(name: &str) -> Result<String, TaskError> {
    if cfg!(windows) {
        run_checked("taskkill", &["/F", "/IM", name]).await?;
    } else {
        run_checked("pkill", &["-9", name]).await?;
    }
    Ok(format!("killed processes named {name}"))
}

/// Start a process: foreground runs under the usual bounded wall clock,
/// detached is spawned and left behind.
pub async fn start(command: &str, detached: bool) -> Result<String, TaskError> {
    if !detached {
        let output = super::shell::run_shell(command).await?;
        return Ok(if output.is_empty() {
            "process completed".to_string()
        } else {
            format!("process completed\noutput: {output}")
        });
    }

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    // The child outlives this task on purpose; nobody reaps it.
    drop(child);
    Ok("process started (detached)".to_string())
}

/// Detail lookup for one process. The identifier must be numeric before any
/// system query runs.
pub async fn info(pid: &str) -> Result<String, TaskError> {
    if pid.parse::<u32>().is_err() {
        return Err(TaskError::InvalidParam {
            name: "pid",
            reason: format!("`{pid}` is not numeric"),
        });
    }

    let output = if cfg!(windows) {
        run_capture(
            "wmic",
            &[
                "process",
                "where",
                &format!("ProcessId={pid}"),
                "get",
                "Name,ExecutablePath,CommandLine,CreationDate",
                "/FORMAT:LIST",
            ],
        )
        .await?
    } else {
        run_capture("ps", &["-p", pid, "-o", "pid,user,comm,cmd,etime,%cpu,%mem"]).await?
    };
    Ok(output)
}

async fn run_capture(program: &str, args: &[&str]) -> Result<String, TaskError> {
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TaskError::Exec(format!(
            "{program} {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn run_checked(program: &str, args: &[&str]) -> Result<(), TaskError> {
    run_capture(program, args).await.map(|_| ())
}

/// `USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND...`
fn parse_ps_aux(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 11 {
                return None;
            }
            Some(ProcessEntry {
                pid: fields[1].to_string(),
                user: Some(fields[0].to_string()),
                cpu: Some(format!("{}%", fields[2])),
                memory: Some(format!("{}%", fields[3])),
                command: Some(fields[10..].join(" ")),
                ..ProcessEntry::default()
            })
        })
        .collect()
}

/// `"name","pid","session","session#","mem usage"`
fn parse_tasklist_csv(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let line = line.replace('"', "");
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 5 {
                return None;
            }
            Some(ProcessEntry {
                pid: fields[1].to_string(),
                name: Some(fields[0].to_string()),
                memory: Some(format!("{} KB", fields[4])),
                ..ProcessEntry::default()
            })
        })
        .collect()
}
