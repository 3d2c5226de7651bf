//! Filesystem operations: list, read, write, delete, search, download.
//!
//! Contents travel base64-encoded for binary safety; listings and search
//! results are JSON arrays of [`FileEntry`] records.

use crate::error::TaskError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Ceiling for whole-file reads.
pub const READ_MAX_BYTES: u64 = 10 * 1024 * 1024;
/// Files above this size report chunk metadata instead of content.
pub const DOWNLOAD_CHUNK_BYTES: u64 = 1024 * 1024;
/// Depth bound for recursive searches.
pub const SEARCH_MAX_DEPTH: usize = 5;

/// One listing/search entry. Field names are part of the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    #[serde(rename = "modTime")]
    pub mod_time: String,
    pub mode: String,
}

impl FileEntry {
    fn from_metadata(name: String, path: String, meta: &std::fs::Metadata) -> Self {
        let mod_time = meta
            .modified()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
            .unwrap_or_default();
        Self {
            name,
            path,
            size: meta.len(),
            is_dir: meta.is_dir(),
            mod_time,
            mode: render_mode(meta),
        }
    }
}

#[cfg(unix)]
fn render_mode(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:04o}", meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn render_mode(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "ro".to_string()
    } else {
        "rw".to_string()
    }
}

/// List a directory's entries, or describe a single file.
pub async fn list(path: &str) -> Result<String, TaskError> {
    let meta = tokio::fs::metadata(path).await?;

    let mut entries = Vec::new();
    if meta.is_dir() {
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let Ok(entry_meta) = entry.metadata().await else {
                continue;
            };
            entries.push(FileEntry::from_metadata(
                entry.file_name().to_string_lossy().into_owned(),
                entry.path().to_string_lossy().into_owned(),
                &entry_meta,
            ));
        }
    } else {
        let name = Path::new(path)
            .file_name()
            .map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned());
        entries.push(FileEntry::from_metadata(name, path.to_string(), &meta));
    }

    Ok(serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string()))
}

/// Read a whole file, base64-encoded. Directories and oversized files are
/// rejected. `max_bytes` of 0 applies the default ceiling.
pub async fn read(path: &str, max_bytes: u64) -> Result<String, TaskError> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.is_dir() {
        return Err(TaskError::IsDirectory);
    }
    let max = if max_bytes == 0 { READ_MAX_BYTES } else { max_bytes };
    if meta.len() > max {
        return Err(TaskError::TooLarge {
            size: meta.len(),
            max,
        });
    }

    let data = tokio::fs::read(path).await?;
    let body = serde_json::json!({
        "path": path,
        "size": data.len(),
        "encoding": "base64",
        "data": BASE64.encode(&data),
    });
    Ok(body.to_string())
}

/// Write base64-decoded data, creating parent directories. Truncates by
/// default, appends when asked.
pub async fn write(path: &str, data: &str, append: bool) -> Result<String, TaskError> {
    let decoded = BASE64.decode(data)?;

    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    let mut file = options.open(path).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, &decoded).await?;

    Ok(format!("wrote {} bytes to {path}", decoded.len()))
}

/// Delete a file or directory. A non-empty directory needs the recursive
/// flag and is left untouched without it.
pub async fn delete(path: &str, recursive: bool) -> Result<String, TaskError> {
    let meta = tokio::fs::metadata(path).await?;

    if meta.is_dir() {
        if !recursive {
            let mut dir = tokio::fs::read_dir(path).await?;
            if dir.next_entry().await?.is_some() {
                return Err(TaskError::DirectoryNotEmpty);
            }
        }
        tokio::fs::remove_dir_all(path).await?;
        return Ok(format!("deleted directory: {path}"));
    }

    tokio::fs::remove_file(path).await?;
    Ok(format!("deleted file: {path}"))
}

/// Recursive name-glob search under `root`, bounded at `max_depth`.
/// Directories past the bound are pruned, not descended into; unreadable
/// entries are skipped.
pub async fn search(root: &str, pattern: &str, max_depth: usize) -> Result<String, TaskError> {
    let matcher = globset::GlobBuilder::new(pattern)
        .build()
        .map_err(|e| TaskError::InvalidParam {
            name: "pattern",
            reason: e.to_string(),
        })?
        .compile_matcher();

    let mut matches = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        let name = entry.file_name().to_string_lossy();
        if !matcher.is_match(name.as_ref()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        matches.push(FileEntry::from_metadata(
            name.into_owned(),
            entry.path().to_string_lossy().into_owned(),
            &meta,
        ));
    }

    Ok(serde_json::to_string_pretty(&matches).unwrap_or_else(|_| "[]".to_string()))
}

/// Whole-file fetch for small files; chunk metadata above the threshold so
/// the controller can request pieces individually.
pub async fn download(path: &str, chunk_size: u64) -> Result<String, TaskError> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.is_dir() {
        return Err(TaskError::IsDirectory);
    }

    if chunk_size == 0 || meta.len() < chunk_size {
        return read(path, 0).await;
    }

    let body = serde_json::json!({
        "path": path,
        "size": meta.len(),
        "chunks": meta.len() / chunk_size + 1,
        "chunkSize": chunk_size,
        "message": "file too large, request chunks individually",
    });
    Ok(body.to_string())
}

/// One indexed chunk of a file, base64-encoded, with an `isLast` flag on the
/// final piece.
pub async fn chunk(path: &str, index: u64, chunk_size: u64) -> Result<String, TaskError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(index * chunk_size))
        .await?;

    let mut buf = Vec::new();
    let read = file.take(chunk_size).read_to_end(&mut buf).await? as u64;

    let body = serde_json::json!({
        "path": path,
        "chunkIndex": index,
        "chunkSize": read,
        "encoding": "base64",
        "data": BASE64.encode(&buf),
        "isLast": read < chunk_size,
    });
    Ok(body.to_string())
}
