//! Local name-resolution override.
//!
//! Discovery optionally rewrites the system hosts file so the controller's
//! names resolve even without DNS. The block this agent writes is bracketed
//! by a marker comment; rewrites replace any block (or stray entries) a
//! previous run left behind, and the companion removal runs from the signal
//! handler before exit. Everything here is best-effort; an unprivileged
//! agent simply logs the failure and relies on the transport's DNS bypass.

use crate::config::DOMAIN_SUFFIX;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Marker introducing the entries this agent owns.
pub const OVERRIDE_MARKER: &str = "# outpost agent (auto-added)";

/// Controller-related names pointed at the discovered address.
const OVERRIDE_NAMES: [&str; 4] = [
    "beacon.outpost.lab",
    "api.outpost.lab",
    "console.outpost.lab",
    "sensor.outpost.lab",
];

fn system_hosts_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/// Rewrite the system hosts file with fresh controller entries.
pub fn write_override(address: Ipv4Addr) -> std::io::Result<()> {
    write_override_at(&system_hosts_path(), address)
}

/// Remove exactly the entries this agent would have written.
pub fn remove_override() -> std::io::Result<()> {
    remove_override_at(&system_hosts_path())
}

/// Read-modify-write: strip any previously written (or stale) entries, then
/// append a fresh marker block for the given address.
pub fn write_override_at(path: &Path, address: Ipv4Addr) -> std::io::Result<()> {
    let content = std::fs::read_to_string(path)?;
    let mut updated = strip_entries(&content);
    updated.push_str(&render_entries(address));
    std::fs::write(path, updated)?;
    tracing::info!(%address, path = %path.display(), "updated hosts override entries");
    Ok(())
}

pub fn remove_override_at(path: &Path) -> std::io::Result<()> {
    let content = std::fs::read_to_string(path)?;
    std::fs::write(path, strip_entries(&content))?;
    tracing::info!(path = %path.display(), "removed hosts override entries");
    Ok(())
}

/// Drop the marker line and every controller-domain entry, stale ones
/// included, leaving unrelated lines untouched.
fn strip_entries(content: &str) -> String {
    let mut kept: Vec<&str> = content
        .lines()
        .filter(|line| !line.contains(OVERRIDE_MARKER) && !line.contains(DOMAIN_SUFFIX))
        .collect();
    while kept.last().is_some_and(|line| line.trim().is_empty()) {
        kept.pop();
    }
    let mut out = kept.join("\n");
    out.push('\n');
    out
}

fn render_entries(address: Ipv4Addr) -> String {
    let mut block = format!("\n{OVERRIDE_MARKER}\n");
    for name in OVERRIDE_NAMES {
        block.push_str(&format!("{address} {name}\n"));
    }
    block
}
