use std::future::Future;

/// Marker appended to any captured output that exceeded its cap.
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// Cap `s` at `max_bytes`, appending [`TRUNCATION_MARKER`] when anything was
/// cut. Output at or under the cap is returned untouched, so re-truncating an
/// untruncated string is a no-op. The cut lands on a char boundary, never
/// inside a multi-byte sequence.
#[must_use]
pub fn truncate_with_marker(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let cut = s.floor_char_boundary(max_bytes);
    format!("{}{TRUNCATION_MARKER}", &s[..cut])
}

/// Current wall-clock time as an RFC 3339 UTC timestamp (the `ts` field of
/// every check-in body).
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Spawn a future nobody waits on.
///
/// Dispatched work items (issued and deferred pre-loaded alike) run to
/// completion on their own; the join handle is dropped on purpose. There is
/// no pool, no queue bound, and no cancellation propagation from the check-in
/// loop into a running task.
pub fn spawn_detached<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    drop(tokio::spawn(fut));
}
