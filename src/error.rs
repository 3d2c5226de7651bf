use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `outpost`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum OutpostError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Transport identity ──────────────────────────────────────────────
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    // ── Host discovery ──────────────────────────────────────────────────
    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    // ── Transport setup ─────────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Check-in loop ───────────────────────────────────────────────────
    #[error("beacon: {0}")]
    Beacon(#[from] BeaconError),

    // ── Task dispatch / execution ───────────────────────────────────────
    #[error("task: {0}")]
    Task(#[from] TaskError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid interval `{0}` (expected forms: `45`, `45s`, `5m`, `1h`)")]
    InvalidInterval(String),
}

// ─── Identity errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no usable client certificate/key pair (attempted: {attempted})")]
    NoUsablePair { attempted: String },

    #[error("no trusted issuer material (CA bundle missing or unreadable)")]
    NoTrustAnchors,

    #[error("invalid PEM in {source_name}: {reason}")]
    InvalidPem { source_name: String, reason: String },
}

// ─── Discovery errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no route information available")]
    NoRoute,

    #[error("route query failed: {0}")]
    RouteQuery(String),
}

// ─── Transport errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("client identity rejected: {0}")]
    Identity(reqwest::Error),

    #[error("trusted issuer bundle rejected: {0}")]
    TrustAnchors(reqwest::Error),

    #[error("client build failed: {0}")]
    Build(reqwest::Error),
}

// ─── Beacon errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("check-in POST failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("check-in rejected: HTTP {0}")]
    Status(reqwest::StatusCode),
}

// ─── Task errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("unknown task type: {0}")]
    UnknownKind(String),

    #[error("missing parameter `{0}`")]
    MissingParam(&'static str),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("command failed: {0}")]
    Exec(String),

    #[error("path is a directory, not a file")]
    IsDirectory,

    #[error("file too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("directory not empty (use recursive=true)")]
    DirectoryNotEmpty,

    #[error("invalid base64 data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, OutpostError>;
