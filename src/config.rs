use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

// ─── Build-time defaults ─────────────────────────────────────────────────────

/// Configuration baked in at compile time (the analogue of linker-injected
/// globals in earlier prototypes). Each value is optional; anything absent
/// falls back to the fixed defaults below, and everything can still be
/// overridden by environment variables at startup.
pub mod build {
    pub const AGENT_ID: Option<&str> = option_env!("OUTPOST_BUILD_AGENT_ID");
    pub const CONTROLLER: Option<&str> = option_env!("OUTPOST_BUILD_CONTROLLER");
    pub const INTERVAL: Option<&str> = option_env!("OUTPOST_BUILD_INTERVAL");
    /// JSON array of pre-loaded tasks, executed after the first successful
    /// check-in.
    pub const TASKS: Option<&str> = option_env!("OUTPOST_BUILD_TASKS");
    pub const TENANT_KEY: Option<&str> = option_env!("OUTPOST_BUILD_TENANT_KEY");
    /// PEM client certificate / key / CA bundle (`\n`-escaped).
    pub const CLIENT_CERT: Option<&str> = option_env!("OUTPOST_BUILD_CERT");
    pub const CLIENT_KEY: Option<&str> = option_env!("OUTPOST_BUILD_KEY");
    pub const CA_BUNDLE: Option<&str> = option_env!("OUTPOST_BUILD_CA");
}

/// Domain suffix shared by every controller-related name. Hostnames under
/// this suffix are the ones the DNS-bypass dialer and the hosts-file override
/// apply to.
pub const DOMAIN_SUFFIX: &str = "outpost.lab";

/// Default controller authority (host:port) for the check-in channel.
pub const DEFAULT_CONTROLLER: &str = "beacon.outpost.lab:4443";

const DEFAULT_SERVER_NAME: &str = "beacon.outpost.lab";
const DEFAULT_API_SERVER_NAME: &str = "api.outpost.lab";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// User-Agent presented on every outbound request.
pub const USER_AGENT: &str = "Outpost-Agent/0.1";

// ─── Runtime configuration ──────────────────────────────────────────────────

/// Resolved endpoint configuration.
///
/// Built exactly once at startup from compile-time defaults layered under
/// environment overrides, then handed out read-only behind an `Arc`. The only
/// field that changes after resolution is the poll interval, and that is
/// owned by the check-in loop's own copy, never written back here.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stable agent identifier reported on every check-in.
    pub agent_id: String,
    /// Full check-in endpoint, e.g. `https://beacon.outpost.lab:4443/beacon`.
    pub controller_url: String,
    /// Initial interval between polls.
    pub checkin_interval: Duration,
    /// TLS identity name of the check-in service.
    pub server_name: String,
    /// TLS identity name of the result/API service.
    pub api_server_name: String,
    /// Bearer token for the authenticated public-address lookup. When absent
    /// the lookup is skipped entirely.
    pub whoami_token: Option<String>,
    /// Per-tenant credential forwarded as `X-Tenant-Key`.
    pub tenant_key: Option<String>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    /// Whether discovery may rewrite the local hosts file.
    pub rewrite_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        let controller = build::CONTROLLER.unwrap_or(DEFAULT_CONTROLLER);
        Self {
            agent_id: default_agent_id(),
            controller_url: format!("https://{controller}/beacon"),
            checkin_interval: build::INTERVAL
                .and_then(|raw| parse_interval(raw).ok())
                .unwrap_or(DEFAULT_INTERVAL),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            api_server_name: DEFAULT_API_SERVER_NAME.to_string(),
            whoami_token: None,
            tenant_key: build::TENANT_KEY.map(str::to_string),
            cert_path: None,
            key_path: None,
            ca_path: None,
            rewrite_hosts: true,
        }
    }
}

impl Config {
    /// Resolve the effective configuration: compile-time defaults, then
    /// environment overrides. Unparseable overrides are ignored in favor of
    /// the default, matching the tolerance of every other best-effort input.
    #[must_use]
    pub fn resolve() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("OUTPOST_AGENT_ID")
            && !id.is_empty()
        {
            self.agent_id = id;
        }
        if let Ok(url) = std::env::var("OUTPOST_CONTROLLER_URL")
            && !url.is_empty()
        {
            self.controller_url = url;
        }
        if let Ok(raw) = std::env::var("OUTPOST_CHECKIN_INTERVAL")
            && let Ok(interval) = parse_interval(&raw)
        {
            self.checkin_interval = interval;
        }
        if let Ok(name) = std::env::var("OUTPOST_SERVER_NAME")
            && !name.is_empty()
        {
            self.server_name = name;
        }
        if let Ok(name) = std::env::var("OUTPOST_API_SERVER_NAME")
            && !name.is_empty()
        {
            self.api_server_name = name;
        }
        if let Ok(token) = std::env::var("OUTPOST_WHOAMI_TOKEN")
            && !token.is_empty()
        {
            self.whoami_token = Some(token);
        }
        if let Ok(key) = std::env::var("OUTPOST_TENANT_KEY")
            && !key.is_empty()
        {
            self.tenant_key = Some(key);
        }
        for (var, slot) in [
            ("OUTPOST_CERT_PATH", &mut self.cert_path),
            ("OUTPOST_KEY_PATH", &mut self.key_path),
            ("OUTPOST_CA_PATH", &mut self.ca_path),
        ] {
            if let Ok(path) = std::env::var(var)
                && !path.is_empty()
            {
                *slot = Some(PathBuf::from(path));
            }
        }
    }

    /// Authority (`host:port`) of the check-in endpoint.
    #[must_use]
    pub fn controller_authority(&self) -> String {
        url::Url::parse(&self.controller_url)
            .ok()
            .and_then(|u| {
                let host = u.host_str()?.to_string();
                Some(match u.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                })
            })
            .unwrap_or_else(|| DEFAULT_CONTROLLER.to_string())
    }
}

fn default_agent_id() -> String {
    match build::AGENT_ID {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("agent-{}", uuid::Uuid::new_v4()),
    }
}

/// Parse an interval override: bare seconds (`45`) or a single-unit suffix
/// form (`45s`, `5m`, `1h`).
pub fn parse_interval(raw: &str) -> std::result::Result<Duration, ConfigError> {
    let raw = raw.trim();
    let invalid = || ConfigError::InvalidInterval(raw.to_string());

    if raw.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let unit = raw.chars().last().ok_or_else(invalid)?;
    let value: u64 = raw[..raw.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    match unit {
        's' => Ok(Duration::from_secs(value)),
        'm' => Ok(Duration::from_secs(value * 60)),
        'h' => Ok(Duration::from_secs(value * 3600)),
        _ => Err(invalid()),
    }
}
