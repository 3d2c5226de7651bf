//! Side-channel host facts reported with every check-in.
//!
//! Every field is optional: a fact that cannot be gathered is simply left
//! out of the payload rather than reported as an error.

use crate::config::{Config, USER_AGENT};
use crate::transport::WHOAMI_TIMEOUT;
use crate::util::truncate_with_marker;
use serde_json::{Map, Value};
use std::time::Duration;

/// Timeout for the local status command.
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);
/// Cap on the status command's captured output.
const STATUS_OUTPUT_CAP: usize = 2048;
/// Timeout for the public echo-service fallback.
const ECHO_TIMEOUT: Duration = Duration::from_secs(5);

const ECHO_SERVICES: [&str; 3] = [
    "https://api.ipify.org?format=text",
    "https://icanhazip.com",
    "https://ifconfig.me/ip",
];

#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub local_ip: Option<String>,
    pub public_ip: Option<String>,
    pub hostname: Option<String>,
    pub os: &'static str,
    pub arch: &'static str,
    pub user: Option<String>,
}

impl HostInfo {
    /// Extra fields merged into the check-in body. Field names are part of
    /// the wire contract with the controller.
    #[must_use]
    pub fn beacon_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(ip) = &self.public_ip {
            fields.insert("publicIp".into(), Value::String(ip.clone()));
        }
        if let Some(ip) = &self.local_ip {
            fields.insert("localIp".into(), Value::String(ip.clone()));
        }
        if let Some(hostname) = &self.hostname {
            fields.insert("hostname".into(), Value::String(hostname.clone()));
        }
        if !self.os.is_empty() {
            fields.insert("os".into(), Value::String(self.os.to_string()));
        }
        if !self.arch.is_empty() {
            fields.insert("arch".into(), Value::String(self.arch.to_string()));
        }
        if let Some(user) = &self.user {
            fields.insert("user".into(), Value::String(user.clone()));
        }
        fields
    }
}

/// Gather the extra-information payload. The public-address lookup only runs
/// when a whoami token is configured; unconfigured agents stay off the public
/// network entirely.
pub async fn collect(api: &reqwest::Client, config: &Config) -> HostInfo {
    let public_ip = if config.whoami_token.is_some() {
        public_ip(api, config).await
    } else {
        None
    };

    HostInfo {
        local_ip: crate::discovery::local_ipv4_addresses()
            .await
            .first()
            .map(ToString::to_string),
        public_ip,
        hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        user: current_user(),
    }
}

/// Output of the fixed local status command (`whoami`), truncated, plus any
/// error text. Both strings ride in every check-in body.
pub async fn status_output() -> (String, String) {
    let mut cmd = tokio::process::Command::new("whoami");
    let result = tokio::time::timeout(STATUS_TIMEOUT, cmd.output()).await;

    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let trimmed = stdout.trim();
            if output.status.success() {
                (truncate_with_marker(trimmed, STATUS_OUTPUT_CAP), String::new())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                (
                    truncate_with_marker(trimmed, STATUS_OUTPUT_CAP),
                    stderr.trim().to_string(),
                )
            }
        }
        Ok(Err(e)) => (String::new(), e.to_string()),
        Err(_) => (String::new(), "status command timed out".to_string()),
    }
}

fn current_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|user| !user.is_empty())
}

/// Authenticated whoami endpoint first, public echo services second.
async fn public_ip(api: &reqwest::Client, config: &Config) -> Option<String> {
    if let Some(token) = &config.whoami_token
        && let Some(ip) = whoami_endpoint(api, token, &config.api_server_name).await
    {
        return Some(ip);
    }
    echo_services().await
}

async fn whoami_endpoint(api: &reqwest::Client, token: &str, api_host: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct WhoamiBody {
        ip: String,
    }

    let url = format!("https://{api_host}/whoami");
    let response = api
        .get(&url)
        .bearer_auth(token)
        .header(reqwest::header::USER_AGENT, format!("{USER_AGENT} whoami"))
        .timeout(WHOAMI_TIMEOUT)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("whoami request failed: {e}");
            return None;
        }
    };
    if !response.status().is_success() {
        tracing::debug!(status = %response.status(), "whoami non-success response");
        return None;
    }
    let body: WhoamiBody = response.json().await.ok()?;
    if body.ip.is_empty() {
        return None;
    }
    tracing::debug!(ip = %body.ip, "whoami reported public address");
    Some(body.ip)
}

async fn echo_services() -> Option<String> {
    // Plain client: the echo services are public and know nothing of the
    // controller's issuer.
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(ECHO_TIMEOUT)
        .build()
        .ok()?;

    for service in ECHO_SERVICES {
        let Ok(response) = client.get(service).send().await else {
            continue;
        };
        if !response.status().is_success() {
            continue;
        }
        let Ok(body) = response.text().await else {
            continue;
        };
        let ip = body.trim();
        if ip.parse::<std::net::IpAddr>().is_ok() {
            tracing::debug!(%ip, service, "echo service reported public address");
            return Some(ip.to_string());
        }
    }
    None
}
