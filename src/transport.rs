use crate::config::{Config, DOMAIN_SUFFIX, USER_AGENT};
use crate::error::TransportError;
use crate::identity::Identity;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request timeout for the side-channel public-address lookup.
pub const WHOAMI_TIMEOUT: Duration = Duration::from_secs(6);

/// The agent's two outbound channels.
///
/// Both clients present the same client certificate and trust the same issuer
/// bundle; which peer name a request authenticates is carried by the URL it
/// is sent to (check-in names go through `checkin`, API names through `api`).
/// They stay separate so each channel keeps its own connection pool and can
/// diverge in policy without touching the other. Server-certificate
/// verification is relaxed (the reverse proxy in front of both services
/// terminates TLS with its own certificate) but the client certificate is
/// always presented, so authentication is still enforced at the TLS
/// client-certificate layer.
#[derive(Debug, Clone)]
pub struct Transport {
    pub checkin: reqwest::Client,
    pub api: reqwest::Client,
    /// Address produced by discovery, if any. Recorded for logging; the
    /// clients already carry it as a DNS override.
    pub discovered: Option<Ipv4Addr>,
}

impl Transport {
    /// Assemble a transport from prebuilt clients (tests inject plain ones).
    #[must_use]
    pub fn new(checkin: reqwest::Client, api: reqwest::Client, discovered: Option<Ipv4Addr>) -> Self {
        Self {
            checkin,
            api,
            discovered,
        }
    }

    /// Build both authenticated clients from the loaded identity.
    pub fn setup(
        identity: &Identity,
        config: &Config,
        discovered: Option<Ipv4Addr>,
    ) -> Result<Self, TransportError> {
        let checkin = build_client(identity, config, discovered)?;
        let api = build_client(identity, config, discovered)?;
        if let Some(addr) = discovered {
            tracing::info!(%addr, "transport pinned controller names to discovered address");
        }
        Ok(Self {
            checkin,
            api,
            discovered,
        })
    }
}

fn build_client(
    identity: &Identity,
    config: &Config,
    discovered: Option<Ipv4Addr>,
) -> Result<reqwest::Client, TransportError> {
    let client_identity =
        reqwest::Identity::from_pem(&identity.client_pem()).map_err(TransportError::Identity)?;

    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .identity(client_identity)
        .danger_accept_invalid_certs(true)
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT);

    for root in
        reqwest::Certificate::from_pem_bundle(identity.ca_pem()).map_err(TransportError::TrustAnchors)?
    {
        builder = builder.add_root_certificate(root);
    }

    // DNS bypass: controller-domain names dial the discovered address
    // directly, port taken from the URL. Independent of (and complementary
    // to) the hosts-file override, which needs privileges this agent may not
    // have.
    if let Some(addr) = discovered {
        for name in bypass_names(config) {
            builder = builder.resolve(name, SocketAddr::new(IpAddr::V4(addr), 0));
        }
    }

    builder.build().map_err(TransportError::Build)
}

/// Hostnames the DNS bypass applies to: the per-channel verification names
/// that fall under the controller's domain suffix, deduplicated.
fn bypass_names(config: &Config) -> Vec<&str> {
    let mut names: Vec<&str> = [config.server_name.as_str(), config.api_server_name.as_str()]
        .into_iter()
        .filter(|name| name.ends_with(DOMAIN_SUFFIX))
        .collect();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_covers_both_channel_names() {
        let config = Config::default();
        let names = bypass_names(&config);
        assert_eq!(names, vec!["beacon.outpost.lab", "api.outpost.lab"]);
    }

    #[test]
    fn bypass_skips_names_outside_controller_domain() {
        let config = Config {
            server_name: "checkin.example.com".into(),
            ..Config::default()
        };
        let names = bypass_names(&config);
        assert_eq!(names, vec!["api.outpost.lab"]);
    }

    #[test]
    fn bypass_dedups_identical_names() {
        let config = Config {
            server_name: "beacon.outpost.lab".into(),
            api_server_name: "beacon.outpost.lab".into(),
            ..Config::default()
        };
        assert_eq!(bypass_names(&config).len(), 1);
    }

    #[test]
    fn transport_new_keeps_discovered_address() {
        let transport = Transport::new(
            reqwest::Client::new(),
            reqwest::Client::new(),
            Some("192.168.56.1".parse().unwrap()),
        );
        assert!(transport.discovered.is_some());
    }
}
