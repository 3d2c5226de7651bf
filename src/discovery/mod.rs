//! Controller address discovery.
//!
//! The agent usually runs on an isolated segment where DNS for the
//! controller's names is unavailable or stale. Discovery produces a
//! best-guess IPv4 address for the controller host: host-only virtualization
//! interfaces first (the controller host conventionally sits at `.1` of the
//! same /24), then the default-route gateway. The result feeds the hosts-file
//! override and the transport's DNS-bypass pinning.

pub mod hosts;

use crate::error::DiscoveryError;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

const PROBE_PORT: u16 = 443;
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Find the controller's address without name resolution.
pub async fn discover() -> Result<Ipv4Addr, DiscoveryError> {
    let local = local_ipv4_addresses().await;
    let gateway = default_gateway().await;
    select_address(&local, gateway, probe_reachable).await
}

/// Candidate selection, separated from the system queries so the ordering
/// rules are testable: every host-only `.1` candidate is probed in turn, a
/// failed probe falls through to gateway-based detection (never to the
/// untested candidate), and the raw gateway is the last resort.
async fn select_address<F, Fut>(
    local: &[Ipv4Addr],
    gateway: Result<Ipv4Addr, DiscoveryError>,
    probe: F,
) -> Result<Ipv4Addr, DiscoveryError>
where
    F: Fn(Ipv4Addr) -> Fut,
    Fut: Future<Output = bool>,
{
    for candidate in host_only_candidates(local) {
        tracing::info!(%candidate, "testing host-only controller candidate");
        if probe(candidate).await {
            return Ok(candidate);
        }
    }

    let gateway = gateway?;
    let candidate = subnet_host(gateway);
    if candidate != gateway {
        tracing::info!(%candidate, "testing gateway-subnet controller candidate");
        if probe(candidate).await {
            return Ok(candidate);
        }
        tracing::info!(%candidate, %gateway, "candidate unreachable, using gateway");
    }
    Ok(gateway)
}

/// `.1` candidates derived from host-only virtualization interfaces.
///
/// Loopback and the conventional NAT guest range (`10.0.2.x`) never yield a
/// candidate; the host-only ranges virtualization software hands out are all
/// under `192.168.0.0/16`.
fn host_only_candidates(local: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    local
        .iter()
        .filter(|ip| !ip.is_loopback())
        .filter(|ip| {
            let o = ip.octets();
            !(o[0] == 10 && o[1] == 0 && o[2] == 2)
        })
        .filter(|ip| {
            let o = ip.octets();
            o[0] == 192 && o[1] == 168
        })
        .map(|ip| subnet_host(*ip))
        .collect()
}

/// Same /24, last octet 1: the conventional address of the machine hosting
/// a virtualized segment.
fn subnet_host(ip: Ipv4Addr) -> Ipv4Addr {
    let o = ip.octets();
    Ipv4Addr::new(o[0], o[1], o[2], 1)
}

/// Reachability test against `addr:443`.
///
/// This is not a real handshake: any response, including a TLS or
/// certificate-level failure, proves a listener and counts as reachable.
/// Only the absence of a response (connect error, connect timeout, or a
/// handshake nobody answers) counts as unreachable. The controller fronts
/// its services with a proxy whose certificate this agent does not trust for
/// this purpose, so certificate errors are expected positive signals here.
async fn probe_reachable(addr: Ipv4Addr) -> bool {
    let target = SocketAddr::from((addr, PROBE_PORT));
    let tcp = match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => stream,
        _ => return false,
    };

    let tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(ProbeVerifier))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server = rustls::pki_types::ServerName::from(IpAddr::V4(addr));

    // Completed attempt = response (success or failure alike); only a
    // timed-out handshake means nobody is answering.
    tokio::time::timeout(PROBE_TIMEOUT, connector.connect(server, tcp))
        .await
        .is_ok()
}

/// Accept-anything verifier for the probe. The probe measures whether a
/// listener answers at all, so chain and hostname validation are disabled.
#[derive(Debug)]
struct ProbeVerifier;

impl rustls::client::danger::ServerCertVerifier for ProbeVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Local IPv4 addresses, loopback excluded, via the platform's address
/// listing command.
pub(crate) async fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    let output = if cfg!(windows) {
        run_query("ipconfig", &[]).await
    } else {
        run_query("ip", &["addr", "show"]).await
    };
    output.map(|o| parse_ipv4_listing(&o)).unwrap_or_default()
}

/// Default-route gateway via `ip route` (or `route print` on Windows).
async fn default_gateway() -> Result<Ipv4Addr, DiscoveryError> {
    let output = if cfg!(windows) {
        run_query("route", &["print", "0.0.0.0"]).await
    } else {
        run_query("ip", &["route"]).await
    }
    .map_err(|e| DiscoveryError::RouteQuery(e.to_string()))?;

    let gateway = if cfg!(windows) {
        parse_route_print(&output)
    } else {
        parse_default_route(&output)
    };
    gateway.ok_or(DiscoveryError::NoRoute)
}

async fn run_query(program: &str, args: &[&str]) -> std::io::Result<String> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    let output = tokio::time::timeout(QUERY_TIMEOUT, cmd.output())
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "query timed out"))??;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pull IPv4 addresses out of `ip addr show` (`inet A.B.C.D/nn ...`) or
/// `ipconfig` (`IPv4 Address. . . : A.B.C.D`) output.
fn parse_ipv4_listing(output: &str) -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let candidate = if let Some(rest) = line.strip_prefix("inet ") {
            rest.split_whitespace()
                .next()
                .and_then(|cidr| cidr.split('/').next())
        } else if line.contains("IPv4 Address") {
            line.rsplit(':').next().map(str::trim)
        } else {
            None
        };
        if let Some(raw) = candidate
            && let Ok(ip) = raw.parse::<Ipv4Addr>()
            && !ip.is_loopback()
        {
            addrs.push(ip);
        }
    }
    addrs
}

/// `default via A.B.C.D dev ...`
fn parse_default_route(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("default via "))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|raw| raw.parse().ok())
}

/// Third column of the `0.0.0.0` row in `route print` output.
fn parse_route_print(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .filter(|line| line.contains("0.0.0.0"))
        .find_map(|line| {
            line.split_whitespace()
                .nth(2)
                .and_then(|raw| raw.parse::<Ipv4Addr>().ok())
        })
        .filter(|ip| !ip.is_unspecified())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn host_only_candidate_is_dot_one_of_same_subnet() {
        let candidates = host_only_candidates(&[ip("192.168.56.10"), ip("172.16.4.9")]);
        assert_eq!(candidates, vec![ip("192.168.56.1")]);
    }

    #[test]
    fn host_only_skips_loopback_and_nat_guest_range() {
        let candidates = host_only_candidates(&[ip("127.0.0.1"), ip("10.0.2.15")]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn subnet_host_keeps_first_three_octets() {
        assert_eq!(subnet_host(ip("192.168.57.104")), ip("192.168.57.1"));
        assert_eq!(subnet_host(ip("10.11.12.254")), ip("10.11.12.1"));
    }

    #[tokio::test]
    async fn failed_probe_falls_through_to_gateway() {
        let probed = Mutex::new(Vec::new());
        let probe = |addr: Ipv4Addr| {
            probed.lock().unwrap().push(addr);
            std::future::ready(false)
        };

        let chosen = select_address(
            &[ip("192.168.56.10"), ip("172.16.4.9")],
            Ok(ip("10.11.12.254")),
            probe,
        )
        .await
        .unwrap();

        // The untested host-only candidate must never be returned; both the
        // host-only and the gateway-subnet candidates were probed, and the
        // raw gateway is the final answer.
        assert_eq!(chosen, ip("10.11.12.254"));
        assert_eq!(
            *probed.lock().unwrap(),
            vec![ip("192.168.56.1"), ip("10.11.12.1")]
        );
    }

    #[tokio::test]
    async fn reachable_host_only_candidate_wins() {
        let probe = |addr: Ipv4Addr| std::future::ready(addr == ip("192.168.56.1"));
        let chosen = select_address(&[ip("192.168.56.10")], Ok(ip("10.0.0.254")), probe)
            .await
            .unwrap();
        assert_eq!(chosen, ip("192.168.56.1"));
    }

    #[tokio::test]
    async fn gateway_subnet_candidate_probed_before_raw_gateway() {
        let probe = |addr: Ipv4Addr| std::future::ready(addr == ip("10.0.0.1"));
        let chosen = select_address(&[], Ok(ip("10.0.0.254")), probe)
            .await
            .unwrap();
        assert_eq!(chosen, ip("10.0.0.1"));
    }

    #[tokio::test]
    async fn no_route_information_is_fatal_to_discovery() {
        let probe = |_addr: Ipv4Addr| std::future::ready(false);
        let err = select_address(&[], Err(DiscoveryError::NoRoute), probe)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoRoute));
    }

    #[test]
    fn parses_ip_addr_show_output() {
        let output = "\
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500
    inet 10.0.2.15/24 brd 10.0.2.255 scope global eth0
3: eth1: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500
    inet 192.168.56.10/24 brd 192.168.56.255 scope global eth1
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536
    inet 127.0.0.1/8 scope host lo
";
        assert_eq!(
            parse_ipv4_listing(output),
            vec![ip("10.0.2.15"), ip("192.168.56.10")]
        );
    }

    #[test]
    fn parses_ipconfig_output() {
        let output = "   IPv4 Address. . . . . . . . . . . : 192.168.1.100\r\n";
        assert_eq!(parse_ipv4_listing(output), vec![ip("192.168.1.100")]);
    }

    #[test]
    fn parses_default_route() {
        let output = "default via 10.0.2.2 dev eth0 proto dhcp metric 100\n10.0.2.0/24 dev eth0\n";
        assert_eq!(parse_default_route(output), Some(ip("10.0.2.2")));
    }

    #[test]
    fn default_route_absent_yields_none() {
        assert_eq!(parse_default_route("10.0.2.0/24 dev eth0\n"), None);
    }

    #[test]
    fn parses_route_print_gateway_column() {
        let output = "\
          0.0.0.0          0.0.0.0      192.168.1.1    192.168.1.100     25
";
        assert_eq!(parse_route_print(output), Some(ip("192.168.1.1")));
    }
}
