//! Worker discovery over the local subnet
//!
//! Finds candidate worker endpoints by probing every other host in the local
//! /24, either with an ICMP reachability check (ping) or by handshaking the
//! worker agent's HTTP surface. Discovery never fails: on any total network
//! failure it returns an empty list, which the master controller treats as
//! "no fleet available".

use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

/// Default port the worker agent listens on
pub const DEFAULT_AGENT_PORT: u16 = 8700;

/// Address used to learn the local outbound interface; no datagram is sent
const PROBE_TARGET: &str = "8.8.8.8:80";

// ============================================================================
// Scan Configuration
// ============================================================================

/// Parameters for a subnet scan
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Debug shortcut: skip probing and return only the loopback address
    pub local_only: bool,

    /// Worker agent port (agent probing only)
    pub port: u16,

    /// Per-host probe timeout
    pub probe_timeout: Duration,

    /// Maximum concurrent probes in flight
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            local_only: false,
            port: DEFAULT_AGENT_PORT,
            probe_timeout: Duration::from_secs(2),
            concurrency: 64,
        }
    }
}

impl ScanConfig {
    /// Scan configuration for local debugging
    pub fn local() -> Self {
        Self {
            local_only: true,
            ..Default::default()
        }
    }
}

// ============================================================================
// Scanning
// ============================================================================

/// Probe the subnet for hosts running a worker agent
///
/// A host counts as discovered when anything answers HTTP on the agent port
/// within the timeout — even an error status proves a listener is present.
/// Results are deduplicated and sorted by the last address octet.
pub async fn scan_agents(config: &ScanConfig) -> Vec<String> {
    if config.local_only {
        return vec![Ipv4Addr::LOCALHOST.to_string()];
    }

    let Some(local_ip) = local_ipv4() else {
        warn!("Could not determine local IP address, is the network up?");
        return Vec::new();
    };

    let candidates = subnet_hosts(local_ip);
    info!(
        local_ip = %local_ip,
        candidates = candidates.len(),
        port = config.port,
        "Scanning subnet for worker agents"
    );

    let client = match reqwest::Client::builder()
        .timeout(config.probe_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to build probe client: {e}");
            return Vec::new();
        }
    };

    let port = config.port;
    let mut found: Vec<String> = stream::iter(candidates)
        .map(|ip| {
            let client = client.clone();
            async move { probe_agent(&client, ip, port).await }
        })
        .buffer_unordered(config.concurrency)
        .filter_map(|hit| async move { hit })
        .collect()
        .await;

    finalize_results(&mut found);
    info!(found = found.len(), "Agent scan complete");
    found
}

/// Probe the subnet for hosts answering ICMP echo
///
/// Cheaper than the agent probe but only proves reachability, not that a
/// worker agent is running.
pub async fn scan_ping(config: &ScanConfig) -> Vec<String> {
    if config.local_only {
        return vec![Ipv4Addr::LOCALHOST.to_string()];
    }

    let Some(local_ip) = local_ipv4() else {
        warn!("Could not determine local IP address, is the network up?");
        return Vec::new();
    };

    let candidates = subnet_hosts(local_ip);
    info!(
        local_ip = %local_ip,
        candidates = candidates.len(),
        "Scanning subnet with ping"
    );

    let timeout = config.probe_timeout;
    let mut found: Vec<String> = stream::iter(candidates)
        .map(|ip| async move { ping_host(ip, timeout).await })
        .buffer_unordered(config.concurrency)
        .filter_map(|hit| async move { hit })
        .collect()
        .await;

    finalize_results(&mut found);
    info!(found = found.len(), "Ping scan complete");
    found
}

// ============================================================================
// Probes
// ============================================================================

/// HTTP handshake against the worker agent's health endpoint
async fn probe_agent(client: &reqwest::Client, ip: Ipv4Addr, port: u16) -> Option<String> {
    let url = format!("http://{ip}:{port}/api/health");
    match client.get(&url).send().await {
        // Any HTTP answer proves a listener on the agent port
        Ok(response) => {
            debug!(ip = %ip, status = %response.status(), "Agent probe answered");
            Some(ip.to_string())
        }
        Err(_) => None,
    }
}

/// Single ICMP echo with a short deadline, via the platform ping binary
async fn ping_host(ip: Ipv4Addr, timeout: Duration) -> Option<String> {
    let mut command = tokio::process::Command::new("ping");
    if cfg!(windows) {
        command.args(["-n", "1", "-w", "1000"]);
    } else {
        command.args(["-c", "1", "-W", "1"]);
    }
    command
        .arg(ip.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    match tokio::time::timeout(timeout, command.status()).await {
        Ok(Ok(status)) if status.success() => Some(ip.to_string()),
        _ => None,
    }
}

// ============================================================================
// Address Helpers
// ============================================================================

/// Local outbound IPv4 address
///
/// Connects a throwaway UDP socket to a public address; the OS picks the
/// outbound interface and no datagram is ever sent.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(PROBE_TARGET).ok()?;
    match socket.local_addr().ok()? {
        std::net::SocketAddr::V4(addr) => Some(*addr.ip()),
        _ => None,
    }
}

/// All other hosts in the local /24
pub fn subnet_hosts(local_ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let octets = local_ip.octets();
    (1..=254u8)
        .map(|last| Ipv4Addr::new(octets[0], octets[1], octets[2], last))
        .filter(|ip| *ip != local_ip)
        .collect()
}

/// Dedup and order by the last address octet
fn finalize_results(results: &mut Vec<String>) {
    results.sort_by_key(|ip| {
        ip.rsplit('.')
            .next()
            .and_then(|octet| octet.parse::<u8>().ok())
            .unwrap_or(u8::MAX)
    });
    results.dedup();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_only_returns_loopback() {
        let agents = scan_agents(&ScanConfig::local()).await;
        assert_eq!(agents, vec!["127.0.0.1".to_string()]);

        let pinged = scan_ping(&ScanConfig::local()).await;
        assert_eq!(pinged, vec!["127.0.0.1".to_string()]);
    }

    #[test]
    fn test_subnet_hosts_excludes_local() {
        let local = Ipv4Addr::new(192, 168, 1, 42);
        let hosts = subnet_hosts(local);
        assert_eq!(hosts.len(), 253);
        assert!(!hosts.contains(&local));
        assert!(hosts.contains(&Ipv4Addr::new(192, 168, 1, 1)));
        assert!(hosts.contains(&Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[test]
    fn test_finalize_sorts_by_last_octet() {
        let mut results = vec![
            "192.168.1.30".to_string(),
            "192.168.1.2".to_string(),
            "192.168.1.101".to_string(),
            "192.168.1.2".to_string(),
        ];
        finalize_results(&mut results);
        assert_eq!(
            results,
            vec![
                "192.168.1.2".to_string(),
                "192.168.1.30".to_string(),
                "192.168.1.101".to_string(),
            ]
        );
    }

    #[test]
    fn test_default_scan_config() {
        let config = ScanConfig::default();
        assert!(!config.local_only);
        assert_eq!(config.port, DEFAULT_AGENT_PORT);
        assert_eq!(config.concurrency, 64);
    }
}
