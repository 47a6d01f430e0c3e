//! Active subnet sweep.
//!
//! Probes every address of a subnet with a short TCP connect on the device
//! control port and records the MAC of each host that accepts. The resulting
//! table is only a fallback MAC source for devices heard on broadcast.

use super::arp::MacResolver;
use crate::config::DEFAULT_SUBNET;
use crate::error::SweepError;
use ipnetwork::{IpNetwork, Ipv4Network};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

/// Prefix assumed for the local network
const LOCAL_PREFIX: u8 = 24;

/// Hosts found by the sweep, keyed by IP. MAC is empty when it could not be
/// resolved.
#[derive(Debug, Clone, Default)]
pub struct SweepTable {
    by_ip: HashMap<String, String>,
}

impl SweepTable {
    pub fn insert(&mut self, ip: impl Into<String>, mac: impl Into<String>) {
        self.by_ip.insert(ip.into(), mac.into());
    }

    pub fn mac_for(&self, ip: &str) -> Option<&str> {
        self.by_ip
            .get(ip)
            .map(String::as_str)
            .filter(|mac| !mac.is_empty())
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_ip.iter().map(|(ip, mac)| (ip.as_str(), mac.as_str()))
    }
}

/// Address of the interface that routes to the internet. No packet is sent:
/// connecting a UDP socket only selects a route.
pub async fn detect_local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect("8.8.8.8:80").await.ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

fn local_network(ip: Ipv4Addr) -> Option<Ipv4Network> {
    let net = Ipv4Network::new(ip, LOCAL_PREFIX).ok()?;
    Ipv4Network::new(net.network(), LOCAL_PREFIX).ok()
}

/// Parse a CIDR string into the network it names (host bits cleared).
pub fn parse_subnet(subnet: &str) -> Result<Ipv4Network, SweepError> {
    match subnet.trim().parse::<IpNetwork>() {
        Ok(IpNetwork::V4(net)) => Ipv4Network::new(net.network(), net.prefix())
            .map_err(|_| SweepError::InvalidSubnet(subnet.to_string())),
        Ok(IpNetwork::V6(_)) => Err(SweepError::UnsupportedSubnet(subnet.to_string())),
        Err(_) => Err(SweepError::InvalidSubnet(subnet.to_string())),
    }
}

/// Subnet to sweep: the configured one, else the local /24, else the default.
pub async fn sweep_target(configured: Option<&str>) -> Result<Ipv4Network, SweepError> {
    if let Some(subnet) = configured {
        return parse_subnet(subnet);
    }

    match detect_local_ipv4().await.and_then(local_network) {
        Some(network) => {
            tracing::debug!("Detected local network {}", network);
            Ok(network)
        }
        None => {
            tracing::warn!(
                "Unable to detect local IP address, using {}",
                DEFAULT_SUBNET
            );
            parse_subnet(DEFAULT_SUBNET)
        }
    }
}

/// Probe every address in `network` in sequence.
///
/// Stops early (returning what it found so far) when `cancel` fires.
pub async fn sweep_subnet(
    network: Ipv4Network,
    port: u16,
    probe_timeout: Duration,
    resolver: &dyn MacResolver,
    cancel: &CancellationToken,
) -> SweepTable {
    let mut table = SweepTable::default();
    let total_hosts = network.size();
    let start = Instant::now();

    tracing::info!(
        "Sweeping {} hosts in {} on TCP {}",
        total_hosts,
        network,
        port
    );

    for (checked, addr) in network.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!("Sweep cancelled after {} hosts", checked);
            break;
        }

        let target = SocketAddr::new(IpAddr::V4(addr), port);
        let accepted = matches!(
            tokio::time::timeout(probe_timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        );
        if !accepted {
            continue;
        }

        let mac = resolver.resolve(addr).await.unwrap_or_default();
        tracing::debug!("Found host {} [{}]", addr, mac);
        table.insert(addr.to_string(), mac);
    }

    tracing::info!(
        "Sweep complete: {} hosts accepted in {:.1}s",
        table.len(),
        start.elapsed().as_secs_f64()
    );

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    struct FixedResolver {
        mac: Option<String>,
        asked: Mutex<Vec<Ipv4Addr>>,
    }

    impl FixedResolver {
        fn new(mac: Option<&str>) -> Self {
            Self {
                mac: mac.map(String::from),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    impl MacResolver for FixedResolver {
        fn resolve(&self, ip: Ipv4Addr) -> BoxFuture<'_, Option<String>> {
            self.asked.lock().unwrap().push(ip);
            let mac = self.mac.clone();
            Box::pin(async move { mac })
        }
    }

    #[test]
    fn test_parse_subnet_clears_host_bits() {
        let net = parse_subnet("192.168.1.77/24").unwrap();
        assert_eq!(net.network(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(net.prefix(), 24);
    }

    #[test]
    fn test_parse_subnet_errors() {
        assert!(matches!(
            parse_subnet("not a subnet"),
            Err(SweepError::InvalidSubnet(_))
        ));
        assert!(matches!(
            parse_subnet("fe80::/64"),
            Err(SweepError::UnsupportedSubnet(_))
        ));
    }

    #[test]
    fn test_local_network_is_slash_24() {
        let net = local_network(Ipv4Addr::new(10, 0, 0, 42)).unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/24");
    }

    #[tokio::test]
    async fn test_configured_subnet_wins() {
        let net = sweep_target(Some("10.9.8.0/30")).await.unwrap();
        assert_eq!(net.size(), 4);
    }

    #[tokio::test]
    async fn test_refused_probe_yields_empty_table() {
        // Grab a free port, then close it so connects are refused.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let resolver = FixedResolver::new(Some("aa:bb:cc:dd:ee:ff"));

        let table = sweep_subnet(
            parse_subnet("127.0.0.1/32").unwrap(),
            port,
            Duration::from_millis(200),
            &resolver,
            &CancellationToken::new(),
        )
        .await;

        assert!(table.is_empty());
        assert!(resolver.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accepting_host_recorded_with_mac() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let resolver = FixedResolver::new(Some("10:D5:61:AA:BB:CC"));

        let table = sweep_subnet(
            parse_subnet("127.0.0.1/32").unwrap(),
            port,
            Duration::from_millis(500),
            &resolver,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(table.len(), 1);
        assert_eq!(table.mac_for("127.0.0.1"), Some("10:D5:61:AA:BB:CC"));
    }

    #[tokio::test]
    async fn test_unresolved_mac_is_not_offered() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let resolver = FixedResolver::new(None);

        let table = sweep_subnet(
            parse_subnet("127.0.0.1/32").unwrap(),
            port,
            Duration::from_millis(500),
            &resolver,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(table.len(), 1);
        assert_eq!(table.mac_for("127.0.0.1"), None);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_probes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let resolver = FixedResolver::new(None);

        let table = sweep_subnet(
            parse_subnet("10.255.255.0/24").unwrap(),
            6668,
            Duration::from_millis(10),
            &resolver,
            &cancel,
        )
        .await;

        assert!(table.is_empty());
    }
}
