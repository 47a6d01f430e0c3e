//! Dual-port UDP broadcast listener.

use super::Dialect;
use crate::config::ScanPorts;
use crate::error::{Result, ScanError};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Result of one bounded receive.
#[derive(Debug)]
pub enum Reception {
    Datagram { data: Vec<u8>, peer: SocketAddr },
    /// Timed out or failed; both count as silence.
    Silence,
}

/// Owns one receive socket per dialect. Dropping the listener closes both.
pub struct BroadcastListener {
    legacy: UdpSocket,
    encrypted: UdpSocket,
    recv_timeout: Duration,
    buf: Vec<u8>,
}

/// Create a UDP socket with broadcast enabled, bound to 0.0.0.0 on `port`.
fn create_broadcast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&socket2::SockAddr::from(bind_addr))?;
    UdpSocket::from_std(socket.into())
}

impl BroadcastListener {
    /// Bind both dialect ports. Failing to bind either one is fatal.
    pub fn bind(ports: ScanPorts, recv_timeout: Duration, max_datagram: usize) -> Result<Self> {
        let legacy = create_broadcast_socket(ports.udp_a).map_err(|source| ScanError::Bind {
            port: ports.udp_a,
            source,
        })?;
        let encrypted = create_broadcast_socket(ports.udp_b).map_err(|source| ScanError::Bind {
            port: ports.udp_b,
            source,
        })?;

        tracing::info!(
            "Listening for broadcasts on UDP {} and {}",
            ports.udp_a,
            ports.udp_b
        );

        Ok(Self {
            legacy,
            encrypted,
            recv_timeout,
            buf: vec![0u8; max_datagram],
        })
    }

    /// Port actually bound for `dialect` (differs from the configured one
    /// when port 0 was requested).
    pub fn local_port(&self, dialect: Dialect) -> Option<u16> {
        self.socket(dialect).local_addr().ok().map(|a| a.port())
    }

    fn socket(&self, dialect: Dialect) -> &UdpSocket {
        match dialect {
            Dialect::Legacy => &self.legacy,
            Dialect::Encrypted => &self.encrypted,
        }
    }

    /// Wait up to the receive timeout for one datagram on `dialect`.
    pub async fn receive(&mut self, dialect: Dialect) -> Reception {
        let socket = match dialect {
            Dialect::Legacy => &self.legacy,
            Dialect::Encrypted => &self.encrypted,
        };

        match tokio::time::timeout(self.recv_timeout, socket.recv_from(&mut self.buf)).await {
            Ok(Ok((len, peer))) => Reception::Datagram {
                data: self.buf[..len].to_vec(),
                peer,
            },
            Ok(Err(e)) => {
                tracing::debug!("Receive error on {} port: {}", dialect, e);
                Reception::Silence
            }
            Err(_) => Reception::Silence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral() -> ScanPorts {
        ScanPorts {
            udp_a: 0,
            udp_b: 0,
            tcp: 0,
        }
    }

    #[tokio::test]
    async fn test_receive_tags_datagram_by_port() {
        let mut listener =
            BroadcastListener::bind(ephemeral(), Duration::from_millis(200), 4048).unwrap();
        let port_b = listener.local_port(Dialect::Encrypted).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"hello", ("127.0.0.1", port_b)).await.unwrap();

        match listener.receive(Dialect::Encrypted).await {
            Reception::Datagram { data, peer } => {
                assert_eq!(data, b"hello");
                assert_eq!(peer, sender.local_addr().unwrap());
            }
            Reception::Silence => panic!("expected a datagram"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_silence() {
        let mut listener =
            BroadcastListener::bind(ephemeral(), Duration::from_millis(20), 4048).unwrap();
        assert!(matches!(
            listener.receive(Dialect::Legacy).await,
            Reception::Silence
        ));
    }

    #[tokio::test]
    async fn test_bind_failure_names_port() {
        let holder = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let taken = holder.local_addr().unwrap().port();

        // holder has no SO_REUSEADDR
        let result = BroadcastListener::bind(
            ScanPorts {
                udp_a: 0,
                udp_b: taken,
                tcp: 0,
            },
            Duration::from_millis(20),
            4048,
        );
        match result {
            Err(ScanError::Bind { port, .. }) => assert_eq!(port, taken),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("bind should fail"),
        }
    }
}
