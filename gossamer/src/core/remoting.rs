use crate::core::GossipError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tokio::net::lookup_host;

#[derive(
  Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize,
)]
pub enum Host {
  DNS(String),
  IP(IpAddr),
}

/// The address a member receives gossip on.
#[derive(
  Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, Ord, PartialOrd,
)]
pub struct Socket {
  pub host: Host,
  pub port: u16,
}
impl Socket {
  pub fn new(host: Host, port: u16) -> Socket {
    Socket {
      host: host,
      port: port,
    }
  }

  pub fn localhost(port: u16) -> Socket {
    Socket::new(Host::DNS("localhost".to_string()), port)
  }

  pub async fn as_udp_addr(&self) -> std::io::Result<Vec<SocketAddr>> {
    match &self.host {
      Host::IP(ip) => Ok(vec![SocketAddr::new(*ip, self.port)]),
      Host::DNS(s) => lookup_host((s.as_str(), self.port))
        .await
        .map(|x| x.filter(|a| a.is_ipv4()).collect()),
    }
  }

  /// First IPv4 address this socket resolves to.
  pub async fn resolve(&self) -> Result<SocketAddr, GossipError> {
    self
      .as_udp_addr()
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| GossipError::Resolve(self.to_string()))
  }
}
impl From<SocketAddr> for Socket {
  fn from(addr: SocketAddr) -> Self {
    Socket::new(Host::IP(addr.ip()), addr.port())
  }
}
impl fmt::Display for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.host {
      Host::DNS(s) => write!(f, "{}:{}", s, self.port),
      Host::IP(IpAddr::V6(ip)) => write!(f, "[{}]:{}", ip, self.port),
      Host::IP(ip) => write!(f, "{}:{}", ip, self.port),
    }
  }
}
impl FromStr for Socket {
  type Err = GossipError;

  /// Accepts `host:port`, where host is an IP literal or a DNS name. A leading `udp://` is
  /// tolerated so URIs from older configuration files still parse.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim_start_matches("udp://");
    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
      return Ok(addr.into());
    }
    let (host, port) = trimmed
      .rsplit_once(':')
      .ok_or_else(|| GossipError::InvalidSetting(format!("`{}` has no port", s)))?;
    let port = port
      .parse::<u16>()
      .map_err(|_| GossipError::InvalidSetting(format!("`{}` has an invalid port", s)))?;
    if host.is_empty() {
      return Err(GossipError::InvalidSetting(format!("`{}` has no host", s)));
    }
    Ok(Socket::new(Host::DNS(host.to_string()), port))
  }
}

#[test]
fn test_socket_parse() {
  let ip = "127.0.0.1:5000".parse::<Socket>().unwrap();
  assert_eq!(ip.host, Host::IP("127.0.0.1".parse().unwrap()));
  assert_eq!(ip.port, 5000);
  assert_eq!(ip.to_string(), "127.0.0.1:5000");

  let dns = "udp://localhost:2000".parse::<Socket>().unwrap();
  assert_eq!(dns, Socket::localhost(2000));

  assert!("localhost".parse::<Socket>().is_err());
  assert!("localhost:http".parse::<Socket>().is_err());
  assert!(":80".parse::<Socket>().is_err());
}

#[test]
fn test_socket_resolve_ip_literal() {
  let socket = "10.1.2.3:7001".parse::<Socket>().unwrap();
  let addr = tokio_test::block_on(socket.resolve()).unwrap();
  assert_eq!(addr, "10.1.2.3:7001".parse::<SocketAddr>().unwrap());
  assert_eq!(Socket::from(addr), socket);
}
