use crate::core::{GossipError, Serializer, Socket};
use crate::model::GossipMessage;
use crate::transport::Transport;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use tokio::net::UdpSocket;
use tracing::{trace, warn};

/// The largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM: usize = 65507;

/// One datagram per message, encoded with the configured [`Serializer`].
pub struct UdpTransport {
  local: Socket,
  udp: UdpSocket,
  serializer: Serializer,
}
impl UdpTransport {
  /// Binds every interface on `local`'s port. Port 0 picks a free one, and
  /// [`local`](Transport::local) then reports the port actually bound.
  pub async fn bind(local: Socket, serializer: Serializer) -> Result<UdpTransport, GossipError> {
    let udp = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, local.port)).await?;
    let port = udp.local_addr()?.port();
    Ok(UdpTransport {
      local: Socket::new(local.host, port),
      udp: udp,
      serializer: serializer,
    })
  }
}
#[async_trait]
impl Transport for UdpTransport {
  fn local(&self) -> &Socket {
    &self.local
  }

  async fn send(&self, to: &Socket, msg: &GossipMessage) -> Result<(), GossipError> {
    let bytes = self.serializer.to_vec(msg)?;
    if bytes.len() > MAX_DATAGRAM {
      return Err(GossipError::Oversized(bytes.len()));
    }
    let addr = to.resolve().await?;
    self.udp.send_to(&bytes, addr).await?;
    Ok(())
  }

  async fn recv(&self) -> Result<GossipMessage, GossipError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
      let (len, from) = self.udp.recv_from(&mut buf).await?;
      match self.serializer.from_slice::<GossipMessage>(&buf[..len]) {
        Ok(msg) => {
          trace!("{}: {} bytes from {}", self.local, len, from);
          return Ok(msg);
        }
        Err(e) => warn!("{}: undecodable datagram from {}: {}", self.local, from, e),
      }
    }
  }
}

#[cfg(test)]
use crate::model::SharedDataMessage;

#[tokio::test]
async fn test_udp_round_trip() {
  let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), Serializer::Cbor).await.unwrap();
  let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), Serializer::Cbor).await.unwrap();
  assert_ne!(b.local().port, 0);
  let msg: GossipMessage = SharedDataMessage::new("k", vec![1, 2, 3], 7).into();
  a.send(b.local(), &msg).await.unwrap();
  match b.recv().await.unwrap() {
    GossipMessage::SharedData(m) => assert_eq!(m.payload, vec![1, 2, 3]),
    other => panic!("unexpected {:?}", other),
  }
  let huge: GossipMessage = SharedDataMessage::new("k", vec![7; MAX_DATAGRAM], 7).into();
  match a.send(b.local(), &huge).await {
    Err(GossipError::Oversized(_)) => {}
    other => panic!("expected Oversized, got {:?}", other),
  }
}
