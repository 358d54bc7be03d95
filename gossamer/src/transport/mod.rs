//! Moving [`GossipMessage`]s between members.
//!
//! A [`Transport`] only knows how to send one message to a socket and receive the next one sent
//! to us. [`UdpTransport`] does that over real datagrams, and
//! [`LoopbackTransport`](crate::testkit::LoopbackTransport) inside one process. The
//! [`TransportManager`] owns the receive loop that feeds the handler chain.

mod manager;
mod udp;

use crate::core::{GossipError, Socket};
use crate::model::GossipMessage;
use async_trait::async_trait;

#[rustfmt::skip]
pub use {
  manager::TransportManager,
  udp::UdpTransport,
  udp::MAX_DATAGRAM,
};

#[async_trait]
pub trait Transport: Send + Sync + 'static {
  /// Where this transport receives.
  fn local(&self) -> &Socket;

  async fn send(&self, to: &Socket, msg: &GossipMessage) -> Result<(), GossipError>;

  /// Waits for the next message. Undecodable input is skipped, not returned. Fails with
  /// [`GossipError::Closed`] once nothing more can arrive.
  async fn recv(&self) -> Result<GossipMessage, GossipError>;
}
