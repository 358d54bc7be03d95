use crate::core::{GossipError, Serializer, Socket};
use crate::model::GossipMessage;
use crate::testkit::FailureConfigMap;
use crate::transport::Transport;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{trace, warn};

/// An in-process network. Messages still go through the serializer, so anything that would not
/// survive the wire does not survive here either.
pub struct LoopbackNetwork {
  endpoints: DashMap<Socket, UnboundedSender<Vec<u8>>>,
  failures: FailureConfigMap,
  serializer: Serializer,
}
impl LoopbackNetwork {
  pub fn new(failures: FailureConfigMap) -> Arc<LoopbackNetwork> {
    Arc::new(LoopbackNetwork {
      endpoints: DashMap::new(),
      failures: failures,
      serializer: Serializer::Cbor,
    })
  }

  /// A network that never drops or delays anything.
  pub fn reliable() -> Arc<LoopbackNetwork> {
    LoopbackNetwork::new(FailureConfigMap::default())
  }

  /// Attaches an endpoint at `socket`, replacing whatever was there before.
  pub fn bind(self: &Arc<Self>, socket: Socket) -> Arc<LoopbackTransport> {
    let (tx, rx) = unbounded_channel();
    self.endpoints.insert(socket.clone(), tx);
    Arc::new(LoopbackTransport {
      local: socket,
      network: self.clone(),
      inbox: Mutex::new(rx),
    })
  }

  /// Detaches the endpoint at `socket`. Its transport reports [`GossipError::Closed`] once the
  /// messages already queued for it are read, and anything sent to it afterwards is lost.
  pub fn disconnect(&self, socket: &Socket) {
    self.endpoints.remove(socket);
  }

  pub fn is_bound(&self, socket: &Socket) -> bool {
    self.endpoints.contains_key(socket)
  }

  fn deliver(&self, to: &Socket, bytes: Vec<u8>) {
    match self.endpoints.get(to) {
      Some(tx) => {
        if tx.send(bytes).is_err() {
          trace!("endpoint {} is gone", to);
        }
      }
      None => trace!("nobody at {}", to),
    }
  }
}

pub struct LoopbackTransport {
  local: Socket,
  network: Arc<LoopbackNetwork>,
  inbox: Mutex<UnboundedReceiver<Vec<u8>>>,
}
impl LoopbackTransport {
  pub fn network(&self) -> &Arc<LoopbackNetwork> {
    &self.network
  }
}
#[async_trait]
impl Transport for LoopbackTransport {
  fn local(&self) -> &Socket {
    &self.local
  }

  async fn send(&self, to: &Socket, msg: &GossipMessage) -> Result<(), GossipError> {
    let bytes = self.network.serializer.to_vec(msg)?;
    let fail_cfg = self.network.failures.get(to);
    // Serialization happens even for dropped messages, as it would on a real network.
    if rand::random::<f64>() < fail_cfg.drop_prob {
      trace!("{}: dropped a message to {}", self.local, to);
      return Ok(());
    }
    let delay = fail_cfg.delay.map(|(min, max)| {
      let range = min.as_millis()..=max.as_millis().max(min.as_millis());
      Duration::from_millis(SmallRng::from_entropy().gen_range(range) as u64)
    });
    match delay {
      Some(delay) => {
        let network = self.network.clone();
        let to = to.clone();
        tokio::spawn(async move {
          sleep(delay).await;
          network.deliver(&to, bytes);
        });
      }
      None => self.network.deliver(to, bytes),
    }
    Ok(())
  }

  async fn recv(&self) -> Result<GossipMessage, GossipError> {
    let mut inbox = self.inbox.lock().await;
    loop {
      let bytes = inbox.recv().await.ok_or(GossipError::Closed)?;
      match self.network.serializer.from_slice(&bytes) {
        Ok(msg) => return Ok(msg),
        Err(e) => warn!("{}: undecodable message: {}", self.local, e),
      }
    }
  }
}

#[cfg(test)]
use crate::model::SharedDataMessage;
#[cfg(test)]
use crate::testkit::FailureConfig;

#[tokio::test]
async fn test_loopback_delivers_and_closes() {
  let network = LoopbackNetwork::reliable();
  let a = network.bind(Socket::localhost(1));
  let b = network.bind(Socket::localhost(2));
  let msg: GossipMessage = SharedDataMessage::new("k", vec![1], 1).into();
  a.send(b.local(), &msg).await.unwrap();
  assert_eq!(b.recv().await.unwrap().key(), "k");
  a.send(&Socket::localhost(3), &msg).await.unwrap();
  network.disconnect(b.local());
  assert!(!network.is_bound(b.local()));
  match b.recv().await {
    Err(GossipError::Closed) => {}
    other => panic!("expected Closed, got {:?}", other),
  }
}

#[tokio::test]
async fn test_loopback_drops_per_destination() {
  let mut failures = FailureConfigMap::default();
  failures.node_wide.insert(Socket::localhost(2), FailureConfig::dropping(1.0));
  let network = LoopbackNetwork::new(failures);
  let a = network.bind(Socket::localhost(1));
  let b = network.bind(Socket::localhost(2));
  let msg: GossipMessage = SharedDataMessage::new("k", vec![1], 1).into();
  a.send(b.local(), &msg).await.unwrap();
  b.send(a.local(), &msg).await.unwrap();
  assert_eq!(a.recv().await.unwrap().key(), "k");
  let nothing = tokio::time::timeout(Duration::from_millis(50), b.recv()).await;
  assert!(nothing.is_err());
}
