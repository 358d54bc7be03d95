use crate as gossamer;
use crate::core::Member;
use crate::replication::Replication;
use crate::GossipInterface;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Expiry for data that should live until it is overwritten.
pub const NEVER_EXPIRES: u64 = u64::MAX;

/// Per-node data key under which a member records its own shutdown, so the news keeps spreading
/// after the member is gone.
pub const SHUTDOWN_KEY: &str = "gossip.core.shutdown";

/// A membership digest: the sender, with its current heartbeat, and every member it believes to
/// be alive.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ActiveGossipMessage {
  pub uuid: Uuid,
  pub sender: Member,
  pub members: Vec<Member>,
}

/// The reply to an [`ActiveGossipMessage`], carrying the responder's own digest.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ActiveGossipOk {
  pub uuid: Uuid,
  pub sender: Member,
  pub members: Vec<Member>,
}

/// Sent by a member that is leaving the cluster.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ShutdownMessage {
  pub cluster: String,
  pub node_id: String,
  pub shutdown_at: u64,
}

/// A value owned by one node. Only that node writes it; everyone else keeps the newest copy.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PerNodeDataMessage {
  pub node_id: String,
  pub key: String,
  pub payload: Vec<u8>,
  pub timestamp: u64,
  pub expire_at: u64,
  pub replication: Replication,
}
impl PerNodeDataMessage {
  pub fn new<N: Into<String>, K: Into<String>>(
    node_id: N,
    key: K,
    payload: Vec<u8>,
    timestamp: u64,
  ) -> PerNodeDataMessage {
    PerNodeDataMessage {
      node_id: node_id.into(),
      key: key.into(),
      payload: payload,
      timestamp: timestamp,
      expire_at: NEVER_EXPIRES,
      replication: Replication::default(),
    }
  }

  pub fn expiring_at(mut self, expire_at: u64) -> PerNodeDataMessage {
    self.expire_at = expire_at;
    self
  }

  pub fn replicated<R: Into<Replication>>(mut self, replication: R) -> PerNodeDataMessage {
    self.replication = replication.into();
    self
  }
}

/// A value any node may write. The copy with the newest timestamp wins everywhere.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SharedDataMessage {
  pub key: String,
  pub payload: Vec<u8>,
  pub timestamp: u64,
  pub expire_at: u64,
  pub replication: Replication,
}
impl SharedDataMessage {
  pub fn new<K: Into<String>>(key: K, payload: Vec<u8>, timestamp: u64) -> SharedDataMessage {
    SharedDataMessage {
      key: key.into(),
      payload: payload,
      timestamp: timestamp,
      expire_at: NEVER_EXPIRES,
      replication: Replication::default(),
    }
  }

  pub fn expiring_at(mut self, expire_at: u64) -> SharedDataMessage {
    self.expire_at = expire_at;
    self
  }

  pub fn replicated<R: Into<Replication>>(mut self, replication: R) -> SharedDataMessage {
    self.replication = replication.into();
    self
  }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PerNodeDataBulkMessage {
  pub uuid: Uuid,
  pub sender: Member,
  pub messages: Vec<PerNodeDataMessage>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SharedDataBulkMessage {
  pub uuid: Uuid,
  pub sender: Member,
  pub messages: Vec<SharedDataMessage>,
}

/// Every message a member sends or receives.
#[derive(Clone, Debug, Deserialize, GossipInterface, Serialize)]
pub enum GossipMessage {
  #[gossip]
  Response(ActiveGossipOk),
  #[gossip]
  Shutdown(ShutdownMessage),
  #[gossip]
  PerNodeData(PerNodeDataMessage),
  #[gossip]
  SharedData(SharedDataMessage),
  #[gossip]
  ActiveGossip(ActiveGossipMessage),
  #[gossip]
  PerNodeDataBulk(PerNodeDataBulkMessage),
  #[gossip]
  SharedDataBulk(SharedDataBulkMessage),
}
impl GossipMessage {
  /// The logical key of the message: the exchange id for digests and bulk transfers, the node
  /// for shutdowns, and the data key for user data.
  pub fn key(&self) -> String {
    match self {
      GossipMessage::Response(m) => m.uuid.to_string(),
      GossipMessage::Shutdown(m) => m.node_id.clone(),
      GossipMessage::PerNodeData(m) => format!("{}/{}", m.node_id, m.key),
      GossipMessage::SharedData(m) => m.key.clone(),
      GossipMessage::ActiveGossip(m) => m.uuid.to_string(),
      GossipMessage::PerNodeDataBulk(m) => m.uuid.to_string(),
      GossipMessage::SharedDataBulk(m) => m.uuid.to_string(),
    }
  }
}

#[cfg(test)]
use crate::core::{Serializer, Socket};
#[cfg(test)]
use crate::handlers::{Case, MessageKind};
#[cfg(test)]
use crate::replication::WhiteListReplicable;

#[test]
fn test_gossip_message_projection() {
  let msg: GossipMessage = SharedDataMessage::new("colour", b"red".to_vec(), 5).into();
  assert_eq!(msg.kind(), "SharedData");
  assert_eq!(msg.key(), "colour");
  let shared: Option<&SharedDataMessage> = msg.project();
  assert_eq!(shared.map(|m| m.timestamp), Some(5));
  let shutdown: Option<&ShutdownMessage> = msg.project();
  assert!(shutdown.is_none());
}

#[test]
fn test_gossip_message_wire_format() {
  let dest = Member::new("c", "b", Socket::localhost(2));
  let msg: GossipMessage = PerNodeDataMessage::new("a", "load", vec![1, 2, 3], 10)
    .expiring_at(100)
    .replicated(WhiteListReplicable::new(Some(vec![dest])))
    .into();
  for serializer in [Serializer::Cbor, Serializer::Json].iter() {
    let bytes = serializer.to_vec(&msg).unwrap();
    let back: GossipMessage = serializer.from_slice(&bytes).unwrap();
    let data: &PerNodeDataMessage = back.project().unwrap();
    let orig: &PerNodeDataMessage = msg.project().unwrap();
    assert_eq!(data, orig);
    assert_eq!(back.key(), "a/load");
  }
}
