use crate::cluster::GossipCore;
use crate::core::Member;
use crate::handlers::{Case, ConcurrentHandler, Handler, MessageHandler, Typed};
use crate::model::{
  ActiveGossipMessage, ActiveGossipOk, PerNodeDataBulkMessage, PerNodeDataMessage,
  SharedDataBulkMessage, SharedDataMessage, ShutdownMessage, NEVER_EXPIRES, SHUTDOWN_KEY,
};
use crate::replication::Replication;
use std::iter::once;
use std::sync::Arc;
use tracing::trace;

/// Merges the responder's digest and wakes up the gossip round waiting for it.
pub struct ResponseHandler;
impl MessageHandler<ActiveGossipOk> for ResponseHandler {
  fn invoke(&self, core: &GossipCore, msg: &ActiveGossipOk) -> bool {
    if !core.same_cluster(&msg.sender.cluster, "response") {
      return true;
    }
    core.merge_members(once(&msg.sender).chain(msg.members.iter()));
    core.complete_response(msg.clone());
    true
  }
}

/// Marks the sender dead and remembers the shutdown as per-node data, so it keeps spreading.
pub struct ShutdownMessageHandler;
impl MessageHandler<ShutdownMessage> for ShutdownMessageHandler {
  fn invoke(&self, core: &GossipCore, msg: &ShutdownMessage) -> bool {
    if !core.same_cluster(&msg.cluster, "shutdown") {
      return true;
    }
    let record = PerNodeDataMessage {
      node_id: msg.node_id.clone(),
      key: SHUTDOWN_KEY.to_string(),
      payload: msg.shutdown_at.to_be_bytes().to_vec(),
      timestamp: msg.shutdown_at,
      expire_at: NEVER_EXPIRES,
      replication: Replication::default(),
    };
    core.data().merge_per_node(record);
    if let Some(event) = core.registry().mark_shut_down(&msg.node_id, msg.shutdown_at) {
      core.publish(vec![event]);
    }
    true
  }
}

pub struct PerNodeDataMessageHandler;
impl MessageHandler<PerNodeDataMessage> for PerNodeDataMessageHandler {
  fn invoke(&self, core: &GossipCore, msg: &PerNodeDataMessage) -> bool {
    core.data().merge_per_node(msg.clone());
    true
  }
}

pub struct SharedDataMessageHandler;
impl MessageHandler<SharedDataMessage> for SharedDataMessageHandler {
  fn invoke(&self, core: &GossipCore, msg: &SharedDataMessage) -> bool {
    core.data().merge_shared(msg.clone());
    true
  }
}

/// Merges an inbound digest and answers with our own.
pub struct ActiveGossipMessageHandler;
impl MessageHandler<ActiveGossipMessage> for ActiveGossipMessageHandler {
  fn invoke(&self, core: &GossipCore, msg: &ActiveGossipMessage) -> bool {
    if !core.same_cluster(&msg.sender.cluster, "digest") {
      return true;
    }
    core.note_sender(&msg.sender.id);
    core.merge_members(once(&msg.sender).chain(msg.members.iter()));
    let (me, members) = core.digest();
    let reply = ActiveGossipOk {
      uuid: msg.uuid,
      sender: me,
      members: members,
    };
    trace!("{}: answering digest {} from {}", core.id(), msg.uuid, msg.sender.id);
    core.send_detached(msg.sender.socket.clone(), reply.into());
    true
  }
}

pub struct PerNodeDataBulkMessageHandler;
impl MessageHandler<PerNodeDataBulkMessage> for PerNodeDataBulkMessageHandler {
  fn invoke(&self, core: &GossipCore, msg: &PerNodeDataBulkMessage) -> bool {
    if !core.same_cluster(&msg.sender.cluster, "per-node data") {
      return true;
    }
    for data in &msg.messages {
      core.data().merge_per_node(data.clone());
    }
    true
  }
}

pub struct SharedDataBulkMessageHandler;
impl MessageHandler<SharedDataBulkMessage> for SharedDataBulkMessageHandler {
  fn invoke(&self, core: &GossipCore, msg: &SharedDataBulkMessage) -> bool {
    if !core.same_cluster(&msg.sender.cluster, "shared data") {
      return true;
    }
    for data in &msg.messages {
      core.data().merge_shared(data.clone());
    }
    true
  }
}

/// One composite holding a typed handler for every message a member exchanges with its peers.
/// Works on any union that has all seven of them as variants.
pub fn default_handler<M>() -> ConcurrentHandler<M>
where
  M: Case<ActiveGossipOk>
    + Case<ShutdownMessage>
    + Case<PerNodeDataMessage>
    + Case<SharedDataMessage>
    + Case<ActiveGossipMessage>
    + Case<PerNodeDataBulkMessage>
    + Case<SharedDataBulkMessage>
    + 'static,
{
  let handlers: Vec<Handler<M>> = vec![
    Arc::new(Typed::<ActiveGossipOk, _>::new(ResponseHandler)),
    Arc::new(Typed::<ShutdownMessage, _>::new(ShutdownMessageHandler)),
    Arc::new(Typed::<PerNodeDataMessage, _>::new(PerNodeDataMessageHandler)),
    Arc::new(Typed::<SharedDataMessage, _>::new(SharedDataMessageHandler)),
    Arc::new(Typed::<ActiveGossipMessage, _>::new(ActiveGossipMessageHandler)),
    Arc::new(Typed::<PerNodeDataBulkMessage, _>::new(PerNodeDataBulkMessageHandler)),
    Arc::new(Typed::<SharedDataBulkMessage, _>::new(SharedDataBulkMessageHandler)),
  ];
  ConcurrentHandler::new(handlers)
}

/// Members whose shutdown record is at least as new as their heartbeat. Used by the liveness
/// check to honour shutdowns it only heard about second hand.
pub(crate) fn recorded_shutdowns(core: &GossipCore) -> Vec<(Member, u64)> {
  core
    .data()
    .per_node_by_key(SHUTDOWN_KEY)
    .into_iter()
    .filter_map(|record| {
      let mut bytes = [0u8; 8];
      if record.payload.len() != bytes.len() {
        return None;
      }
      bytes.copy_from_slice(&record.payload);
      let at = u64::from_be_bytes(bytes);
      core.registry().get(&record.node_id).filter(|m| m.heartbeat <= at).map(|m| (m, at))
    })
    .collect()
}

#[cfg(test)]
use crate::core::{now_millis, GossipSettings, MemberState, Socket};
#[cfg(test)]
use crate::model::GossipMessage;
#[cfg(test)]
use crate::testkit::LoopbackNetwork;
#[cfg(test)]
use uuid::Uuid;

#[cfg(test)]
fn core() -> GossipCore {
  let socket = Socket::localhost(6100);
  let transport = LoopbackNetwork::reliable().bind(socket.clone());
  GossipCore::new(Member::new("c", "me", socket), GossipSettings::default(), transport)
}

#[test]
fn test_default_handler_merges_data() {
  let core = core();
  let handler = default_handler::<GossipMessage>();
  assert_eq!(handler.len(), 7);
  assert!(handler.invoke(&core, &SharedDataMessage::new("k", vec![1], 10).into()));
  assert!(handler.invoke(&core, &SharedDataMessage::new("k", vec![2], 5).into()));
  assert_eq!(core.data().shared("k").unwrap().payload, vec![1]);

  let sender = Member::new("c", "you", Socket::localhost(6101));
  let bulk = PerNodeDataBulkMessage {
    uuid: Uuid::new_v4(),
    sender: sender.clone(),
    messages: vec![
      PerNodeDataMessage::new("you", "a", vec![1], 1),
      PerNodeDataMessage::new("you", "b", vec![2], 1),
    ],
  };
  assert!(handler.invoke(&core, &bulk.into()));
  assert_eq!(core.data().per_node("you", "b").unwrap().payload, vec![2]);

  let stranger = Member::new("elsewhere", "x", Socket::localhost(6102));
  let foreign = SharedDataBulkMessage {
    uuid: Uuid::new_v4(),
    sender: stranger,
    messages: vec![SharedDataMessage::new("f", vec![], 1)],
  };
  assert!(handler.invoke(&core, &foreign.into()));
  assert!(core.data().shared("f").is_none());
}

#[test]
fn test_response_handler_merges_digest() {
  let core = core();
  let handler = default_handler::<GossipMessage>();
  let uuid = Uuid::new_v4();
  let mut rx = core.expect_response(uuid);
  let response = ActiveGossipOk {
    uuid: uuid,
    sender: Member::new("c", "you", Socket::localhost(6101)).with_heartbeat(now_millis()),
    members: vec![Member::new("c", "them", Socket::localhost(6102)).with_heartbeat(1)],
  };
  assert!(handler.invoke(&core, &response.into()));
  assert!(rx.try_recv().is_ok());
  let ids = core.registry().live_members().into_iter().map(|m| m.id).collect::<Vec<_>>();
  assert_eq!(ids, vec!["them", "you"]);
}

#[test]
fn test_shutdown_handler_downs_member() {
  let core = core();
  let handler = default_handler::<GossipMessage>();
  let you = Member::new("c", "you", Socket::localhost(6101)).with_heartbeat(100);
  core.merge_members(&[you]);
  let shutdown = ShutdownMessage {
    cluster: "c".to_string(),
    node_id: "you".to_string(),
    shutdown_at: 200,
  };
  assert!(handler.invoke(&core, &shutdown.into()));
  assert_eq!(core.registry().state("you"), Some(MemberState::Dead));
  assert_eq!(core.data().per_node("you", SHUTDOWN_KEY).unwrap().timestamp, 200);
  // The record matches the raised counter, so stale gossip cannot revive the member.
  assert_eq!(recorded_shutdowns(&core).len(), 1);
  core.merge_members(&[Member::new("c", "you", Socket::localhost(6101)).with_heartbeat(150)]);
  assert_eq!(core.registry().state("you"), Some(MemberState::Dead));
}
