use crate::cluster::{ClusterEvent, DataStore, MemberRegistry};
use crate::core::{now_millis, GossipSettings, Member, Socket};
use crate::handlers::MessageKind;
use crate::model::{ActiveGossipOk, GossipMessage};
use crate::transport::Transport;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, trace, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// State shared by the handlers, the active gossiper and the manager of one member.
pub struct GossipCore {
  me: Member,
  heartbeat: AtomicU64,
  settings: GossipSettings,
  registry: MemberRegistry,
  data: DataStore,
  transport: Arc<dyn Transport>,
  pending: DashMap<Uuid, oneshot::Sender<ActiveGossipOk>>,
  events: broadcast::Sender<ClusterEvent>,
  last_sender: Mutex<Option<String>>,
}
impl GossipCore {
  /// The heartbeat starts at the wall clock, so a restarted member always outruns the counter
  /// it shut down with.
  pub fn new(me: Member, settings: GossipSettings, transport: Arc<dyn Transport>) -> GossipCore {
    let config = settings.detector_config();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    GossipCore {
      heartbeat: AtomicU64::new(me.heartbeat.max(now_millis())),
      registry: MemberRegistry::new(me.cluster.clone(), me.id.clone(), config),
      me: me.with_detector(config),
      settings: settings,
      data: DataStore::new(),
      transport: transport,
      pending: DashMap::new(),
      events: events,
      last_sender: Mutex::new(None),
    }
  }

  pub fn id(&self) -> &str {
    &self.me.id
  }

  pub fn cluster(&self) -> &str {
    &self.me.cluster
  }

  pub fn socket(&self) -> &Socket {
    &self.me.socket
  }

  pub fn settings(&self) -> &GossipSettings {
    &self.settings
  }

  pub fn registry(&self) -> &MemberRegistry {
    &self.registry
  }

  pub fn data(&self) -> &DataStore {
    &self.data
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  pub fn heartbeat(&self) -> u64 {
    self.heartbeat.load(Ordering::SeqCst)
  }

  /// Advances our own heartbeat to the wall clock, or by one if the clock has not moved.
  pub fn bump_heartbeat(&self) -> u64 {
    let now = now_millis();
    let next = |prev: u64| now.max(prev + 1);
    match self.heartbeat.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| Some(next(p))) {
      Ok(prev) | Err(prev) => next(prev),
    }
  }

  /// This member, carrying its current heartbeat.
  pub fn myself(&self) -> Member {
    self.me.clone().with_heartbeat(self.heartbeat())
  }

  /// Ourselves and every member we believe to be alive.
  pub fn digest(&self) -> (Member, Vec<Member>) {
    (self.myself(), self.registry.live_members())
  }

  /// True when `cluster` is ours. Anything else is logged and should be dropped.
  pub fn same_cluster(&self, cluster: &str, what: &str) -> bool {
    if cluster == self.cluster() {
      true
    } else {
      warn!("dropping {} from cluster {}, we are in cluster {}", what, cluster, self.cluster());
      false
    }
  }

  /// Applies gossip about `members` at the current time and tells subscribers what changed.
  pub fn merge_members<'a, I: IntoIterator<Item = &'a Member>>(&self, members: I) {
    let now = now_millis();
    let events = members
      .into_iter()
      .filter_map(|m| self.registry.observe(m, now))
      .collect::<Vec<_>>();
    self.publish(events);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
    self.events.subscribe()
  }

  pub fn publish(&self, events: Vec<ClusterEvent>) {
    for event in events {
      debug!("{}: {:?}", self.id(), event);
      // No subscribers is not an error.
      let _ = self.events.send(event);
    }
  }

  pub fn note_sender(&self, id: &str) {
    *self.last_sender.lock() = Some(id.to_string());
  }

  pub fn last_sender(&self) -> Option<String> {
    self.last_sender.lock().clone()
  }

  /// Registers interest in the reply to digest `uuid`.
  pub fn expect_response(&self, uuid: Uuid) -> oneshot::Receiver<ActiveGossipOk> {
    let (tx, rx) = oneshot::channel();
    self.pending.insert(uuid, tx);
    rx
  }

  /// Hands a reply to whoever is waiting for it. False if nobody is.
  pub fn complete_response(&self, response: ActiveGossipOk) -> bool {
    match self.pending.remove(&response.uuid) {
      Some((_, tx)) => tx.send(response).is_ok(),
      None => {
        trace!("unsolicited response {}", response.uuid);
        false
      }
    }
  }

  pub fn abandon_response(&self, uuid: &Uuid) {
    self.pending.remove(uuid);
  }

  pub fn pending_responses(&self) -> usize {
    self.pending.len()
  }

  /// Sends `msg`, logging instead of returning failures.
  pub async fn send(&self, to: &Socket, msg: &GossipMessage) {
    if let Err(e) = self.transport.send(to, msg).await {
      warn!("{}: could not send {} to {}: {}", self.id(), msg.kind(), to, e);
    }
  }

  /// Sends `msg` from synchronous code, such as a handler, without waiting for it. Outside a
  /// runtime the message is dropped.
  pub fn send_detached(&self, to: Socket, msg: GossipMessage) {
    let handle = match Handle::try_current() {
      Ok(handle) => handle,
      Err(_) => {
        warn!("{}: no runtime to send {} to {}", self.id(), msg.kind(), to);
        return;
      }
    };
    let transport = self.transport.clone();
    let id = self.id().to_string();
    handle.spawn(async move {
      if let Err(e) = transport.send(&to, &msg).await {
        warn!("{}: could not send {} to {}: {}", id, msg.kind(), to, e);
      }
    });
  }
}

#[cfg(test)]
use crate::testkit::LoopbackNetwork;

#[cfg(test)]
fn core() -> GossipCore {
  let socket = Socket::localhost(7000);
  let transport = LoopbackNetwork::reliable().bind(socket.clone());
  GossipCore::new(Member::new("c", "me", socket), GossipSettings::default(), transport)
}

#[test]
fn test_heartbeat_strictly_increases() {
  let core = core();
  let mut previous = core.heartbeat();
  for _ in 0..1000 {
    let next = core.bump_heartbeat();
    assert!(next > previous);
    assert_eq!(next, core.heartbeat());
    previous = next;
  }
  assert_eq!(core.myself().heartbeat, previous);
}

#[test]
fn test_pending_responses() {
  let core = core();
  let uuid = Uuid::new_v4();
  let mut rx = core.expect_response(uuid);
  let response = ActiveGossipOk {
    uuid: uuid,
    sender: Member::new("c", "you", Socket::localhost(7001)),
    members: vec![],
  };
  assert!(core.complete_response(response.clone()));
  assert_eq!(rx.try_recv().map(|r| r.uuid).ok(), Some(uuid));
  assert!(!core.complete_response(response));
  assert_eq!(core.pending_responses(), 0);
}

#[test]
fn test_merge_members_publishes_events() {
  let core = core();
  let mut events = core.subscribe();
  let you = Member::new("c", "you", Socket::localhost(7001)).with_heartbeat(3);
  core.merge_members(&[you.clone(), core.myself()]);
  assert_eq!(events.try_recv().ok(), Some(ClusterEvent::Added(you)));
  assert!(events.try_recv().is_err());
  assert_eq!(core.digest().1.len(), 1);
}
