use crate::cluster::{ClusterEvent, GossipCore, RingStatePersister, UserDataPersister};
use crate::core::{now_millis, GossipError, GossipSettings, Member, Socket};
use crate::handlers::{default_handler, recorded_shutdowns, Handler};
use crate::model::{
  GossipMessage, PerNodeDataMessage, SharedDataMessage, ShutdownMessage, NEVER_EXPIRES,
  SHUTDOWN_KEY,
};
use crate::replication::Replication;
use crate::transport::{Transport, TransportManager};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Collects what a [`GossipManager`] needs. `cluster`, `id`, `settings` and `transport` are
/// required. The advertised socket defaults to the transport's own address and the handler to
/// [`default_handler`].
#[derive(Default)]
pub struct GossipManagerBuilder {
  cluster: Option<String>,
  id: Option<String>,
  socket: Option<Socket>,
  settings: Option<GossipSettings>,
  seeds: Vec<Member>,
  properties: BTreeMap<String, String>,
  handler: Option<Handler<GossipMessage>>,
  transport: Option<Arc<dyn Transport>>,
}
impl GossipManagerBuilder {
  pub fn new() -> GossipManagerBuilder {
    GossipManagerBuilder::default()
  }

  pub fn cluster<S: Into<String>>(mut self, cluster: S) -> Self {
    self.cluster = Some(cluster.into());
    self
  }

  pub fn id<S: Into<String>>(mut self, id: S) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn socket(mut self, socket: Socket) -> Self {
    self.socket = Some(socket);
    self
  }

  pub fn settings(mut self, settings: GossipSettings) -> Self {
    self.settings = Some(settings);
    self
  }

  pub fn seeds(mut self, seeds: Vec<Member>) -> Self {
    self.seeds = seeds;
    self
  }

  pub fn property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
    self.properties.insert(key.into(), value.into());
    self
  }

  pub fn handler(mut self, handler: Handler<GossipMessage>) -> Self {
    self.handler = Some(handler);
    self
  }

  pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
    self.transport = Some(transport);
    self
  }

  pub fn build(self) -> Result<GossipManager, GossipError> {
    let id = self.id.ok_or(GossipError::MissingField("id"))?;
    let cluster = self.cluster.ok_or(GossipError::MissingField("cluster"))?;
    let settings = self.settings.ok_or(GossipError::MissingField("settings"))?;
    let transport = self.transport.ok_or(GossipError::MissingField("transport"))?;
    settings.validate()?;
    let socket = self.socket.unwrap_or_else(|| transport.local().clone());
    let mut me = Member::new(cluster, id, socket);
    me.properties = self.properties;
    let ring = RingStatePersister::new(
      &settings.path_to_ring_state,
      &me.cluster,
      &me.id,
      settings.serializer,
    );
    let data = UserDataPersister::new(
      &settings.path_to_data_state,
      &me.cluster,
      &me.id,
      settings.serializer,
    );
    let handler = self
      .handler
      .unwrap_or_else(|| Arc::new(default_handler::<GossipMessage>()));
    let core = Arc::new(GossipCore::new(me, settings, transport));
    let (stop, _) = watch::channel(false);
    Ok(GossipManager {
      transport: TransportManager::new(core.clone(), handler.clone()),
      core: core,
      handler: handler,
      seeds: self.seeds,
      ring: Arc::new(ring),
      data: Arc::new(data),
      tasks: Mutex::new(Vec::new()),
      stop: stop,
    })
  }
}

/// One member of a gossip cluster, and the tasks that keep its view of the cluster current.
///
/// [`start`](GossipManager::start) restores anything persisted, admits the seeds, opens the
/// endpoint and begins gossiping. Three periodic tasks run beside the gossip loop: the liveness
/// check convicts silent members, the reaper drops expired user data, and the persister writes
/// snapshots when persistence is on.
pub struct GossipManager {
  core: Arc<GossipCore>,
  handler: Handler<GossipMessage>,
  transport: TransportManager,
  seeds: Vec<Member>,
  ring: Arc<RingStatePersister>,
  data: Arc<UserDataPersister>,
  tasks: Mutex<Vec<JoinHandle<()>>>,
  stop: watch::Sender<bool>,
}
impl GossipManager {
  pub fn builder() -> GossipManagerBuilder {
    GossipManagerBuilder::new()
  }

  pub fn core(&self) -> &Arc<GossipCore> {
    &self.core
  }

  pub fn handler(&self) -> &Handler<GossipMessage> {
    &self.handler
  }

  /// Must be called from within a tokio runtime. Calling it twice does nothing.
  pub fn start(&self) {
    let mut tasks = self.tasks.lock();
    if !tasks.is_empty() {
      return;
    }
    let settings = self.core.settings();
    if settings.persist_ring_state {
      let restored = self.ring.load();
      info!("{}: restoring {} members", self.core.id(), restored.len());
      self.admit(restored);
    }
    if settings.persist_data_state {
      self.core.data().restore(self.data.load_per_node(), self.data.load_shared());
    }
    self.admit(self.seeds.clone());
    self.transport.start_endpoint();
    self.transport.start_active_gossiper();

    let core = self.core.clone();
    tasks.push(self.periodic("liveness", settings.liveness_interval, move || {
      check_liveness(&core)
    }));
    let core = self.core.clone();
    tasks.push(self.periodic("reaper", settings.cleanup_interval, move || {
      let reaped = core.data().reap(now_millis());
      if reaped > 0 {
        debug!("{}: reaped {} expired entries", core.id(), reaped);
      }
    }));
    let (core, ring, data) = (self.core.clone(), self.ring.clone(), self.data.clone());
    tasks.push(self.periodic("persister", settings.persist_interval, move || {
      persist(&core, &ring, &data)
    }));
    info!("{}: started as {}", self.core.id(), self.core.myself());
  }

  fn admit(&self, members: Vec<Member>) {
    let events = members
      .into_iter()
      .filter_map(|m| self.core.registry().insert_seed(m))
      .collect::<Vec<_>>();
    self.core.publish(events);
  }

  fn periodic<F>(&self, name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
  where
    F: FnMut() + Send + 'static,
  {
    let id = self.core.id().to_string();
    let mut stop = self.stop.subscribe();
    tokio::spawn(async move {
      let mut ticker = interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        tokio::select! {
          _ = stop.changed() => break,
          _ = ticker.tick() => tick(),
        }
      }
      debug!("{}: {} stopped", id, name);
    })
  }

  /// Leaves the cluster: tells every live peer, stops the periodic tasks, closes the endpoint
  /// and writes a last snapshot.
  pub async fn shutdown(&self) {
    let at = self.core.bump_heartbeat();
    self.core.data().merge_per_node(PerNodeDataMessage {
      node_id: self.core.id().to_string(),
      key: SHUTDOWN_KEY.to_string(),
      payload: at.to_be_bytes().to_vec(),
      timestamp: at,
      expire_at: NEVER_EXPIRES,
      replication: Replication::default(),
    });
    let msg: GossipMessage = ShutdownMessage {
      cluster: self.core.cluster().to_string(),
      node_id: self.core.id().to_string(),
      shutdown_at: at,
    }
    .into();
    for peer in self.core.registry().live_members() {
      self.core.send(&peer.socket, &msg).await;
    }

    let _ = self.stop.send(true);
    let tasks = std::mem::take(&mut *self.tasks.lock());
    for task in tasks {
      if let Err(e) = task.await {
        warn!("{}: periodic task ended badly: {}", self.core.id(), e);
      }
    }
    self.transport.shutdown().await;
    persist(&self.core, &self.ring, &self.data);
    info!("{}: shut down at {}", self.core.id(), at);
  }

  pub fn myself(&self) -> Member {
    self.core.myself()
  }

  pub fn live_members(&self) -> Vec<Member> {
    self.core.registry().live_members()
  }

  pub fn dead_members(&self) -> Vec<Member> {
    self.core.registry().dead_members()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
    self.core.subscribe()
  }

  /// Publishes a value owned by this member. The owner is always set to our own id.
  pub fn gossip_per_node_data(&self, mut msg: PerNodeDataMessage) {
    msg.node_id = self.core.id().to_string();
    self.core.data().merge_per_node(msg);
  }

  pub fn gossip_shared_data(&self, msg: SharedDataMessage) {
    self.core.data().merge_shared(msg);
  }

  /// The newest copy of `node_id`'s value for `key`, unless it has expired.
  pub fn find_per_node_data(&self, node_id: &str, key: &str) -> Option<PerNodeDataMessage> {
    let now = now_millis();
    self.core.data().per_node(node_id, key).filter(|m| m.expire_at > now)
  }

  pub fn find_shared_data(&self, key: &str) -> Option<SharedDataMessage> {
    let now = now_millis();
    self.core.data().shared(key).filter(|m| m.expire_at > now)
  }
}

fn check_liveness(core: &GossipCore) {
  let registry = core.registry();
  let mut events = recorded_shutdowns(core)
    .into_iter()
    .filter_map(|(member, at)| registry.mark_shut_down(&member.id, at))
    .collect::<Vec<_>>();
  events.extend(registry.evaluate(now_millis(), core.settings().convict_threshold));
  core.publish(events);
}

fn persist(core: &GossipCore, ring: &RingStatePersister, data: &UserDataPersister) {
  let settings = core.settings();
  if settings.persist_ring_state {
    let members = core.registry().snapshot().into_iter().map(|(m, _)| m).collect::<Vec<_>>();
    ring.save(&members);
  }
  if settings.persist_data_state {
    data.save(core.data());
  }
}

#[cfg(test)]
use crate::core::MemberState;
#[cfg(test)]
use crate::testkit::LoopbackNetwork;

#[cfg(test)]
fn builder(port: u16) -> GossipManagerBuilder {
  let transport = LoopbackNetwork::reliable().bind(Socket::localhost(port));
  GossipManager::builder()
    .cluster("c")
    .id("me")
    .settings(GossipSettings::default())
    .transport(transport)
}

#[test]
fn test_builder_requires_fields() {
  let missing = |b: GossipManagerBuilder| match b.build() {
    Err(GossipError::MissingField(field)) => field,
    _ => panic!("expected a missing field"),
  };
  assert_eq!(missing(GossipManagerBuilder::new()), "id");
  assert_eq!(missing(GossipManagerBuilder::new().id("me")), "cluster");
  assert_eq!(missing(GossipManagerBuilder::new().id("me").cluster("c")), "settings");
  let no_transport = GossipManagerBuilder::new()
    .id("me")
    .cluster("c")
    .settings(GossipSettings::default());
  assert_eq!(missing(no_transport), "transport");
}

#[test]
fn test_builder_validates_settings() {
  let mut settings = GossipSettings::default();
  settings.window_size = 0;
  match builder(4000).settings(settings).build() {
    Err(GossipError::InvalidSetting(_)) => {}
    _ => panic!("expected an invalid setting"),
  }
}

#[test]
fn test_builder_defaults() {
  let manager = builder(4001).property("datacenter", "east").build().unwrap();
  let me = manager.myself();
  assert_eq!(me.socket, Socket::localhost(4001));
  assert_eq!(me.property("datacenter"), Some("east"));
  assert!(manager.live_members().is_empty());
  let advertised = builder(4002).socket(Socket::localhost(9)).build().unwrap();
  assert_eq!(advertised.myself().socket, Socket::localhost(9));
}

#[test]
fn test_data_queries() {
  let manager = builder(4003).build().unwrap();
  manager.gossip_per_node_data(PerNodeDataMessage::new("someone-else", "k", vec![1], 1));
  assert!(manager.find_per_node_data("someone-else", "k").is_none());
  assert_eq!(manager.find_per_node_data("me", "k").unwrap().payload, vec![1]);
  manager.gossip_shared_data(SharedDataMessage::new("s", vec![2], 1).expiring_at(1));
  assert!(manager.find_shared_data("s").is_none());
  manager.gossip_shared_data(SharedDataMessage::new("s", vec![3], 2));
  assert_eq!(manager.find_shared_data("s").unwrap().payload, vec![3]);
}

#[test]
fn test_liveness_honours_recorded_shutdowns() {
  let manager = builder(4004).build().unwrap();
  let core = manager.core();
  let you = Member::new("c", "you", Socket::localhost(4005)).with_heartbeat(100);
  core.merge_members(&[you]);
  core.data().merge_per_node(PerNodeDataMessage {
    node_id: "you".to_string(),
    key: SHUTDOWN_KEY.to_string(),
    payload: 150u64.to_be_bytes().to_vec(),
    timestamp: 150,
    expire_at: NEVER_EXPIRES,
    replication: Replication::default(),
  });
  check_liveness(core);
  assert_eq!(core.registry().state("you"), Some(MemberState::Dead));
  assert_eq!(core.registry().get("you").unwrap().heartbeat, 150);
}
