use crate::cluster::GossipCore;
use crate::core::{now_millis, ActiveGossipStrategy, Member};
use crate::model::{
  ActiveGossipMessage, GossipMessage, PerNodeDataBulkMessage, SharedDataBulkMessage,
};
use crate::replication::{Replicable, DATACENTER_PROPERTY};
use itertools::Itertools;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, trace, warn};
use uuid::Uuid;

impl ActiveGossipStrategy {
  /// Picks up to `count` distinct peers out of `candidates`.
  pub fn select_peers<R: Rng>(
    &self,
    me: &Member,
    candidates: &[Member],
    count: usize,
    same_datacenter_probability: f64,
    rng: &mut R,
  ) -> Vec<Member> {
    let datacenter = me.property(DATACENTER_PROPERTY);
    match (self, datacenter) {
      (ActiveGossipStrategy::DatacenterRackAware, Some(dc)) => {
        let (mut same, mut other): (Vec<_>, Vec<_>) =
          candidates.iter().cloned().partition(|m| m.property(DATACENTER_PROPERTY) == Some(dc));
        let mut chosen = Vec::with_capacity(count);
        while chosen.len() < count && !(same.is_empty() && other.is_empty()) {
          let prefer_same = rng.gen_bool(same_datacenter_probability);
          let pool = match (prefer_same, same.is_empty(), other.is_empty()) {
            (true, false, _) | (false, false, true) => &mut same,
            _ => &mut other,
          };
          let i = rng.gen_range(0..pool.len());
          chosen.push(pool.swap_remove(i));
        }
        chosen
      }
      _ => candidates.choose_multiple(rng, count).cloned().collect(),
    }
  }
}

/// Drives anti-entropy: every `gossip_interval` it advances our heartbeat, swaps digests with a
/// few live peers, pushes user data to them, and pokes one dead member so partitions heal.
pub struct ActiveGossiper {
  core: Arc<GossipCore>,
  strategy: ActiveGossipStrategy,
  stop: watch::Sender<bool>,
  task: Mutex<Option<JoinHandle<()>>>,
}
impl ActiveGossiper {
  pub fn new(core: Arc<GossipCore>) -> ActiveGossiper {
    let (stop, _) = watch::channel(false);
    ActiveGossiper {
      strategy: core.settings().active_gossip,
      core: core,
      stop: stop,
      task: Mutex::new(None),
    }
  }

  pub fn strategy(&self) -> ActiveGossipStrategy {
    self.strategy
  }

  /// Spawns the gossip loop on the current runtime. Calling it twice does nothing.
  pub fn start(&self) {
    let mut task = self.task.lock();
    if task.is_some() {
      return;
    }
    let core = self.core.clone();
    let strategy = self.strategy;
    let mut stop = self.stop.subscribe();
    *task = Some(tokio::spawn(async move {
      let mut rng = SmallRng::from_entropy();
      let mut ticker = interval(core.settings().gossip_interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let mut exchanges = JoinSet::new();
      loop {
        tokio::select! {
          _ = stop.changed() => break,
          _ = async {
            ticker.tick().await;
            while exchanges.try_join_next().is_some() {}
            gossip_round(&core, strategy, &mut rng, &mut exchanges).await;
          } => {}
        }
      }
      exchanges.abort_all();
      debug!("{}: active gossip stopped", core.id());
    }));
  }

  pub async fn shutdown(&self) {
    let _ = self.stop.send(true);
    let task = self.task.lock().take();
    if let Some(task) = task {
      if let Err(e) = task.await {
        warn!("{}: active gossip ended badly: {}", self.core.id(), e);
      }
    }
  }
}

/// The live peers a round may talk to.
fn candidates(core: &GossipCore) -> Vec<Member> {
  let live = core.registry().live_members();
  if !core.settings().exclude_last_sender || live.len() < 2 {
    return live;
  }
  match core.last_sender() {
    Some(last) => live.into_iter().filter(|m| m.id != last).collect(),
    None => live,
  }
}

/// One tick of the gossip loop. Digest exchanges are spawned into `exchanges` and left running,
/// so a peer that never answers cannot hold back our next heartbeat.
pub async fn gossip_round<R: Rng>(
  core: &Arc<GossipCore>,
  strategy: ActiveGossipStrategy,
  rng: &mut R,
  exchanges: &mut JoinSet<()>,
) {
  core.bump_heartbeat();
  let settings = core.settings();
  let me = core.myself();
  let peers = strategy.select_peers(
    &me,
    &candidates(core),
    settings.gossip_disperse,
    settings.same_datacenter_probability,
    rng,
  );
  for peer in peers {
    exchanges.spawn(exchange(core.clone(), peer));
  }
  let dead = core.registry().dead_members();
  if let Some(dead) = dead.choose(rng) {
    trace!("{}: poking dead member {}", core.id(), dead.id);
    core.send(&dead.socket, &digest(core)).await;
  }
}

fn digest(core: &GossipCore) -> GossipMessage {
  let (me, members) = core.digest();
  ActiveGossipMessage {
    uuid: Uuid::new_v4(),
    sender: me,
    members: members,
  }
  .into()
}

async fn exchange(core: Arc<GossipCore>, peer: Member) {
  let msg = digest(&core);
  let uuid = match &msg {
    GossipMessage::ActiveGossip(m) => m.uuid,
    _ => return,
  };
  let response = core.expect_response(uuid);
  if let Err(e) = core.transport().send(&peer.socket, &msg).await {
    warn!("{}: could not gossip with {}: {}", core.id(), peer, e);
    core.abandon_response(&uuid);
    return;
  }
  match timeout(core.settings().response_timeout, response).await {
    Ok(Ok(_)) => trace!("{}: exchanged digests with {}", core.id(), peer.id),
    _ => {
      core.abandon_response(&uuid);
      debug!("{}: no digest back from {}", core.id(), peer.id);
    }
  }
  for msg in data_for(&core, &peer) {
    core.send(&peer.socket, &msg).await;
  }
}

/// The user data `peer` may receive, bundled when bulk transfer is on.
fn data_for(core: &GossipCore, peer: &Member) -> Vec<GossipMessage> {
  let me = core.myself();
  let now = now_millis();
  let settings = core.settings();
  let per_node = core
    .data()
    .per_node_messages()
    .into_iter()
    .filter(|m| m.expire_at > now && m.replication.should_replicate(&me, peer, m))
    .collect::<Vec<_>>();
  let shared = core
    .data()
    .shared_messages()
    .into_iter()
    .filter(|m| m.expire_at > now && m.replication.should_replicate(&me, peer, m))
    .collect::<Vec<_>>();
  if !settings.bulk_transfer {
    return per_node
      .into_iter()
      .map(GossipMessage::from)
      .chain(shared.into_iter().map(GossipMessage::from))
      .collect();
  }
  let size = settings.bulk_transfer_size.max(1);
  let mut bundles: Vec<GossipMessage> = Vec::new();
  for chunk in &per_node.into_iter().chunks(size) {
    let bulk = PerNodeDataBulkMessage {
      uuid: Uuid::new_v4(),
      sender: me.clone(),
      messages: chunk.collect(),
    };
    bundles.push(bulk.into());
  }
  for chunk in &shared.into_iter().chunks(size) {
    let bulk = SharedDataBulkMessage {
      uuid: Uuid::new_v4(),
      sender: me.clone(),
      messages: chunk.collect(),
    };
    bundles.push(bulk.into());
  }
  bundles
}

#[cfg(test)]
use crate::core::{GossipSettings, Socket};
#[cfg(test)]
use crate::model::{PerNodeDataMessage, SharedDataMessage};
#[cfg(test)]
use crate::replication::{NotReplicable, Replication, WhiteListReplicable};
#[cfg(test)]
use crate::testkit::LoopbackNetwork;
#[cfg(test)]
use crate::transport::Transport;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn dc_member(id: &str, port: u16, dc: Option<&str>) -> Member {
  let m = Member::new("c", id, Socket::localhost(port));
  match dc {
    Some(dc) => m.with_property(DATACENTER_PROPERTY, dc),
    None => m,
  }
}

#[test]
fn test_simple_selection() {
  let mut rng = SmallRng::seed_from_u64(3);
  let me = dc_member("me", 1, None);
  let candidates = (2..7).map(|p| dc_member(&format!("m{}", p), p, None)).collect::<Vec<_>>();
  let picked = ActiveGossipStrategy::Simple.select_peers(&me, &candidates, 3, 0.8, &mut rng);
  assert_eq!(picked.len(), 3);
  assert_eq!(picked.iter().unique().count(), 3);
  let all = ActiveGossipStrategy::Simple.select_peers(&me, &candidates, 10, 0.8, &mut rng);
  assert_eq!(all.len(), 5);
  assert!(ActiveGossipStrategy::Simple.select_peers(&me, &[], 1, 0.8, &mut rng).is_empty());
}

#[test]
fn test_datacenter_selection() {
  let mut rng = SmallRng::seed_from_u64(5);
  let me = dc_member("me", 1, Some("east"));
  let candidates = vec![
    dc_member("e1", 2, Some("east")),
    dc_member("w1", 3, Some("west")),
    dc_member("w2", 4, Some("west")),
    dc_member("n", 5, None),
  ];
  let strategy = ActiveGossipStrategy::DatacenterRackAware;
  for _ in 0..50 {
    let picked = strategy.select_peers(&me, &candidates, 1, 1.0, &mut rng);
    assert_eq!(picked[0].id, "e1");
    let picked = strategy.select_peers(&me, &candidates, 1, 0.0, &mut rng);
    assert_ne!(picked[0].id, "e1");
  }
  let all = strategy.select_peers(&me, &candidates, 4, 0.5, &mut rng);
  let ids = all.iter().map(|m| m.id.as_str()).sorted().collect::<Vec<_>>();
  assert_eq!(ids, vec!["e1", "n", "w1", "w2"]);
  let lonely = dc_member("me", 1, Some("south"));
  assert_eq!(strategy.select_peers(&lonely, &candidates, 1, 1.0, &mut rng).len(), 1);
}

#[test]
fn test_exclude_last_sender() {
  let socket = Socket::localhost(6200);
  let mut settings = GossipSettings::default();
  settings.exclude_last_sender = true;
  let transport = LoopbackNetwork::reliable().bind(socket.clone());
  let core = GossipCore::new(Member::new("c", "me", socket), settings, transport);
  core.merge_members(&[dc_member("a", 2, None).with_heartbeat(1)]);
  core.note_sender("a");
  assert_eq!(candidates(&core).len(), 1);
  core.merge_members(&[dc_member("b", 3, None).with_heartbeat(1)]);
  let ids = candidates(&core).into_iter().map(|m| m.id).collect::<Vec<_>>();
  assert_eq!(ids, vec!["b"]);
}

#[test]
fn test_data_respects_replication() {
  let socket = Socket::localhost(6300);
  let transport = LoopbackNetwork::reliable().bind(socket.clone());
  let core = GossipCore::new(Member::new("c", "me", socket), GossipSettings::default(), transport);
  let peer = dc_member("peer", 2, None);
  let data = core.data();
  data.merge_shared(SharedDataMessage::new("open", vec![], 1));
  data.merge_shared(
    SharedDataMessage::new("closed", vec![], 1).replicated(Replication::Not(NotReplicable)),
  );
  data.merge_shared(SharedDataMessage::new("gone", vec![], 1).expiring_at(2));
  data.merge_per_node(
    PerNodeDataMessage::new("me", "w", vec![], 1)
      .replicated(WhiteListReplicable::new(Some(vec![peer.clone()]))),
  );
  data.merge_per_node(
    PerNodeDataMessage::new("me", "x", vec![], 1).replicated(WhiteListReplicable::new(None)),
  );
  let keys = data_for(&core, &peer).into_iter().map(|m| m.key()).sorted().collect::<Vec<_>>();
  assert_eq!(keys, vec!["me/w", "open"]);
}

#[test]
fn test_bulk_transfer_chunks() {
  let socket = Socket::localhost(6400);
  let mut settings = GossipSettings::default();
  settings.bulk_transfer = true;
  settings.bulk_transfer_size = 2;
  let transport = LoopbackNetwork::reliable().bind(socket.clone());
  let core = GossipCore::new(Member::new("c", "me", socket), settings, transport);
  for i in 0..5 {
    core.data().merge_shared(SharedDataMessage::new(format!("k{}", i), vec![], 1));
  }
  core.data().merge_per_node(PerNodeDataMessage::new("me", "p", vec![], 1));
  let sizes = data_for(&core, &dc_member("peer", 2, None))
    .into_iter()
    .map(|m| match m {
      GossipMessage::SharedDataBulk(b) => b.messages.len(),
      GossipMessage::PerNodeDataBulk(b) => b.messages.len() * 10,
      _ => 0,
    })
    .collect::<Vec<_>>();
  assert_eq!(sizes, vec![10, 2, 2, 1]);
}

#[tokio::test]
async fn test_round_does_not_wait_for_replies() {
  let network = LoopbackNetwork::reliable();
  let socket = Socket::localhost(6500);
  let core = Arc::new(GossipCore::new(
    Member::new("c", "me", socket.clone()),
    GossipSettings::default(),
    network.bind(socket),
  ));
  let silent = network.bind(Socket::localhost(6501));
  core.merge_members(&[dc_member("silent", 6501, None).with_heartbeat(1)]);
  let before = core.myself().heartbeat;
  let mut rng = SmallRng::seed_from_u64(7);
  let mut exchanges = JoinSet::new();
  for _ in 0..3 {
    let round = gossip_round(&core, ActiveGossipStrategy::Simple, &mut rng, &mut exchanges);
    timeout(Duration::from_millis(50), round).await.unwrap();
  }
  assert!(core.myself().heartbeat >= before + 3);
  assert_eq!(exchanges.len(), 3);
  match silent.recv().await.unwrap() {
    GossipMessage::ActiveGossip(m) => assert_eq!(m.sender.id, "me"),
    other => panic!("expected a digest, got {:?}", other),
  }
  exchanges.abort_all();
}
