use crate::cluster::FailureDetector;
use crate::core::{DetectorConfig, Member, MemberState};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use MemberState::*;

/// A change in the local view of the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClusterEvent {
  /// A member was heard of for the first time.
  Added(Member),
  /// A dead member showed a heartbeat newer than the one it died with.
  Revived(Member),
  /// A live member was convicted by its failure detector or announced its own shutdown.
  Downed(Member),
}
impl ClusterEvent {
  pub fn member(&self) -> &Member {
    match self {
      ClusterEvent::Added(m) => m,
      ClusterEvent::Revived(m) => m,
      ClusterEvent::Downed(m) => m,
    }
  }
}

struct MemberEntry {
  member: Member,
  state: MemberState,
  detector: Arc<FailureDetector>,
}

/// Every member this node knows of, each either alive or dead, each with its own failure
/// detector.
///
/// One ordered map holds all entries, so no member can be alive and dead at once, and each
/// transition below happens under a single write lock. The local member and members of other
/// clusters are never admitted.
pub struct MemberRegistry {
  cluster: String,
  local_id: String,
  config: DetectorConfig,
  members: RwLock<BTreeMap<String, MemberEntry>>,
}
impl MemberRegistry {
  pub fn new<C: Into<String>, I: Into<String>>(
    cluster: C,
    local_id: I,
    config: DetectorConfig,
  ) -> MemberRegistry {
    MemberRegistry {
      cluster: cluster.into(),
      local_id: local_id.into(),
      config: config,
      members: RwLock::new(BTreeMap::new()),
    }
  }

  pub fn cluster(&self) -> &str {
    &self.cluster
  }

  pub fn detector_config(&self) -> DetectorConfig {
    self.config
  }

  fn admissible(&self, member: &Member) -> bool {
    if member.cluster != self.cluster {
      warn!(
        "ignoring {} from cluster {}, we are in cluster {}",
        member.id, member.cluster, self.cluster
      );
      return false;
    }
    member.id != self.local_id
  }

  fn fresh_detector(&self, arrival: Option<u64>) -> Arc<FailureDetector> {
    let detector = Arc::new(FailureDetector::new(self.config));
    if let Some(now) = arrival {
      detector.record_heartbeat(now);
    }
    detector
  }

  /// Adds a member we have not heard from yet, such as a seed or one restored from disk. It
  /// starts alive with an empty detector. Known members are left alone.
  pub fn insert_seed(&self, member: Member) -> Option<ClusterEvent> {
    if !self.admissible(&member) {
      return None;
    }
    let mut members = self.members.write();
    if members.contains_key(&member.id) {
      return None;
    }
    let member = member.with_detector(self.config);
    debug!("admitting seed {}", member);
    members.insert(
      member.id.clone(),
      MemberEntry {
        member: member.clone(),
        state: Alive,
        detector: self.fresh_detector(None),
      },
    );
    Some(ClusterEvent::Added(member))
  }

  /// Applies one piece of gossip about `member`, received at local time `now`.
  ///
  /// The heartbeat counter only moves forward. A counter at or below the known one is stale and
  /// changes nothing, whatever the member's state. A newer counter feeds the detector of a live
  /// member, and brings a dead member back with a fresh detector. A newer counter from a known
  /// id at another address is a different member, so it replaces the old entry as a first
  /// contact.
  pub fn observe(&self, member: &Member, now: u64) -> Option<ClusterEvent> {
    if !self.admissible(member) {
      return None;
    }
    let mut members = self.members.write();
    let entry = match members.get_mut(&member.id) {
      Some(entry) => entry,
      None => {
        let member = member.clone().with_detector(self.config);
        info!("discovered {} at heartbeat {}", member, member.heartbeat);
        members.insert(
          member.id.clone(),
          MemberEntry {
            member: member.clone(),
            state: Alive,
            detector: self.fresh_detector(Some(now)),
          },
        );
        return Some(ClusterEvent::Added(member));
      }
    };
    if member.heartbeat <= entry.member.heartbeat {
      trace!(
        "stale heartbeat {} for {}, known {}",
        member.heartbeat,
        member.id,
        entry.member.heartbeat
      );
      return None;
    }
    if member.socket != entry.member.socket {
      let moved = member.clone().with_detector(self.config);
      info!("{} moved from {} to {}", moved.id, entry.member.socket, moved.socket);
      entry.member = moved.clone();
      entry.state = Alive;
      entry.detector = self.fresh_detector(Some(now));
      return Some(ClusterEvent::Added(moved));
    }
    entry.member = member.clone().with_detector(self.config);
    match entry.state {
      Alive => {
        entry.detector.record_heartbeat(now);
        None
      }
      Dead => {
        entry.state = Alive;
        entry.detector = self.fresh_detector(Some(now));
        info!("{} is alive again at heartbeat {}", entry.member, entry.member.heartbeat);
        Some(ClusterEvent::Revived(entry.member.clone()))
      }
    }
  }

  /// Applies a whole digest, returning the resulting changes in digest order.
  pub fn merge(&self, members: &[Member], now: u64) -> Vec<ClusterEvent> {
    members.iter().filter_map(|m| self.observe(m, now)).collect()
  }

  /// Convicts every live member whose phi at `now` has reached `threshold`. Members without
  /// enough history have no phi and are assumed alive.
  pub fn evaluate(&self, now: u64, threshold: f64) -> Vec<ClusterEvent> {
    let mut members = self.members.write();
    let mut events = Vec::new();
    for entry in members.values_mut().filter(|e| e.state == Alive) {
      match entry.detector.compute_phi_measure(now) {
        Some(phi) if phi >= threshold => {
          info!("convicting {}, phi {} >= {}", entry.member, phi, threshold);
          entry.state = Dead;
          events.push(ClusterEvent::Downed(entry.member.clone()));
        }
        Some(phi) => trace!("{} has phi {}", entry.member.id, phi),
        None => {}
      }
    }
    events
  }

  /// Marks a member dead because it said it is leaving. Its counter is raised to at least
  /// `shutdown_at`, so only a restarted instance can bring it back.
  pub fn mark_shut_down(&self, id: &str, shutdown_at: u64) -> Option<ClusterEvent> {
    let mut members = self.members.write();
    let entry = members.get_mut(id)?;
    entry.member.heartbeat = entry.member.heartbeat.max(shutdown_at);
    match entry.state {
      Alive => {
        info!("{} shut down at {}", entry.member, shutdown_at);
        entry.state = Dead;
        Some(ClusterEvent::Downed(entry.member.clone()))
      }
      Dead => None,
    }
  }

  /// Drops a member and its detector for good.
  pub fn forget(&self, id: &str) -> Option<Member> {
    self.members.write().remove(id).map(|e| e.member)
  }

  fn with_state(&self, state: MemberState) -> Vec<Member> {
    self
      .members
      .read()
      .values()
      .filter(|e| e.state == state)
      .map(|e| e.member.clone())
      .collect()
  }

  pub fn live_members(&self) -> Vec<Member> {
    self.with_state(Alive)
  }

  pub fn dead_members(&self) -> Vec<Member> {
    self.with_state(Dead)
  }

  pub fn get(&self, id: &str) -> Option<Member> {
    self.members.read().get(id).map(|e| e.member.clone())
  }

  pub fn state(&self, id: &str) -> Option<MemberState> {
    self.members.read().get(id).map(|e| e.state)
  }

  pub fn phi(&self, id: &str, now: u64) -> Option<f64> {
    let detector = self.members.read().get(id).map(|e| e.detector.clone())?;
    detector.compute_phi_measure(now)
  }

  /// Every known member with its state, in id order.
  pub fn snapshot(&self) -> Vec<(Member, MemberState)> {
    self.members.read().values().map(|e| (e.member.clone(), e.state)).collect()
  }

  pub fn len(&self) -> usize {
    self.members.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.members.read().is_empty()
  }
}

#[cfg(test)]
use crate::core::{Distribution, Socket};

#[cfg(test)]
fn registry() -> MemberRegistry {
  MemberRegistry::new(
    "c",
    "me",
    DetectorConfig {
      window_size: 100,
      minimum_samples: 2,
      distribution: Distribution::Normal,
    },
  )
}

#[cfg(test)]
fn member(id: &str, heartbeat: u64) -> Member {
  Member::new("c", id, Socket::localhost(3000)).with_heartbeat(heartbeat)
}

#[test]
fn test_observe_adds_then_advances() {
  let reg = registry();
  assert_eq!(reg.observe(&member("a", 5), 100), Some(ClusterEvent::Added(member("a", 5))));
  assert_eq!(reg.state("a"), Some(Alive));
  assert_eq!(reg.observe(&member("a", 7), 200), None);
  assert_eq!(reg.get("a").unwrap().heartbeat, 7);
  assert_eq!(reg.observe(&member("a", 6), 300), None);
  assert_eq!(reg.get("a").unwrap().heartbeat, 7);
  assert_eq!(reg.len(), 1);
}

#[test]
fn test_rejects_self_and_other_clusters() {
  let reg = registry();
  assert_eq!(reg.observe(&member("me", 1), 0), None);
  let stranger = Member::new("d", "x", Socket::localhost(3001)).with_heartbeat(1);
  assert_eq!(reg.observe(&stranger, 0), None);
  assert_eq!(reg.insert_seed(stranger), None);
  assert!(reg.is_empty());
}

#[test]
fn test_revival_requires_progress() {
  let reg = registry();
  reg.observe(&member("a", 10), 0);
  assert_eq!(reg.mark_shut_down("a", 10), Some(ClusterEvent::Downed(member("a", 10))));
  assert_eq!(reg.dead_members(), vec![member("a", 10)]);

  assert_eq!(reg.observe(&member("a", 10), 50), None);
  assert_eq!(reg.observe(&member("a", 3), 60), None);
  assert_eq!(reg.state("a"), Some(Dead));
  assert!(reg.live_members().is_empty());

  assert_eq!(reg.observe(&member("a", 11), 70), Some(ClusterEvent::Revived(member("a", 11))));
  assert_eq!(reg.state("a"), Some(Alive));
  assert!(reg.dead_members().is_empty());
}

#[test]
fn test_new_address_is_a_new_member() {
  let reg = registry();
  for (i, t) in (0..5u64).map(|i| (i, i * 100)) {
    reg.observe(&member("a", i + 1), t);
  }
  assert!(reg.phi("a", 450).is_some());
  let moved = Member::new("c", "a", Socket::localhost(3001));
  assert_eq!(reg.observe(&moved.clone().with_heartbeat(5), 500), None);
  assert_eq!(reg.get("a").unwrap().socket, Socket::localhost(3000));

  let event = reg.observe(&moved.clone().with_heartbeat(9), 500);
  assert_eq!(event, Some(ClusterEvent::Added(moved.clone())));
  assert_eq!(reg.get("a").unwrap().socket, Socket::localhost(3001));
  assert_eq!(reg.phi("a", 600), None);
  assert_eq!(reg.len(), 1);

  reg.mark_shut_down("a", 20);
  let back = Member::new("c", "a", Socket::localhost(3000)).with_heartbeat(21);
  assert_eq!(reg.observe(&back, 700), Some(ClusterEvent::Added(back.clone())));
  assert_eq!(reg.state("a"), Some(Alive));
}

#[test]
fn test_shutdown_raises_counter() {
  let reg = registry();
  reg.observe(&member("a", 10), 0);
  reg.mark_shut_down("a", 500);
  assert_eq!(reg.get("a").unwrap().heartbeat, 500);
  assert_eq!(reg.observe(&member("a", 400), 10), None);
  assert_eq!(reg.state("a"), Some(Dead));
  assert_eq!(reg.mark_shut_down("a", 600), None);
  assert_eq!(reg.get("a").unwrap().heartbeat, 600);
  assert_eq!(reg.mark_shut_down("b", 600), None);
}

#[test]
fn test_evaluate_convicts_silent_members() {
  let reg = registry();
  for (i, t) in (0..10u64).map(|i| (i, i * 100)) {
    reg.observe(&member("a", i + 1), t);
    reg.observe(&member("b", i + 1), t);
  }
  reg.insert_seed(member("seed", 0));
  assert!(reg.evaluate(950, 10.0).is_empty());
  assert!(reg.phi("seed", 950).is_none());

  reg.observe(&member("b", 100), 4950);
  let events = reg.evaluate(5000, 10.0);
  assert_eq!(events, vec![ClusterEvent::Downed(member("a", 10))]);
  assert_eq!(reg.state("b"), Some(Alive));
  assert_eq!(reg.state("seed"), Some(Alive));
  assert!(reg.evaluate(5000, 10.0).is_empty());
}

#[test]
fn test_members_partition() {
  let reg = registry();
  for id in ["d", "b", "a", "c"].iter() {
    reg.observe(&member(id, 1), 0);
  }
  reg.mark_shut_down("b", 1);
  let live = reg.live_members().into_iter().map(|m| m.id).collect::<Vec<_>>();
  let dead = reg.dead_members().into_iter().map(|m| m.id).collect::<Vec<_>>();
  assert_eq!(live, vec!["a", "c", "d"]);
  assert_eq!(dead, vec!["b"]);
  assert_eq!(reg.snapshot().len(), 4);
  assert_eq!(reg.forget("b"), Some(member("b", 1)));
  assert_eq!(reg.state("b"), None);
  assert_eq!(reg.len(), 3);
}
