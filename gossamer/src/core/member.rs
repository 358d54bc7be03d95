use crate::core::{GossipError, Socket};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// The shape assumed for the gaps between a member's heartbeats.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
  Normal,
  Exponential,
}
impl FromStr for Distribution {
  type Err = GossipError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "normal" => Ok(Distribution::Normal),
      "exponential" => Ok(Distribution::Exponential),
      _ => Err(GossipError::UnknownDistribution(s.to_string())),
    }
  }
}
impl fmt::Display for Distribution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Distribution::Normal => write!(f, "normal"),
      Distribution::Exponential => write!(f, "exponential"),
    }
  }
}

/// Tuning for the failure detector a member gets when it is admitted to the registry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorConfig {
  pub window_size: usize,
  pub minimum_samples: usize,
  pub distribution: Distribution,
}
impl Default for DetectorConfig {
  fn default() -> Self {
    DetectorConfig {
      window_size: 5000,
      minimum_samples: 5,
      distribution: Distribution::Normal,
    }
  }
}

/// A participant in a gossip cluster.
///
/// Identity is the triple of cluster, id and socket. The heartbeat counter, the properties and
/// the detector tuning are all ignored by equality, ordering and hashing, so a member keeps its
/// identity while its heartbeat advances. Ordering puts the id first, which is the order the
/// registry hands members out in.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Member {
  pub cluster: String,
  pub id: String,
  pub socket: Socket,
  /// Advanced by the member itself every time it gossips. Peers never let it regress.
  pub heartbeat: u64,
  pub properties: BTreeMap<String, String>,
  /// Local tuning only, filled in from the receiving node's settings.
  #[serde(skip)]
  pub detector: DetectorConfig,
}
impl Member {
  pub fn new<C: Into<String>, I: Into<String>>(cluster: C, id: I, socket: Socket) -> Member {
    Member {
      cluster: cluster.into(),
      id: id.into(),
      socket: socket,
      heartbeat: 0,
      properties: BTreeMap::new(),
      detector: DetectorConfig::default(),
    }
  }

  pub fn with_heartbeat(mut self, heartbeat: u64) -> Member {
    self.heartbeat = heartbeat;
    self
  }

  pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Member {
    self.properties.insert(key.into(), value.into());
    self
  }

  pub fn with_detector(mut self, detector: DetectorConfig) -> Member {
    self.detector = detector;
    self
  }

  pub fn property(&self, key: &str) -> Option<&str> {
    self.properties.get(key).map(|s| s.as_str())
  }
}
impl PartialEq for Member {
  fn eq(&self, other: &Self) -> bool {
    if self.id != other.id {
      return false;
    }
    if self.socket != other.socket {
      return false;
    }
    self.cluster == other.cluster
  }
}
impl Eq for Member {}
impl Hash for Member {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.cluster.hash(state);
    self.id.hash(state);
    self.socket.hash(state);
  }
}
impl Ord for Member {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .id
      .cmp(&other.id)
      .then_with(|| self.cluster.cmp(&other.cluster))
      .then_with(|| self.socket.cmp(&other.socket))
  }
}
impl PartialOrd for Member {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}
impl fmt::Display for Member {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}/{}", self.id, self.socket, self.cluster)
  }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum MemberState {
  Alive,
  Dead,
}
impl fmt::Display for MemberState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MemberState::Alive => write!(f, "ALIVE"),
      MemberState::Dead => write!(f, "DEAD"),
    }
  }
}

#[cfg(test)]
use crate::core::Host;
#[cfg(test)]
use maplit::btreemap;
#[cfg(test)]
use std::collections::hash_map::DefaultHasher;

#[cfg(test)]
fn hash_code<H: Hash>(item: &H) -> u64 {
  let mut hasher = DefaultHasher::new();
  item.hash(&mut hasher);
  hasher.finish()
}

#[test]
fn test_member_hash_differs_for_different_members() {
  let mine = Member::new(
    "mycluster",
    "myid",
    Socket::new(Host::IP("4.4.4.4".parse().unwrap()), 1000),
  )
  .with_heartbeat(1);
  let yours = Member::new(
    "mycluster",
    "yourid",
    Socket::new(Host::IP("4.4.4.5".parse().unwrap()), 1005),
  )
  .with_heartbeat(11);
  assert_ne!(hash_code(&mine), hash_code(&yours));
  assert_ne!(mine, yours);
}

#[test]
fn test_member_identity_ignores_heartbeat_and_properties() {
  let base = Member::new("c", "a", Socket::localhost(4000));
  let later = base.clone().with_heartbeat(99).with_property("datacenter", "dc1");
  assert_eq!(later.properties, btreemap! {"datacenter".to_string() => "dc1".to_string()});
  assert_eq!(base, later);
  assert_eq!(hash_code(&base), hash_code(&later));

  let moved = Member::new("c", "a", Socket::localhost(4001));
  assert_ne!(base, moved);
  let other_cluster = Member::new("d", "a", Socket::localhost(4000));
  assert_ne!(base, other_cluster);
}

#[test]
fn test_member_orders_by_id() {
  let mut members = vec![
    Member::new("c", "b", Socket::localhost(1)),
    Member::new("c", "c", Socket::localhost(0)),
    Member::new("c", "a", Socket::localhost(2)),
  ];
  members.sort();
  let ids = members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
  assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn test_distribution_parse() {
  assert_eq!("normal".parse::<Distribution>().unwrap(), Distribution::Normal);
  assert_eq!("exponential".parse::<Distribution>().unwrap(), Distribution::Exponential);
  assert!("gaussian".parse::<Distribution>().is_err());
}
