use crate::model::{PerNodeDataMessage, SharedDataMessage};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::trace;

pub type PerNodeSnapshot = BTreeMap<String, BTreeMap<String, PerNodeDataMessage>>;
pub type SharedSnapshot = BTreeMap<String, SharedDataMessage>;

/// User data gossiped alongside membership. Both stores are last-writer-wins on the message
/// timestamp.
#[derive(Default)]
pub struct DataStore {
  per_node: DashMap<String, DashMap<String, PerNodeDataMessage>>,
  shared: DashMap<String, SharedDataMessage>,
}
impl DataStore {
  pub fn new() -> DataStore {
    DataStore::default()
  }

  /// Keeps `msg` unless a copy at least as new is already stored. Returns whether it was kept.
  pub fn merge_per_node(&self, msg: PerNodeDataMessage) -> bool {
    let node = self.per_node.entry(msg.node_id.clone()).or_default();
    let kept = match node.entry(msg.key.clone()) {
      Entry::Occupied(current) if current.get().timestamp >= msg.timestamp => {
        trace!("dropping stale per-node data {}/{}", msg.node_id, msg.key);
        false
      }
      Entry::Occupied(mut current) => {
        current.insert(msg);
        true
      }
      Entry::Vacant(slot) => {
        slot.insert(msg);
        true
      }
    };
    kept
  }

  /// The comparison and the write happen under one shard lock, so concurrent merges of the same
  /// key always leave the newest copy behind.
  pub fn merge_shared(&self, msg: SharedDataMessage) -> bool {
    match self.shared.entry(msg.key.clone()) {
      Entry::Occupied(current) if current.get().timestamp >= msg.timestamp => {
        trace!("dropping stale shared data {}", msg.key);
        false
      }
      Entry::Occupied(mut current) => {
        current.insert(msg);
        true
      }
      Entry::Vacant(slot) => {
        slot.insert(msg);
        true
      }
    }
  }

  pub fn per_node(&self, node_id: &str, key: &str) -> Option<PerNodeDataMessage> {
    self.per_node.get(node_id).and_then(|n| n.get(key).map(|m| m.value().clone()))
  }

  pub fn shared(&self, key: &str) -> Option<SharedDataMessage> {
    self.shared.get(key).map(|m| m.value().clone())
  }

  /// Every stored copy of `key`, one per node that wrote it.
  pub fn per_node_by_key(&self, key: &str) -> Vec<PerNodeDataMessage> {
    self.per_node.iter().filter_map(|n| n.get(key).map(|m| m.value().clone())).collect()
  }

  pub fn per_node_messages(&self) -> Vec<PerNodeDataMessage> {
    self
      .per_node
      .iter()
      .flat_map(|n| n.iter().map(|m| m.value().clone()).collect::<Vec<_>>())
      .collect()
  }

  pub fn shared_messages(&self) -> Vec<SharedDataMessage> {
    self.shared.iter().map(|m| m.value().clone()).collect()
  }

  pub fn per_node_snapshot(&self) -> PerNodeSnapshot {
    self
      .per_node
      .iter()
      .map(|n| {
        let entries = n.iter().map(|m| (m.key().clone(), m.value().clone())).collect();
        (n.key().clone(), entries)
      })
      .collect()
  }

  pub fn shared_snapshot(&self) -> SharedSnapshot {
    self.shared.iter().map(|m| (m.key().clone(), m.value().clone())).collect()
  }

  /// Merges data read back from disk.
  pub fn restore(&self, per_node: PerNodeSnapshot, shared: SharedSnapshot) {
    per_node.into_iter().flat_map(|(_, n)| n.into_iter()).for_each(|(_, m)| {
      self.merge_per_node(m);
    });
    shared.into_iter().for_each(|(_, m)| {
      self.merge_shared(m);
    });
  }

  /// Drops everything that expired at or before `now`. Returns how many entries went.
  pub fn reap(&self, now: u64) -> usize {
    let mut reaped = 0;
    for node in self.per_node.iter() {
      let before = node.len();
      node.retain(|_, m| m.expire_at > now);
      reaped += before - node.len();
    }
    self.per_node.retain(|_, n| !n.is_empty());
    let before = self.shared.len();
    self.shared.retain(|_, m| m.expire_at > now);
    reaped + before - self.shared.len()
  }
}

#[test]
fn test_last_writer_wins() {
  let store = DataStore::new();
  assert!(store.merge_shared(SharedDataMessage::new("k", vec![1], 10)));
  assert!(!store.merge_shared(SharedDataMessage::new("k", vec![2], 10)));
  assert!(!store.merge_shared(SharedDataMessage::new("k", vec![3], 9)));
  assert_eq!(store.shared("k").unwrap().payload, vec![1]);
  assert!(store.merge_shared(SharedDataMessage::new("k", vec![4], 11)));
  assert_eq!(store.shared("k").unwrap().payload, vec![4]);

  assert!(store.merge_per_node(PerNodeDataMessage::new("a", "k", vec![1], 10)));
  assert!(store.merge_per_node(PerNodeDataMessage::new("b", "k", vec![2], 5)));
  assert!(!store.merge_per_node(PerNodeDataMessage::new("a", "k", vec![3], 7)));
  assert_eq!(store.per_node("a", "k").unwrap().payload, vec![1]);
  assert_eq!(store.per_node_by_key("k").len(), 2);
  assert_eq!(store.per_node_messages().len(), 2);
}

#[test]
fn test_reap_expired() {
  let store = DataStore::new();
  store.merge_shared(SharedDataMessage::new("old", vec![], 1).expiring_at(50));
  store.merge_shared(SharedDataMessage::new("new", vec![], 1));
  store.merge_per_node(PerNodeDataMessage::new("a", "old", vec![], 1).expiring_at(100));
  store.merge_per_node(PerNodeDataMessage::new("b", "new", vec![], 1).expiring_at(200));
  assert_eq!(store.reap(100), 2);
  assert!(store.shared("old").is_none());
  assert!(store.shared("new").is_some());
  assert!(store.per_node("a", "old").is_none());
  assert_eq!(store.per_node_snapshot().len(), 1);
  assert_eq!(store.reap(100), 0);
}

#[test]
fn test_restore_merges() {
  let store = DataStore::new();
  store.merge_shared(SharedDataMessage::new("k", vec![9], 20));
  let other = DataStore::new();
  other.merge_shared(SharedDataMessage::new("k", vec![1], 10));
  other.merge_shared(SharedDataMessage::new("j", vec![2], 10));
  other.merge_per_node(PerNodeDataMessage::new("a", "k", vec![3], 10));
  store.restore(other.per_node_snapshot(), other.shared_snapshot());
  assert_eq!(store.shared("k").unwrap().payload, vec![9]);
  assert_eq!(store.shared("j").unwrap().payload, vec![2]);
  assert_eq!(store.per_node("a", "k").unwrap().payload, vec![3]);
}

#[test]
fn test_concurrent_merges_keep_newest() {
  let stamps = [10, 7, 6, 5, 4, 3, 2, 9];
  for round in 0..2000 {
    let store = DataStore::new();
    std::thread::scope(|s| {
      for &ts in stamps.iter() {
        let store = &store;
        s.spawn(move || {
          store.merge_shared(SharedDataMessage::new("k", vec![ts as u8], ts));
          store.merge_per_node(PerNodeDataMessage::new("a", "k", vec![ts as u8], ts));
        });
      }
    });
    assert_eq!(store.shared("k").unwrap().timestamp, 10, "round {}", round);
    assert_eq!(store.per_node("a", "k").unwrap().timestamp, 10, "round {}", round);
  }
}
