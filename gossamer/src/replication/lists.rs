use crate::core::Member;
use crate::replication::Replicable;
use im::HashSet;
use serde::{Deserialize, Serialize};

/// Replicates only to the listed members. A missing list is an empty one, so nothing is
/// replicated.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct WhiteListReplicable {
  members: HashSet<Member>,
}
impl WhiteListReplicable {
  pub fn new(members: Option<Vec<Member>>) -> WhiteListReplicable {
    WhiteListReplicable {
      members: members.unwrap_or_default().into_iter().collect(),
    }
  }

  pub fn members(&self) -> &HashSet<Member> {
    &self.members
  }
}
impl<M> Replicable<M> for WhiteListReplicable {
  fn should_replicate(&self, _: &Member, destination: &Member, _: &M) -> bool {
    self.members.contains(destination)
  }
}

/// Replicates to everyone except the listed members. A missing list is an empty one, so
/// everything is replicated.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlackListReplicable {
  members: HashSet<Member>,
}
impl BlackListReplicable {
  pub fn new(members: Option<Vec<Member>>) -> BlackListReplicable {
    BlackListReplicable {
      members: members.unwrap_or_default().into_iter().collect(),
    }
  }

  pub fn members(&self) -> &HashSet<Member> {
    &self.members
  }
}
impl<M> Replicable<M> for BlackListReplicable {
  fn should_replicate(&self, _: &Member, destination: &Member, _: &M) -> bool {
    !self.members.contains(destination)
  }
}

#[cfg(test)]
use crate::core::Socket;

#[cfg(test)]
fn members() -> Vec<Member> {
  (0..3u16).map(|i| Member::new("c", format!("m{}", i), Socket::localhost(5000 + i))).collect()
}

#[test]
fn test_whitelist_fails_closed() {
  let m = members();
  let none = WhiteListReplicable::new(None);
  let empty = WhiteListReplicable::new(Some(vec![]));
  for dest in &m {
    assert!(!none.should_replicate(&m[0], dest, &()));
    assert!(!empty.should_replicate(&m[0], dest, &()));
  }
  let some = WhiteListReplicable::new(Some(vec![m[1].clone()]));
  assert!(some.should_replicate(&m[0], &m[1], &()));
  assert!(!some.should_replicate(&m[0], &m[2], &()));
  // Heartbeat is not part of identity.
  assert!(some.should_replicate(&m[0], &m[1].clone().with_heartbeat(42), &()));
}

#[test]
fn test_blacklist_fails_open() {
  let m = members();
  let none = BlackListReplicable::new(None);
  for dest in &m {
    assert!(none.should_replicate(&m[0], dest, &()));
  }
  let some = BlackListReplicable::new(Some(vec![m[2].clone()]));
  assert!(some.should_replicate(&m[0], &m[1], &()));
  assert!(!some.should_replicate(&m[0], &m[2], &()));
}
