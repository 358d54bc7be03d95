//! Decides which peers a piece of user data may be shipped to.
//!
//! A [`Replicable`] is a pure predicate over the local member, a candidate destination and the
//! message itself. Data messages carry a [`Replication`] value, so the policy travels with the
//! data and every node that relays it applies the same rule.

mod datacenter;
mod lists;

use crate::core::Member;
use serde::{Deserialize, Serialize};

#[rustfmt::skip]
pub use {
  datacenter::DataCenterReplicable,
  datacenter::DATACENTER_PROPERTY,
  lists::BlackListReplicable,
  lists::WhiteListReplicable,
};

pub trait Replicable<M>: Send + Sync {
  fn should_replicate(&self, me: &Member, destination: &Member, message: &M) -> bool;
}

/// Replicates to every destination.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AllReplicable;
impl<M> Replicable<M> for AllReplicable {
  fn should_replicate(&self, _: &Member, _: &Member, _: &M) -> bool {
    true
  }
}

/// Keeps the data on the node that wrote it.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NotReplicable;
impl<M> Replicable<M> for NotReplicable {
  fn should_replicate(&self, _: &Member, _: &Member, _: &M) -> bool {
    false
  }
}

/// The policy attached to a data message.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Replication {
  All(AllReplicable),
  Not(NotReplicable),
  WhiteList(WhiteListReplicable),
  BlackList(BlackListReplicable),
  DataCenter(DataCenterReplicable),
}
impl Default for Replication {
  fn default() -> Self {
    Replication::All(AllReplicable)
  }
}
impl<M> Replicable<M> for Replication {
  fn should_replicate(&self, me: &Member, destination: &Member, message: &M) -> bool {
    match self {
      Replication::All(r) => r.should_replicate(me, destination, message),
      Replication::Not(r) => r.should_replicate(me, destination, message),
      Replication::WhiteList(r) => r.should_replicate(me, destination, message),
      Replication::BlackList(r) => r.should_replicate(me, destination, message),
      Replication::DataCenter(r) => r.should_replicate(me, destination, message),
    }
  }
}
impl From<WhiteListReplicable> for Replication {
  fn from(r: WhiteListReplicable) -> Self {
    Replication::WhiteList(r)
  }
}
impl From<BlackListReplicable> for Replication {
  fn from(r: BlackListReplicable) -> Self {
    Replication::BlackList(r)
  }
}
impl From<DataCenterReplicable> for Replication {
  fn from(r: DataCenterReplicable) -> Self {
    Replication::DataCenter(r)
  }
}

#[cfg(test)]
use crate::core::Socket;

#[test]
fn test_replication_variants() {
  let me = Member::new("c", "me", Socket::localhost(1));
  let you = Member::new("c", "you", Socket::localhost(2));
  assert!(Replication::default().should_replicate(&me, &you, &()));
  assert!(!Replication::Not(NotReplicable).should_replicate(&me, &you, &()));
  let white: Replication = WhiteListReplicable::new(Some(vec![you.clone()])).into();
  assert!(white.should_replicate(&me, &you, &()));
  assert!(!white.should_replicate(&you, &me, &()));
}
