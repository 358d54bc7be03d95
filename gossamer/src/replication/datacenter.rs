use crate::core::Member;
use crate::replication::Replicable;
use serde::{Deserialize, Serialize};

/// The member property that names a member's datacenter.
pub const DATACENTER_PROPERTY: &str = "datacenter";

/// Replicates only between members of the same datacenter. A member without a datacenter
/// property never matches.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DataCenterReplicable;
impl<M> Replicable<M> for DataCenterReplicable {
  fn should_replicate(&self, me: &Member, destination: &Member, _: &M) -> bool {
    match (me.property(DATACENTER_PROPERTY), destination.property(DATACENTER_PROPERTY)) {
      (Some(mine), Some(theirs)) => mine == theirs,
      _ => false,
    }
  }
}

#[cfg(test)]
use crate::core::Socket;

#[test]
fn test_datacenter_replicable() {
  let a = Member::new("c", "a", Socket::localhost(1)).with_property(DATACENTER_PROPERTY, "dc1");
  let b = Member::new("c", "b", Socket::localhost(2)).with_property(DATACENTER_PROPERTY, "dc1");
  let c = Member::new("c", "c", Socket::localhost(3)).with_property(DATACENTER_PROPERTY, "dc2");
  let d = Member::new("c", "d", Socket::localhost(4));
  assert!(DataCenterReplicable.should_replicate(&a, &b, &()));
  assert!(!DataCenterReplicable.should_replicate(&a, &c, &()));
  assert!(!DataCenterReplicable.should_replicate(&a, &d, &()));
  assert!(!DataCenterReplicable.should_replicate(&d, &a, &()));
}
