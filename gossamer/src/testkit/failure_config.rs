use crate::core::Socket;
use im::HashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How unreliable delivery to one destination is.
#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug)]
pub struct FailureConfig {
  /// Chance in `[0, 1]` that a message is silently lost.
  pub drop_prob: f64,
  /// When set, each message is held for a uniformly random time in this range.
  pub delay: Option<(Duration, Duration)>,
}
impl FailureConfig {
  pub fn dropping(drop_prob: f64) -> FailureConfig {
    FailureConfig {
      drop_prob: drop_prob,
      delay: None,
    }
  }
}

/// Failure settings for a whole network, overridable per destination.
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct FailureConfigMap {
  pub cluster_wide: FailureConfig,
  pub node_wide: HashMap<Socket, FailureConfig>,
}
impl FailureConfigMap {
  pub fn get(&self, socket: &Socket) -> &FailureConfig {
    self.node_wide.get(socket).unwrap_or(&self.cluster_wide)
  }
}

#[test]
fn test_node_wide_overrides() {
  let mut map = FailureConfigMap::default();
  map.cluster_wide = FailureConfig::dropping(0.5);
  map.node_wide.insert(Socket::localhost(1), FailureConfig::dropping(1.0));
  assert_eq!(map.get(&Socket::localhost(1)).drop_prob, 1.0);
  assert_eq!(map.get(&Socket::localhost(2)).drop_prob, 0.5);
}
