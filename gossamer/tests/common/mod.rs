#![allow(dead_code)]

use gossamer::cluster::GossipManager;
use gossamer::core::{GossipSettings, Member, Socket};
use gossamer::testkit::{init_logging, LogLevel, LoopbackNetwork};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const CLUSTER: &str = "itest";

pub fn settings() -> GossipSettings {
  init_logging(LogLevel::Warn);
  let mut settings = GossipSettings::default();
  settings.liveness_interval = Duration::from_millis(20);
  settings.gossip_disperse = 2;
  settings
}

pub fn member(id: &str, port: u16) -> Member {
  Member::new(CLUSTER, id, Socket::localhost(port))
}

pub fn node(
  network: &Arc<LoopbackNetwork>,
  id: &str,
  port: u16,
  settings: GossipSettings,
  seeds: Vec<Member>,
) -> GossipManager {
  GossipManager::builder()
    .cluster(CLUSTER)
    .id(id)
    .settings(settings)
    .seeds(seeds)
    .transport(network.bind(Socket::localhost(port)))
    .build()
    .unwrap()
}

pub fn live_ids(manager: &GossipManager) -> Vec<String> {
  manager.live_members().into_iter().map(|m| m.id).collect()
}

pub fn dead_ids(manager: &GossipManager) -> Vec<String> {
  manager.dead_members().into_iter().map(|m| m.id).collect()
}

/// Polls `condition` until it holds, failing the test after `limit`.
pub async fn eventually<F: FnMut() -> bool>(limit: Duration, what: &str, mut condition: F) {
  let deadline = Instant::now() + limit;
  while !condition() {
    if Instant::now() > deadline {
      panic!("timed out waiting for {}", what);
    }
    sleep(Duration::from_millis(10)).await;
  }
}
