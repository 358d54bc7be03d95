mod common;

use common::{eventually, live_ids, member, node, settings};
use gossamer::cluster::{RingStatePersister, UserDataPersister};
use gossamer::core::{GossipSettings, Serializer};
use gossamer::model::SharedDataMessage;
use gossamer::testkit::LoopbackNetwork;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn temp_dir() -> PathBuf {
  let dir = std::env::temp_dir().join(format!("gossamer-itest-{}", uuid::Uuid::new_v4()));
  fs::create_dir_all(&dir).unwrap();
  dir
}

fn persistent(dir: &PathBuf) -> GossipSettings {
  let mut settings = settings();
  settings.persist_ring_state = true;
  settings.persist_data_state = true;
  settings.path_to_ring_state = dir.clone();
  settings.path_to_data_state = dir.clone();
  settings
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_restores_members_and_data() {
  let dir = temp_dir();
  let network = LoopbackNetwork::reliable();
  let a = node(&network, "a", 3300, persistent(&dir), vec![]);
  let b = node(&network, "b", 3301, settings(), vec![member("a", 3300)]);
  a.start();
  b.start();
  eventually(Duration::from_secs(10), "convergence", || live_ids(&a) == ["b"]).await;
  a.gossip_shared_data(SharedDataMessage::new("kept", vec![1], 1));
  a.shutdown().await;

  let ring = RingStatePersister::new(&dir, "itest", "a", Serializer::Json);
  assert_eq!(ring.load().into_iter().map(|m| m.id).collect::<Vec<_>>(), vec!["b"]);
  let data = UserDataPersister::new(&dir, "itest", "a", Serializer::Json);
  assert!(data.load_shared().contains_key("kept"));

  // No seeds this time, b is only known from disk.
  let a = node(&network, "a", 3300, persistent(&dir), vec![]);
  a.start();
  assert_eq!(live_ids(&a), ["b"]);
  assert_eq!(a.find_shared_data("kept").unwrap().payload, vec![1]);
  a.shutdown().await;
  b.shutdown().await;
  fs::remove_dir_all(&dir).unwrap();
}
